use crate::aggregator::{PremiumTotals, TrackingMetrics};
use crate::error::Result;
use crate::report::AggregatedReport;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, Worksheet};
use std::path::Path;

/// 导出的工作表名称，与报表视图一一对应
pub const SHEET_NAMES: [&str; 8] = ["汇总", "部门", "渠道", "人力", "追踪", "核心网点", "险种", "数据源"];

const TOTALS_HEADERS: [&str; 4] = ["年交", "趸交", "标保", "件数"];

struct Formats {
    title: Format,
    header: Format,
    cell: Format,
    money: Format,
    total: Format,
}

impl Formats {
    fn new() -> Self {
        let cell = Format::new()
            .set_font_size(10)
            .set_align(FormatAlign::VerticalCenter)
            .set_border(FormatBorder::Thin);
        Self {
            title: Format::new()
                .set_font_size(14)
                .set_bold()
                .set_align(FormatAlign::VerticalCenter),
            header: Format::new()
                .set_font_size(11)
                .set_bold()
                .set_align(FormatAlign::Center)
                .set_align(FormatAlign::VerticalCenter)
                .set_background_color(Color::RGB(0xD3D3D3))
                .set_border(FormatBorder::Thin),
            money: cell.clone().set_num_format("#,##0.00"),
            total: cell.clone().set_bold().set_num_format("#,##0.00"),
            cell,
        }
    }
}

/// 生成报表工作簿
pub fn build_workbook(report: &AggregatedReport) -> Result<Workbook> {
    let formats = Formats::new();
    let mut workbook = Workbook::new();

    write_summary(workbook.add_worksheet().set_name(SHEET_NAMES[0])?, report, &formats)?;
    write_departments(workbook.add_worksheet().set_name(SHEET_NAMES[1])?, report, &formats)?;
    write_channels(workbook.add_worksheet().set_name(SHEET_NAMES[2])?, report, &formats)?;
    write_people(workbook.add_worksheet().set_name(SHEET_NAMES[3])?, report, &formats)?;
    write_tracking(workbook.add_worksheet().set_name(SHEET_NAMES[4])?, report, &formats)?;
    write_core_networks(workbook.add_worksheet().set_name(SHEET_NAMES[5])?, report, &formats)?;
    write_products(workbook.add_worksheet().set_name(SHEET_NAMES[6])?, report, &formats)?;
    write_raw(workbook.add_worksheet().set_name(SHEET_NAMES[7])?, report, &formats)?;

    Ok(workbook)
}

/// 保存到文件
pub fn save_report(report: &AggregatedReport, output_file: &Path) -> Result<()> {
    let mut workbook = build_workbook(report)?;
    workbook.save(output_file)?;
    Ok(())
}

/// 写到内存
pub fn report_to_buffer(report: &AggregatedReport) -> Result<Vec<u8>> {
    let mut workbook = build_workbook(report)?;
    Ok(workbook.save_to_buffer()?)
}

fn money(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

fn write_headers(sheet: &mut Worksheet, row: u32, headers: &[&str], formats: &Formats) -> Result<()> {
    for (col, header) in headers.iter().enumerate() {
        sheet.write_with_format(row, col as u16, *header, &formats.header)?;
        sheet.set_column_width(col as u16, 14)?;
    }
    Ok(())
}

fn write_totals(
    sheet: &mut Worksheet,
    row: u32,
    first_col: u16,
    totals: &PremiumTotals,
    format: &Format,
) -> Result<()> {
    sheet.write_with_format(row, first_col, money(totals.qj), format)?;
    sheet.write_with_format(row, first_col + 1, money(totals.dc), format)?;
    sheet.write_with_format(row, first_col + 2, money(totals.bb), format)?;
    sheet.write_with_format(row, first_col + 3, totals.policy_count as f64, format)?;
    Ok(())
}

fn write_attainment(sheet: &mut Worksheet, row: u32, col: u16, value: Option<Decimal>, formats: &Formats) -> Result<()> {
    match value {
        Some(percent) => sheet.write_with_format(row, col, format!("{percent}%"), &formats.cell)?,
        None => sheet.write_with_format(row, col, "-", &formats.cell)?,
    };
    Ok(())
}

fn write_summary(sheet: &mut Worksheet, report: &AggregatedReport, formats: &Formats) -> Result<()> {
    let summary = &report.summary;
    sheet.set_column_width(0, 20)?;
    sheet.set_column_width(1, 28)?;
    let title = format!(
        "保费报表（{}月-{}月）",
        summary.month_range.start(),
        summary.month_range.end()
    );
    sheet.write_with_format(0, 0, &title, &formats.title)?;

    let generated_at = summary.generated_at.format("%Y-%m-%d %H:%M:%S").to_string();
    let items: Vec<(&str, String)> = vec![
        ("生成时间", generated_at),
        ("参考表版本", summary.tables_version.to_string()),
        ("明细行数", summary.raw_rows.to_string()),
        ("范围内行数", summary.in_range_rows.to_string()),
        ("无签单月份", summary.undated_rows.to_string()),
        ("日报行数", summary.daily_rows.to_string()),
        ("花名册网点", summary.roster_entries.to_string()),
        ("花名册冲突", summary.roster_conflicts.to_string()),
        ("解析告警", summary.soft_errors.to_string()),
        ("未解析渠道", summary.unresolved.channel.to_string()),
        ("未解析银行", summary.unresolved.bank.to_string()),
        ("未解析险种", summary.unresolved.product.to_string()),
        ("未解析网点", summary.unresolved.branch.to_string()),
        (
            "核对结果",
            if summary.reconciliation.balanced { "一致" } else { "不一致" }.to_string(),
        ),
    ];
    for (idx, (label, value)) in items.iter().enumerate() {
        let row = idx as u32 + 2;
        sheet.write_with_format(row, 0, *label, &formats.header)?;
        sheet.write_with_format(row, 1, value, &formats.cell)?;
    }
    Ok(())
}

fn write_departments(sheet: &mut Worksheet, report: &AggregatedReport, formats: &Formats) -> Result<()> {
    let mut headers = vec!["部门"];
    headers.extend(TOTALS_HEADERS);
    headers.extend(["年交目标", "年交达成", "趸交目标", "趸交达成", "当日年交", "当日趸交", "当日件数"]);
    write_headers(sheet, 0, &headers, formats)?;

    let view = &report.departments;
    for (idx, dept) in view.rows.iter().chain(std::iter::once(&view.total)).enumerate() {
        let row = idx as u32 + 1;
        let is_total = idx == view.rows.len();
        let format = if is_total { &formats.total } else { &formats.money };
        sheet.write_with_format(row, 0, &dept.department, &formats.cell)?;
        write_totals(sheet, row, 1, &dept.totals, format)?;
        sheet.write_with_format(row, 5, money(dept.annual_target), format)?;
        write_attainment(sheet, row, 6, dept.annual_attainment, formats)?;
        sheet.write_with_format(row, 7, money(dept.lump_target), format)?;
        write_attainment(sheet, row, 8, dept.lump_attainment, formats)?;
        sheet.write_with_format(row, 9, money(dept.daily.qj), format)?;
        sheet.write_with_format(row, 10, money(dept.daily.dc), format)?;
        sheet.write_with_format(row, 11, dept.daily.policy_count as f64, format)?;
    }
    Ok(())
}

fn write_channels(sheet: &mut Worksheet, report: &AggregatedReport, formats: &Formats) -> Result<()> {
    let mut headers = vec!["渠道", "部门"];
    headers.extend(TOTALS_HEADERS);
    headers.extend(["网点数", "活动网点", "当日年交", "当日趸交", "当日件数"]);
    write_headers(sheet, 0, &headers, formats)?;

    let view = &report.channels;
    for (idx, channel) in view.rows.iter().chain(std::iter::once(&view.total)).enumerate() {
        let row = idx as u32 + 1;
        let format = if idx == view.rows.len() { &formats.total } else { &formats.money };
        sheet.write_with_format(row, 0, &channel.channel, &formats.cell)?;
        sheet.write_with_format(row, 1, &channel.department, &formats.cell)?;
        write_totals(sheet, row, 2, &channel.totals, format)?;
        sheet.write_with_format(row, 6, channel.total_branches as f64, format)?;
        sheet.write_with_format(row, 7, channel.active_branches as f64, format)?;
        sheet.write_with_format(row, 8, money(channel.daily.qj), format)?;
        sheet.write_with_format(row, 9, money(channel.daily.dc), format)?;
        sheet.write_with_format(row, 10, channel.daily.policy_count as f64, format)?;
    }
    Ok(())
}

fn write_people(sheet: &mut Worksheet, report: &AggregatedReport, formats: &Formats) -> Result<()> {
    let mut headers = vec!["客户经理", "部门"];
    headers.extend(TOTALS_HEADERS);
    write_headers(sheet, 0, &headers, formats)?;

    for (idx, person) in report.people.iter().enumerate() {
        let row = idx as u32 + 1;
        sheet.write_with_format(row, 0, &person.manager, &formats.cell)?;
        sheet.write_with_format(row, 1, &person.department, &formats.cell)?;
        write_totals(sheet, row, 2, &person.totals, &formats.money)?;
    }
    Ok(())
}

fn write_tracking_metrics(
    sheet: &mut Worksheet,
    row: u32,
    metrics: &TrackingMetrics,
    format: &Format,
) -> Result<()> {
    let values = [
        metrics.qj,
        metrics.feiyou,
        metrics.guibao,
        metrics.jzdc,
        metrics.gmdc,
        metrics.bb,
    ];
    for (offset, value) in values.iter().enumerate() {
        sheet.write_with_format(row, 2 + offset as u16, money(*value), format)?;
    }
    sheet.write_with_format(row, 8, metrics.policy_count as f64, format)?;
    sheet.write_with_format(row, 9, metrics.total_branches as f64, format)?;
    sheet.write_with_format(row, 10, metrics.active_branches as f64, format)?;
    Ok(())
}

fn write_tracking(sheet: &mut Worksheet, report: &AggregatedReport, formats: &Formats) -> Result<()> {
    let headers = [
        "部门", "客户经理", "年交", "非邮年交", "规保", "价值趸", "规模趸", "标保", "件数", "网点数",
        "活动网点",
    ];
    write_headers(sheet, 0, &headers, formats)?;

    let mut row = 1u32;
    for department in &report.tracking {
        for member in &department.members {
            sheet.write_with_format(row, 0, &department.department, &formats.cell)?;
            sheet.write_with_format(row, 1, &member.manager, &formats.cell)?;
            write_tracking_metrics(sheet, row, &member.metrics, &formats.money)?;
            row += 1;
        }
        sheet.write_with_format(row, 0, &department.department, &formats.cell)?;
        sheet.write_with_format(row, 1, "小计", &formats.cell)?;
        write_tracking_metrics(sheet, row, &department.subtotal, &formats.total)?;
        row += 1;
    }
    Ok(())
}

fn write_core_networks(sheet: &mut Worksheet, report: &AggregatedReport, formats: &Formats) -> Result<()> {
    let months: Vec<String> = (1..=12).map(|m| format!("{m}月")).collect();
    let mut headers = vec!["网点", "渠道", "部门"];
    headers.extend(months.iter().map(String::as_str));
    headers.extend(["范围合计", "件数"]);
    write_headers(sheet, 0, &headers, formats)?;

    for (idx, network) in report.core_networks.iter().enumerate() {
        let row = idx as u32 + 1;
        sheet.write_with_format(row, 0, &network.branch, &formats.cell)?;
        sheet.write_with_format(row, 1, &network.channel, &formats.cell)?;
        sheet.write_with_format(row, 2, &network.department, &formats.cell)?;
        for (month_idx, value) in network.monthly.iter().enumerate() {
            sheet.write_with_format(row, 3 + month_idx as u16, money(*value), &formats.money)?;
        }
        sheet.write_with_format(row, 15, money(network.range_total), &formats.total)?;
        sheet.write_with_format(row, 16, network.policy_count as f64, &formats.money)?;
    }
    Ok(())
}

fn write_products(sheet: &mut Worksheet, report: &AggregatedReport, formats: &Formats) -> Result<()> {
    let mut headers = vec!["险种"];
    headers.extend(TOTALS_HEADERS);
    write_headers(sheet, 0, &headers, formats)?;

    for (idx, product) in report.products.iter().enumerate() {
        let row = idx as u32 + 1;
        sheet.write_with_format(row, 0, &product.product, &formats.cell)?;
        write_totals(sheet, row, 1, &product.totals, &formats.money)?;
    }
    Ok(())
}

fn write_raw(sheet: &mut Worksheet, report: &AggregatedReport, formats: &Formats) -> Result<()> {
    let headers = [
        "保单号", "投保人", "险种", "年交", "趸交", "标准保费", "缴费期间", "渠道", "银行", "网点",
        "客户经理", "保单状态", "签单日期", "月份", "来源文件", "来源行",
    ];
    write_headers(sheet, 0, &headers, formats)?;

    let text = |value: &Option<String>| value.clone().unwrap_or_default();
    for (idx, item) in report.raw.iter().enumerate() {
        let row = idx as u32 + 1;
        let texts = [
            (0, text(&item.policy_no)),
            (1, text(&item.policyholder)),
            (2, text(&item.product)),
            (6, text(&item.payment_term)),
            (7, text(&item.channel)),
            (8, text(&item.bank)),
            (9, text(&item.branch)),
            (10, text(&item.manager)),
            (11, text(&item.status)),
            (
                12,
                item.sign_date
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default(),
            ),
            (13, item.month.map(|m| m.to_string()).unwrap_or_default()),
            (14, item.source_file.clone()),
        ];
        for (col, value) in &texts {
            sheet.write_with_format(row, *col, value, &formats.cell)?;
        }
        sheet.write_with_format(row, 3, money(item.annual_premium), &formats.money)?;
        sheet.write_with_format(row, 4, money(item.lump_premium), &formats.money)?;
        sheet.write_with_format(row, 5, money(item.standard_premium), &formats.money)?;
        sheet.write_with_format(row, 15, item.source_row as f64, &formats.cell)?;
    }
    Ok(())
}
