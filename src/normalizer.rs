use crate::excel_parser::{header_label, Cell, RawSheet};
use crate::models::TransactionRow;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use regex::Regex;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::debug;

/// 保单明细的规范字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Field {
    PolicyNo,
    Policyholder,
    Product,
    AnnualPremium,
    LumpPremium,
    StandardPremium,
    PaymentTerm,
    Channel,
    Bank,
    Branch,
    Manager,
    Status,
    SignDate,
}

/// 每个字段可能出现的列名，按优先级排列
const FIELD_ALIASES: &[(Field, &[&str])] = &[
    (Field::PolicyNo, &["保单号", "保险单号", "投保单号"]),
    (Field::Policyholder, &["投保人", "投保人姓名", "客户姓名"]),
    (Field::Product, &["险种", "险种名称", "产品名称"]),
    (Field::AnnualPremium, &["新约保费", "年交保费", "期交保费"]),
    (Field::LumpPremium, &["趸交保费", "趸缴保费"]),
    (Field::StandardPremium, &["标准保费", "标保"]),
    (Field::PaymentTerm, &["缴费期间", "缴费年期", "交费期间", "缴费方式"]),
    (Field::Channel, &["渠道", "渠道名称", "销售渠道"]),
    (Field::Bank, &["银行总行", "银行", "合作银行"]),
    (Field::Branch, &["网点名称", "网点", "银行网点", "出单网点"]),
    (Field::Manager, &["客户经理", "签单人", "网点经理"]),
    (Field::Status, &["保单状态", "状态"]),
    (Field::SignDate, &["签单日期", "承保日期", "投保日期", "生效日期"]),
];

/// 这些列全部为空的行视为空行
const KEY_FIELDS: &[Field] = &[
    Field::PolicyNo,
    Field::Product,
    Field::AnnualPremium,
    Field::LumpPremium,
    Field::Bank,
    Field::Status,
];

const FOOTER_MARKERS: &[&str] = &["合计", "总计", "小计"];

/// 一个工作表归一化的结果
#[derive(Debug, Clone, Default)]
pub struct NormalizedSheet {
    pub rows: Vec<TransactionRow>,
    pub soft_errors: usize,
    pub dropped_blank: usize,
    pub dropped_footer: usize,
}

/// 比较列名前去掉所有空白
pub fn compact_label(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// 表头行 → 列号；同名列取第一列
pub fn column_lookup(header: &[Cell]) -> HashMap<String, usize> {
    let mut lookup = HashMap::new();
    for (idx, cell) in header.iter().enumerate() {
        if let Some(label) = header_label(cell) {
            lookup.entry(compact_label(&label)).or_insert(idx);
        }
    }
    lookup
}

/// 在表头中按别名顺序找列
pub fn resolve_column(lookup: &HashMap<String, usize>, aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| lookup.get(&compact_label(alias)).copied())
}

fn map_fields(header: &[Cell]) -> HashMap<Field, usize> {
    let lookup = column_lookup(header);
    FIELD_ALIASES
        .iter()
        .filter_map(|(field, aliases)| resolve_column(&lookup, aliases).map(|idx| (*field, idx)))
        .collect()
}

/// 按表头行把后续各行转换成 [`TransactionRow`]
pub fn normalize_rows(sheet: &RawSheet, header_idx: usize) -> NormalizedSheet {
    let mut result = NormalizedSheet::default();
    let Some(header) = sheet.rows.get(header_idx) else {
        return result;
    };
    let columns = map_fields(header);
    debug!(file = %sheet.file_name, header_idx, mapped = columns.len(), "表头映射");

    let has_lump_column = columns.contains_key(&Field::LumpPremium);

    for (offset, row) in sheet.rows.iter().enumerate().skip(header_idx + 1) {
        let cell = |field: Field| columns.get(&field).and_then(|idx| row.get(*idx));

        if is_footer(row) {
            result.dropped_footer += 1;
            continue;
        }
        if KEY_FIELDS
            .iter()
            .all(|field| cell(*field).map_or(true, Cell::is_blank))
        {
            result.dropped_blank += 1;
            continue;
        }

        let source_row = offset + 1;
        let mut issues = 0u32;
        let mut amount = |field: Field| match cell(field).map_or(Ok(Decimal::ZERO), coerce_amount) {
            Ok(value) => value,
            Err(raw) => {
                debug!(source_row, ?field, raw = %raw, "金额无法解析，按 0 计");
                issues += 1;
                Decimal::ZERO
            }
        };

        let mut annual_premium = amount(Field::AnnualPremium);
        let mut lump_premium = amount(Field::LumpPremium);
        let standard_premium = amount(Field::StandardPremium);

        let text = |field: Field| cell(field).and_then(Cell::as_text);
        let payment_term = text(Field::PaymentTerm);
        if !has_lump_column && payment_term.as_deref().is_some_and(is_lump_term) {
            lump_premium = annual_premium;
            annual_premium = Decimal::ZERO;
        }

        let (sign_date, month) = match cell(Field::SignDate) {
            None => (None, None),
            Some(date_cell) if date_cell.is_blank() => (None, None),
            Some(date_cell) => {
                let parsed = parse_sign_date(date_cell);
                if parsed.1.is_none() {
                    debug!(source_row, value = ?date_cell, "签单日期无法解析");
                    issues += 1;
                }
                parsed
            }
        };

        result.soft_errors += issues as usize;
        result.rows.push(TransactionRow {
            policy_no: text(Field::PolicyNo),
            policyholder: text(Field::Policyholder),
            product_raw: text(Field::Product),
            product: None,
            annual_premium,
            lump_premium,
            standard_premium,
            payment_term,
            channel_raw: text(Field::Channel),
            channel: None,
            bank_raw: text(Field::Bank),
            bank: None,
            branch_raw: text(Field::Branch),
            branch: None,
            manager: text(Field::Manager),
            status: text(Field::Status),
            sign_date,
            month,
            unresolved: Default::default(),
            parse_issues: issues,
            source_file: sheet.file_name.clone(),
            source_row,
        });
    }

    result
}

fn is_footer(row: &[Cell]) -> bool {
    row.iter()
        .find_map(Cell::as_text)
        .is_some_and(|first| FOOTER_MARKERS.iter().any(|marker| first.starts_with(marker)))
}

/// 趸交 / 趸缴 / 一次交清
pub fn is_lump_term(term: &str) -> bool {
    term.contains('趸') || term.contains("一次")
}

/// 宽松解析金额：去掉千分位、货币符号；负数视为解析失败。
/// 失败时返回原始文本。
pub fn coerce_amount(cell: &Cell) -> Result<Decimal, String> {
    let value = match cell {
        Cell::Empty => return Ok(Decimal::ZERO),
        Cell::Number(f) => Decimal::from_f64(*f)
            .map(|d| d.round_dp(6).normalize())
            .ok_or_else(|| f.to_string())?,
        Cell::Text(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !c.is_whitespace() && !matches!(c, ',' | '，' | '¥' | '￥' | '元'))
                .collect();
            if cleaned.is_empty() {
                return Ok(Decimal::ZERO);
            }
            Decimal::from_str(&cleaned).map_err(|_| s.clone())?
        }
        Cell::Bool(b) => return Err(b.to_string()),
    };
    if value.is_sign_negative() && !value.is_zero() {
        return Err(value.to_string());
    }
    Ok(value)
}

fn year_month_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{4})\s*[-/.年]\s*(\d{1,2})(?:\s*[-/.月]\s*(\d{1,2}))?")
            .expect("年月正则无效")
    })
}

/// 解析签单日期；只能识别到年月时日期为空、月份有值
pub fn parse_sign_date(cell: &Cell) -> (Option<NaiveDate>, Option<u32>) {
    let date = match cell {
        Cell::Number(serial) => excel_serial_to_date(*serial),
        Cell::Text(s) => {
            let s = s.trim();
            match parse_date_text(s) {
                Some(date) => Some(date),
                None => return (None, month_from_text(s)),
            }
        }
        Cell::Empty | Cell::Bool(_) => None,
    };
    (date, date.map(|d| d.month()))
}

fn parse_date_text(text: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%Y%m%d", "%Y年%m月%d日"];
    const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| {
            let caps = year_month_pattern().captures(text)?;
            let year = caps.get(1)?.as_str().parse().ok()?;
            let month = caps.get(2)?.as_str().parse().ok()?;
            let day = caps.get(3)?.as_str().parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        })
}

fn month_from_text(text: &str) -> Option<u32> {
    let caps = year_month_pattern().captures(text)?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    (1..=12).contains(&month).then_some(month)
}

/// Excel 日期序列号转日期
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    // Excel 日期从 1899-12-30 开始（因为 Excel 的 1900 年闰年 bug）
    if !serial.is_finite() || !(1.0..2_958_466.0).contains(&serial) {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    base.checked_add_signed(Duration::days(serial.floor() as i64))
}
