use crate::aggregator::{
    aggregate, Aggregation, ChannelView, CoreNetworkRow, DepartmentView, PersonRow, ProductRow,
    ReconciliationCheck, TrackingDepartment,
};
use crate::error::Result;
use crate::models::{MonthRange, OrgEntity, ReferenceTables, TransactionRow};
use crate::resolver::{ResolverIndex, UnresolvedSummary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// 汇总信息：各类计数、生成时间、月份范围、未解析计数与核对结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub generated_at: DateTime<Utc>,
    pub month_range: MonthRange,
    pub tables_version: u64,
    pub raw_rows: usize,
    pub in_range_rows: usize,
    pub undated_rows: usize,
    pub daily_rows: usize,
    pub roster_entries: usize,
    pub roster_conflicts: usize,
    pub soft_errors: usize,
    pub department_rows: usize,
    pub channel_rows: usize,
    pub person_rows: usize,
    pub tracking_departments: usize,
    pub tracking_members: usize,
    pub core_network_rows: usize,
    pub product_rows: usize,
    pub unresolved: UnresolvedSummary,
    pub reconciliation: ReconciliationCheck,
}

/// 一次生成的完整报表，生成后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedReport {
    pub summary: ReportSummary,
    pub departments: DepartmentView,
    pub channels: ChannelView,
    pub people: Vec<PersonRow>,
    pub tracking: Vec<TrackingDepartment>,
    pub core_networks: Vec<CoreNetworkRow>,
    pub products: Vec<ProductRow>,
    /// 数据源明细（未筛选）
    pub raw: Vec<TransactionRow>,
}

/// 生成报表所需的全部输入；参考表是本次运行的快照
#[derive(Debug, Clone, Copy)]
pub struct ReportInputs<'a> {
    pub rows: &'a [TransactionRow],
    pub roster: &'a [OrgEntity],
    pub tables: &'a ReferenceTables,
    pub daily: Option<&'a [TransactionRow]>,
}

/// 由归一化后的明细生成报表。
///
/// 明细按传入的参考表重新解析一次，所以编辑过的行和参考表更新后的结果都一致；
/// 输出只取决于输入、月份范围和 `generated_at`。
pub fn generate_report(
    inputs: ReportInputs,
    month_start: u32,
    month_end: u32,
    generated_at: DateTime<Utc>,
) -> Result<AggregatedReport> {
    let range = MonthRange::new(month_start, month_end)?;
    let resolver = ResolverIndex::build(inputs.tables, inputs.roster);

    let resolve_all = |rows: &[TransactionRow]| -> Vec<TransactionRow> {
        rows.iter()
            .cloned()
            .map(|mut row| {
                resolver.resolve_row(&mut row);
                row
            })
            .collect()
    };
    let raw = resolve_all(inputs.rows);
    let daily = inputs.daily.map(resolve_all);

    let aggregation = aggregate(
        &raw,
        inputs.roster,
        inputs.tables,
        &resolver,
        daily.as_deref(),
        range,
    );

    let unresolved = UnresolvedSummary::collect(&raw);
    if unresolved.total() > 0 {
        warn!(
            channel = unresolved.channel,
            bank = unresolved.bank,
            product = unresolved.product,
            branch = unresolved.branch,
            "部分明细未能在参考表中找到，已按原文归类"
        );
    }

    let context = RunContext {
        generated_at,
        range,
        tables_version: inputs.tables.version,
        roster_entries: inputs.roster.len(),
        daily_rows: daily.as_ref().map_or(0, Vec::len),
        unresolved,
    };
    let report = assemble(aggregation, raw, context);
    info!(
        rows = report.summary.raw_rows,
        in_range = report.summary.in_range_rows,
        start = range.start(),
        end = range.end(),
        balanced = report.summary.reconciliation.balanced,
        "报表生成完成"
    );
    Ok(report)
}

/// 汇总阶段之外的运行信息
#[derive(Debug, Clone)]
pub struct RunContext {
    pub generated_at: DateTime<Utc>,
    pub range: MonthRange,
    pub tables_version: u64,
    pub roster_entries: usize,
    pub daily_rows: usize,
    pub unresolved: UnresolvedSummary,
}

/// 组装报表；汇总中的计数直接取自各视图
pub fn assemble(aggregation: Aggregation, raw: Vec<TransactionRow>, context: RunContext) -> AggregatedReport {
    let summary = ReportSummary {
        generated_at: context.generated_at,
        month_range: context.range,
        tables_version: context.tables_version,
        raw_rows: raw.len(),
        in_range_rows: aggregation.in_range_rows,
        undated_rows: aggregation.undated_rows,
        daily_rows: context.daily_rows,
        roster_entries: context.roster_entries,
        roster_conflicts: aggregation.roster_conflicts,
        soft_errors: raw.iter().map(|row| row.parse_issues as usize).sum(),
        department_rows: aggregation.departments.rows.len(),
        channel_rows: aggregation.channels.rows.len(),
        person_rows: aggregation.people.len(),
        tracking_departments: aggregation.tracking.len(),
        tracking_members: aggregation.tracking.iter().map(|d| d.members.len()).sum(),
        core_network_rows: aggregation.core_networks.len(),
        product_rows: aggregation.products.len(),
        unresolved: context.unresolved,
        reconciliation: aggregation.reconciliation,
    };

    AggregatedReport {
        summary,
        departments: aggregation.departments,
        channels: aggregation.channels,
        people: aggregation.people,
        tracking: aggregation.tracking,
        core_networks: aggregation.core_networks,
        products: aggregation.products,
        raw,
    }
}
