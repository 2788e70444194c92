use crate::error::{ReportError, Result};
use crate::excel_parser::{locate_header_row, read_first_sheet, RawSheet, TRANSACTION_HEADER};
use crate::models::{OrgEntity, ReferenceTables, TransactionRow};
use crate::normalizer::normalize_rows;
use crate::report::{generate_report, AggregatedReport, ReportInputs};
use crate::resolver::ResolverIndex;
use crate::roster::parse_roster;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// 一个上传的工作簿
#[derive(Debug, Clone)]
pub struct SourceWorkbook {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// 数据源编辑器推回的行编辑
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RowEdit {
    Add { row: TransactionRow },
    Update { index: usize, row: TransactionRow },
    Delete { index: usize },
}

/// 已导入的一组文件。切换月份或编辑明细后重新汇总，不再读取原始字节。
#[derive(Debug, Clone)]
pub struct ReportSession {
    rows: Vec<TransactionRow>,
    daily: Option<Vec<TransactionRow>>,
    roster: Vec<OrgEntity>,
    tables: Arc<ReferenceTables>,
}

/// 识别表头并归一化一个明细工作表
pub fn normalize_sheet(sheet: &RawSheet) -> Vec<TransactionRow> {
    let header_idx = locate_header_row(&sheet.rows, &TRANSACTION_HEADER);
    let normalized = normalize_rows(sheet, header_idx);
    info!(
        file = %sheet.file_name,
        header_idx,
        rows = normalized.rows.len(),
        blank = normalized.dropped_blank,
        footer = normalized.dropped_footer,
        soft_errors = normalized.soft_errors,
        "明细归一化完成"
    );
    normalized.rows
}

impl ReportSession {
    /// 读取明细、花名册和可选日报。缺少明细或花名册、工作簿为空都是致命错误。
    pub fn ingest(
        sources: &[SourceWorkbook],
        roster: Option<&SourceWorkbook>,
        daily: Option<&SourceWorkbook>,
        tables: Arc<ReferenceTables>,
    ) -> Result<Self> {
        if sources.is_empty() {
            return Err(ReportError::MissingSource("保单明细".to_string()));
        }
        let roster = roster.ok_or_else(|| ReportError::MissingSource("花名册".to_string()))?;

        let mut rows = Vec::new();
        for source in sources {
            let sheet = read_first_sheet(&source.file_name, &source.bytes)?;
            rows.extend(normalize_sheet(&sheet));
        }

        let roster_sheet = read_first_sheet(&roster.file_name, &roster.bytes)?;
        let roster = parse_roster(&roster_sheet, &tables.org_chart);
        if roster.is_empty() {
            warn!(file = %roster_sheet.file_name, "花名册中没有网点，所有明细将归入未分配");
        }

        let daily = match daily {
            Some(workbook) => Some(normalize_sheet(&read_first_sheet(
                &workbook.file_name,
                &workbook.bytes,
            )?)),
            None => None,
        };

        Ok(Self::from_rows(rows, roster, daily, tables))
    }

    /// 直接由已归一化的数据建立会话
    pub fn from_rows(
        rows: Vec<TransactionRow>,
        roster: Vec<OrgEntity>,
        daily: Option<Vec<TransactionRow>>,
        tables: Arc<ReferenceTables>,
    ) -> Self {
        let mut session = Self {
            rows,
            daily,
            roster,
            tables,
        };
        session.resolve_all();
        session
    }

    fn resolve_all(&mut self) {
        let resolver = ResolverIndex::build(&self.tables, &self.roster);
        for row in &mut self.rows {
            resolver.resolve_row(row);
        }
        for row in self.daily.iter_mut().flatten() {
            resolver.resolve_row(row);
        }
    }

    pub fn rows(&self) -> &[TransactionRow] {
        &self.rows
    }

    pub fn roster(&self) -> &[OrgEntity] {
        &self.roster
    }

    pub fn tables(&self) -> &Arc<ReferenceTables> {
        &self.tables
    }

    /// 换用新的参考表快照，下次汇总生效
    pub fn refresh_tables(&mut self, tables: Arc<ReferenceTables>) {
        self.tables = tables;
        self.resolve_all();
    }

    pub fn generate(
        &self,
        month_start: u32,
        month_end: u32,
        generated_at: DateTime<Utc>,
    ) -> Result<AggregatedReport> {
        generate_report(
            ReportInputs {
                rows: &self.rows,
                roster: &self.roster,
                tables: &self.tables,
                daily: self.daily.as_deref(),
            },
            month_start,
            month_end,
            generated_at,
        )
    }

    /// 应用一次行编辑；月份跟随签单日期重算，规范值按当前快照重新解析
    pub fn apply_edit(&mut self, edit: RowEdit) -> Result<()> {
        let resolver = ResolverIndex::build(&self.tables, &self.roster);
        let prepare = |mut row: TransactionRow| {
            row.month = match row.sign_date {
                Some(date) => Some(date.month()),
                None => row.month.filter(|month| (1..=12).contains(month)),
            };
            resolver.resolve_row(&mut row);
            row
        };

        match edit {
            RowEdit::Add { row } => self.rows.push(prepare(row)),
            RowEdit::Update { index, row } => {
                let slot = self.rows.get_mut(index).ok_or(ReportError::RowIndex(index))?;
                *slot = prepare(row);
            }
            RowEdit::Delete { index } => {
                if index >= self.rows.len() {
                    return Err(ReportError::RowIndex(index));
                }
                self.rows.remove(index);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AliasEntry, UNASSIGNED};
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal_macros::dec;
    use rust_xlsxwriter::Workbook;

    fn xlsx(name: &str, rows: &[&[&str]]) -> SourceWorkbook {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                if !value.is_empty() {
                    sheet.write_string(r as u32, c as u16, *value).unwrap();
                }
            }
        }
        SourceWorkbook {
            file_name: name.to_string(),
            bytes: workbook.save_to_buffer().unwrap(),
        }
    }

    fn ledger() -> SourceWorkbook {
        xlsx(
            "明细.xlsx",
            &[
                &["2024年银保新单清单"],
                &["保单号", "险种", "新约保费", "银行总行", "网点名称", "签单日期"],
                &["P001", "鑫享年金", "1000", "工商银行", "城东支行", "2024-01-15"],
                &["P002", "鑫享年金", "2,500", "工商银行", "城西支行", "2024-03-02"],
                &["P003", "安康保", "400", "农业银行", "陌生网点", "2024-03-20"],
                &["合计", "", "3900"],
            ],
        )
    }

    fn roster() -> SourceWorkbook {
        xlsx(
            "花名册.xlsx",
            &[
                &["部门", "渠道", "网点名称", "客户经理"],
                &["银保一部", "工行渠道", "城东支行", "张三"],
                &["银保一部", "工行渠道", "城西支行", "王五"],
            ],
        )
    }

    fn session() -> ReportSession {
        ReportSession::ingest(
            &[ledger()],
            Some(&roster()),
            None,
            Arc::new(ReferenceTables::default()),
        )
        .unwrap()
    }

    fn generated_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn missing_inputs_are_fatal() {
        let tables = Arc::new(ReferenceTables::default());
        let err = ReportSession::ingest(&[], Some(&roster()), None, tables.clone()).unwrap_err();
        assert!(matches!(err, ReportError::MissingSource(_)));
        let err = ReportSession::ingest(&[ledger()], None, None, tables).unwrap_err();
        assert!(matches!(err, ReportError::MissingSource(_)));
    }

    #[test]
    fn ingests_workbooks_and_generates_views() {
        let session = session();
        assert_eq!(session.rows().len(), 3);
        assert_eq!(session.roster().len(), 2);

        let report = session.generate(1, 12, generated_at()).unwrap();
        assert_eq!(report.summary.raw_rows, 3);
        assert_eq!(report.summary.in_range_rows, 3);
        assert_eq!(report.summary.unresolved.branch, 1);
        assert!(report.summary.reconciliation.balanced);

        let departments = &report.departments.rows;
        assert_eq!(departments.len(), 2);
        assert_eq!(departments[0].department, "银保一部");
        assert_eq!(departments[0].totals.qj, dec!(3500));
        assert_eq!(departments[1].department, UNASSIGNED);
        assert_eq!(departments[1].totals.qj, dec!(400));

        let march = session.generate(3, 3, generated_at()).unwrap();
        assert_eq!(march.summary.in_range_rows, 2);
        assert_eq!(march.departments.total.totals.qj, dec!(2900));
    }

    #[test]
    fn regenerating_gives_identical_output() {
        let session = session();
        let first = session.generate(2, 9, generated_at()).unwrap();
        let second = session.generate(2, 9, generated_at()).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn invalid_range_is_rejected() {
        let err = session().generate(5, 4, generated_at()).unwrap_err();
        assert!(matches!(err, ReportError::InvalidMonthRange { start: 5, end: 4 }));
    }

    #[test]
    fn edits_are_reflected_in_next_report() {
        let mut session = session();
        session
            .apply_edit(RowEdit::Add {
                row: TransactionRow {
                    policy_no: Some("P004".to_string()),
                    branch_raw: Some("城东支行".to_string()),
                    annual_premium: dec!(200),
                    sign_date: NaiveDate::from_ymd_opt(2024, 5, 8),
                    ..Default::default()
                },
            })
            .unwrap();
        assert_eq!(session.rows()[3].month, Some(5));
        assert_eq!(session.rows()[3].branch.as_deref(), Some("城东支行"));
        let may = session.generate(5, 5, generated_at()).unwrap();
        assert_eq!(may.departments.rows[0].totals.qj, dec!(200));

        let mut moved = session.rows()[2].clone();
        moved.branch_raw = Some("城东支行".to_string());
        session
            .apply_edit(RowEdit::Update { index: 2, row: moved })
            .unwrap();
        let report = session.generate(1, 12, generated_at()).unwrap();
        assert_eq!(report.departments.rows.len(), 1);
        assert_eq!(report.departments.rows[0].totals.qj, dec!(4100));

        session.apply_edit(RowEdit::Delete { index: 0 }).unwrap();
        assert_eq!(session.rows().len(), 3);
        assert!(matches!(
            session.apply_edit(RowEdit::Delete { index: 3 }),
            Err(ReportError::RowIndex(3))
        ));
    }

    #[test]
    fn refreshed_tables_resolve_previous_misses() {
        let mut session = session();
        let tables = ReferenceTables {
            version: 2,
            network_aliases: vec![AliasEntry {
                name: "城东支行".to_string(),
                aliases: vec!["陌生网点".to_string()],
            }],
            ..Default::default()
        };
        session.refresh_tables(Arc::new(tables));
        assert_eq!(session.tables().version, 2);

        let report = session.generate(1, 12, generated_at()).unwrap();
        assert_eq!(report.summary.tables_version, 2);
        assert_eq!(report.summary.unresolved.branch, 0);
        assert_eq!(report.departments.rows.len(), 1);
        assert_eq!(report.departments.rows[0].totals.qj, dec!(3900));
    }

    #[test]
    fn default_header_row_counts_from_top_of_sheet() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(1, 0, "银保新单清单").unwrap();
        sheet.write_string(6, 0, "保单号").unwrap();
        sheet.write_string(6, 1, "年交保费").unwrap();
        sheet.write_string(7, 0, "P001").unwrap();
        sheet.write_number(7, 1, 100.0).unwrap();
        sheet.write_string(8, 0, "P002").unwrap();
        sheet.write_number(8, 1, 200.0).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let rows = normalize_sheet(&read_first_sheet("明细.xlsx", &bytes).unwrap());
        let ids: Vec<&str> = rows.iter().filter_map(|r| r.policy_no.as_deref()).collect();
        assert_eq!(ids, vec!["P001", "P002"]);
        assert_eq!(rows[0].annual_premium, dec!(100));
        assert_eq!(rows[0].source_row, 8);
    }

    #[test]
    fn edited_month_outside_calendar_is_undated() {
        let mut session = session();
        session
            .apply_edit(RowEdit::Add {
                row: TransactionRow {
                    policy_no: Some("P009".to_string()),
                    annual_premium: dec!(50),
                    month: Some(13),
                    ..Default::default()
                },
            })
            .unwrap();
        assert_eq!(session.rows()[3].month, None);

        let mut kept = session.rows()[0].clone();
        kept.sign_date = None;
        kept.month = Some(0);
        session
            .apply_edit(RowEdit::Update { index: 0, row: kept })
            .unwrap();
        assert_eq!(session.rows()[0].month, None);

        let report = session.generate(1, 12, generated_at()).unwrap();
        assert_eq!(report.summary.undated_rows, 2);
        assert_eq!(report.summary.in_range_rows, 2);
    }

    #[test]
    fn row_edits_deserialize_from_tagged_json() {
        let edit: RowEdit = serde_json::from_str(r#"{"op": "delete", "index": 4}"#).unwrap();
        assert_eq!(edit, RowEdit::Delete { index: 4 });
    }
}
