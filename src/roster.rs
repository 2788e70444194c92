use crate::excel_parser::{locate_header_row, Cell, RawSheet, ROSTER_HEADER};
use crate::models::{OrgChartNode, OrgEntity, UNASSIGNED};
use crate::normalizer::{column_lookup, resolve_column};
use crate::resolver::normalize_key;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

const DEPARTMENT_ALIASES: &[&str] = &["部门", "所属部门", "营业部"];
const CHANNEL_ALIASES: &[&str] = &["渠道", "渠道名称", "所属渠道"];
const BRANCH_ALIASES: &[&str] = &["网点名称", "网点", "网点简称"];
const MANAGER_ALIASES: &[&str] = &["客户经理", "网点经理", "负责人"];

/// 解析花名册工作表。没有网点名的行跳过；缺部门时按组织架构图从渠道反查。
pub fn parse_roster(sheet: &RawSheet, org_chart: &[OrgChartNode]) -> Vec<OrgEntity> {
    let header_idx = locate_header_row(&sheet.rows, &ROSTER_HEADER);
    let Some(header) = sheet.rows.get(header_idx) else {
        return Vec::new();
    };
    let lookup = column_lookup(header);
    let department_col = resolve_column(&lookup, DEPARTMENT_ALIASES);
    let channel_col = resolve_column(&lookup, CHANNEL_ALIASES);
    let branch_col = resolve_column(&lookup, BRANCH_ALIASES);
    let manager_col = resolve_column(&lookup, MANAGER_ALIASES);

    let chart_department: HashMap<String, &str> = org_chart
        .iter()
        .flat_map(|node| {
            node.channels
                .iter()
                .map(move |channel| (normalize_key(channel), node.department.as_str()))
        })
        .collect();

    let mut entities = Vec::new();
    for row in sheet.rows.iter().skip(header_idx + 1) {
        let text = |col: Option<usize>| col.and_then(|idx| row.get(idx)).and_then(Cell::as_text);
        let Some(branch) = text(branch_col) else {
            continue;
        };
        let channel = text(channel_col).unwrap_or_else(|| UNASSIGNED.to_string());
        let department = text(department_col)
            .or_else(|| {
                chart_department
                    .get(&normalize_key(&channel))
                    .map(|d| d.to_string())
            })
            .unwrap_or_else(|| UNASSIGNED.to_string());

        entities.push(OrgEntity {
            department,
            channel,
            branch,
            manager: text(manager_col),
        });
    }

    debug!(file = %sheet.file_name, entries = entities.len(), "花名册解析完成");
    entities
}

/// 每次生成报表前由花名册建立的查找索引
#[derive(Debug, Default)]
pub struct RosterIndex<'a> {
    by_branch: HashMap<String, &'a OrgEntity>,
    channel_department: HashMap<String, String>,
    manager_department: HashMap<String, String>,
    branches_by_channel: BTreeMap<String, BTreeSet<String>>,
    branches_by_member: BTreeMap<(String, String), BTreeSet<String>>,
    departments: BTreeSet<String>,
    conflicts: usize,
}

impl<'a> RosterIndex<'a> {
    /// 同一网点出现多次且上级不一致时保留第一条，并计入冲突数
    pub fn build(roster: &'a [OrgEntity]) -> Self {
        let mut index = RosterIndex::default();
        for entity in roster {
            let key = normalize_key(&entity.branch);
            if let Some(existing) = index.by_branch.get(&key) {
                if existing.channel != entity.channel || existing.department != entity.department {
                    warn!(
                        branch = %entity.branch,
                        kept = %format!("{}/{}", existing.department, existing.channel),
                        ignored = %format!("{}/{}", entity.department, entity.channel),
                        "花名册中网点归属冲突"
                    );
                    index.conflicts += 1;
                }
                continue;
            }
            index.by_branch.insert(key, entity);

            index
                .channel_department
                .entry(normalize_key(&entity.channel))
                .or_insert_with(|| entity.department.clone());
            index
                .branches_by_channel
                .entry(entity.channel.clone())
                .or_default()
                .insert(entity.branch.clone());
            index.departments.insert(entity.department.clone());

            if let Some(manager) = &entity.manager {
                index
                    .manager_department
                    .entry(manager.clone())
                    .or_insert_with(|| entity.department.clone());
                index
                    .branches_by_member
                    .entry((entity.department.clone(), manager.clone()))
                    .or_default()
                    .insert(entity.branch.clone());
            }
        }
        index
    }

    pub fn branch(&self, branch: &str) -> Option<&'a OrgEntity> {
        self.by_branch.get(&normalize_key(branch)).copied()
    }

    pub fn channel_department(&self, channel: &str) -> Option<&str> {
        self.channel_department
            .get(&normalize_key(channel))
            .map(String::as_str)
    }

    pub fn manager_department(&self, manager: &str) -> Option<&str> {
        self.manager_department.get(manager).map(String::as_str)
    }

    pub fn branches_of_channel(&self, channel: &str) -> Option<&BTreeSet<String>> {
        self.branches_by_channel.get(channel)
    }

    pub fn branches_of_member(&self, department: &str, manager: &str) -> Option<&BTreeSet<String>> {
        self.branches_by_member
            .get(&(department.to_string(), manager.to_string()))
    }

    pub fn channels(&self) -> impl Iterator<Item = &String> {
        self.branches_by_channel.keys()
    }

    pub fn departments(&self) -> impl Iterator<Item = &String> {
        self.departments.iter()
    }

    /// (部门, 客户经理)
    pub fn members(&self) -> impl Iterator<Item = &(String, String)> {
        self.branches_by_member.keys()
    }

    pub fn managers(&self) -> impl Iterator<Item = &String> {
        self.manager_department.keys()
    }

    pub fn conflicts(&self) -> usize {
        self.conflicts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_row(cells: &[&str]) -> Vec<Cell> {
        cells.iter().map(|s| Cell::from(*s)).collect()
    }

    fn entity(department: &str, channel: &str, branch: &str, manager: Option<&str>) -> OrgEntity {
        OrgEntity {
            department: department.to_string(),
            channel: channel.to_string(),
            branch: branch.to_string(),
            manager: manager.map(str::to_string),
        }
    }

    #[test]
    fn parses_roster_and_fills_department_from_org_chart() {
        let sheet = RawSheet::from_rows(
            "花名册.xlsx",
            vec![
                text_row(&["2024 网点花名册"]),
                text_row(&["部门", "渠道", "网点名称", "客户经理"]),
                text_row(&["银保一部", "工行", "工行城东支行", "张三"]),
                text_row(&["", "邮储", "邮储南街所", ""]),
                text_row(&["银保一部", "工行", "", "李四"]),
            ],
        );
        let chart = vec![OrgChartNode {
            department: "银保二部".to_string(),
            channels: vec!["邮储".to_string()],
        }];
        let roster = parse_roster(&sheet, &chart);
        assert_eq!(
            roster,
            vec![
                entity("银保一部", "工行", "工行城东支行", Some("张三")),
                entity("银保二部", "邮储", "邮储南街所", None),
            ]
        );
    }

    #[test]
    fn index_keeps_first_entry_and_counts_conflicts() {
        let roster = vec![
            entity("一部", "工行", "城东支行", Some("张三")),
            entity("二部", "农行", "城东支行", Some("王五")),
            entity("一部", "工行", "城东支行", Some("张三")),
            entity("一部", "工行", "城西支行", Some("张三")),
        ];
        let index = RosterIndex::build(&roster);
        assert_eq!(index.conflicts(), 1);
        assert_eq!(index.branch(" 城东支行").map(|e| e.channel.as_str()), Some("工行"));
        assert_eq!(index.channel_department("工行"), Some("一部"));
        assert_eq!(index.channel_department("农行"), None);
        assert_eq!(index.branches_of_channel("工行").map(BTreeSet::len), Some(2));
        assert_eq!(index.branches_of_member("一部", "张三").map(BTreeSet::len), Some(2));
        assert_eq!(index.manager_department("王五"), None);
    }
}
