use crate::encoding::repair_mojibake;
use crate::error::{ReportError, Result};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::Cursor;
use tracing::debug;

/// 表头只在前 20 行中查找
pub const HEADER_SCAN_ROWS: usize = 20;

/// 与具体表格库无关的单元格
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Cell {
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(_) | Cell::Bool(_) => false,
        }
    }

    /// 去掉首尾空白后的文本，空串视为无值
    pub fn as_text(&self) -> Option<String> {
        let text = match self {
            Cell::Empty => return None,
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(f) => format_number(*f),
            Cell::Bool(b) => b.to_string(),
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// 整数形式的数字不带小数点，保单号之类的列常被存成数字
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::String(s) => Cell::Text(s.clone()),
            Data::Bool(b) => Cell::Bool(*b),
            Data::DateTime(dt) => Cell::Number(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
            Data::Error(_) | Data::Empty => Cell::Empty,
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

impl From<f64> for Cell {
    fn from(f: f64) -> Self {
        Cell::Number(f)
    }
}

impl From<i64> for Cell {
    fn from(i: i64) -> Self {
        Cell::Number(i as f64)
    }
}

/// 工作簿第一个工作表的原始内容
#[derive(Debug, Clone, PartialEq)]
pub struct RawSheet {
    pub file_name: String,
    /// 按工作表行号排列，`rows[i]` 即第 i 行（从 0 开始）
    pub rows: Vec<Vec<Cell>>,
}

impl RawSheet {
    pub fn from_rows(file_name: &str, rows: Vec<Vec<Cell>>) -> Self {
        Self {
            file_name: repair_mojibake(file_name),
            rows,
        }
    }
}

/// 从上传的字节读取第一个工作表
pub fn read_first_sheet(file_name: &str, bytes: &[u8]) -> Result<RawSheet> {
    let file_name = repair_mojibake(file_name);
    let workbook_error = |message: String| ReportError::Workbook {
        file: file_name.clone(),
        message,
    };

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| workbook_error(e.to_string()))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| ReportError::EmptyWorkbook(file_name.clone()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| workbook_error(e.to_string()))?;

    // calamine 的区域从第一个非空行开始，补齐前面的空行，行号与工作表一致
    let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);
    let rows: Vec<Vec<Cell>> = std::iter::repeat_with(Vec::new)
        .take(first_row)
        .chain(range.rows().map(|row| row.iter().map(Cell::from).collect()))
        .collect();

    if rows.iter().all(|row| row.iter().all(Cell::is_blank)) {
        return Err(ReportError::EmptyWorkbook(file_name));
    }

    debug!(file = %file_name, sheet = %sheet_name, first_row, rows = rows.len(), "读取工作表");
    Ok(RawSheet { file_name, rows })
}

/// 表头识别规则：关键列、最少命中数、找不到时的默认行
#[derive(Debug, Clone, Copy)]
pub struct HeaderRule {
    pub keys: &'static [&'static str],
    pub min_matches: usize,
    pub default_row: usize,
}

/// 保单明细（及日报）的关键列；多数导出文件的表头在第 7 行
pub const TRANSACTION_HEADER: HeaderRule = HeaderRule {
    keys: &["保单号", "新约保费", "险种", "银行总行", "保单状态"],
    min_matches: 2,
    default_row: 6,
};

/// 花名册的关键列
pub const ROSTER_HEADER: HeaderRule = HeaderRule {
    keys: &["部门", "渠道", "网点名称", "网点", "客户经理"],
    min_matches: 2,
    default_row: 0,
};

/// 返回第一行命中至少 `min_matches` 个关键列的行号，找不到时返回默认行
pub fn locate_header_row(rows: &[Vec<Cell>], rule: &HeaderRule) -> usize {
    rows.iter()
        .take(HEADER_SCAN_ROWS)
        .enumerate()
        .filter(|(_, row)| row.iter().any(|cell| !cell.is_blank()))
        .find(|(_, row)| {
            let labels: Vec<String> = row.iter().filter_map(header_label).collect();
            let matched = rule
                .keys
                .iter()
                .filter(|key| labels.iter().any(|label| label == *key))
                .count();
            matched >= rule.min_matches
        })
        .map(|(idx, _)| idx)
        .unwrap_or(rule.default_row)
}

/// 表头单元格文本；手工录入的表头可能带乱码
pub fn header_label(cell: &Cell) -> Option<String> {
    cell.as_text().map(|text| repair_mojibake(&text))
}
