use thiserror::Error;

/// 报表生成的致命错误；单行问题不走这里，只计数
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("缺少必需的源文件: {0}")]
    MissingSource(String),

    #[error("工作簿为空: {0}")]
    EmptyWorkbook(String),

    #[error("无法读取工作簿 {file}: {message}")]
    Workbook { file: String, message: String },

    #[error("月份范围无效: {start}-{end}，要求 1 ≤ 起始月 ≤ 结束月 ≤ 12")]
    InvalidMonthRange { start: u32, end: u32 },

    #[error("数据行不存在: {0}")]
    RowIndex(usize),

    #[error("文件读写失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("参考表格式错误: {0}")]
    SettingsFormat(#[from] serde_json::Error),

    #[error("导出报表失败: {0}")]
    Export(#[from] rust_xlsxwriter::XlsxError),
}

pub type Result<T> = std::result::Result<T, ReportError>;
