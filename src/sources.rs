use crate::error::Result;
use crate::session::SourceWorkbook;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// 扫描目录中的所有 Excel 文件，按路径排序
pub fn scan_excel_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|entry| entry.into_path())
        .filter(|path| is_excel_file(path))
        .collect();
    files.sort();
    debug!(dir = %dir.display(), count = files.len(), "扫描 Excel 文件");
    files
}

fn is_excel_file(path: &Path) -> bool {
    let is_excel = path
        .extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            ext == "xls" || ext == "xlsx"
        })
        .unwrap_or(false);
    // 跳过 Office 临时文件
    let is_temp = path
        .file_name()
        .map(|name| name.to_string_lossy().starts_with("~$"))
        .unwrap_or(false);
    is_excel && !is_temp
}

/// 读取文件内容，文件名取自路径
pub fn load_workbook(path: &Path) -> Result<SourceWorkbook> {
    let bytes = fs::read(path)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(SourceWorkbook { file_name, bytes })
}

pub fn load_workbooks(paths: &[PathBuf]) -> Result<Vec<SourceWorkbook>> {
    paths.iter().map(|path| load_workbook(path)).collect()
}
