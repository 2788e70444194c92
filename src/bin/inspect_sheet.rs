// 调试工具 - 查看 Excel 结构与表头识别结果
use anyhow::Context;
use clap::Parser;
use premium_report_lib::excel_parser::{
    header_label, locate_header_row, read_first_sheet, HEADER_SCAN_ROWS, ROSTER_HEADER,
    TRANSACTION_HEADER,
};
use premium_report_lib::normalizer::column_lookup;
use premium_report_lib::sources::load_workbook;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "inspect-sheet", about = "打印工作表前几行和识别到的表头")]
struct Args {
    /// 要查看的工作簿
    file: PathBuf,

    /// 按花名册的表头规则识别
    #[arg(long)]
    roster: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let workbook = load_workbook(&args.file)
        .with_context(|| format!("无法打开文件: {}", args.file.display()))?;
    let sheet = read_first_sheet(&workbook.file_name, &workbook.bytes)?;

    println!("文件: {}", sheet.file_name);
    println!("行数: {}", sheet.rows.len());

    println!("\n前 {} 行数据：", HEADER_SCAN_ROWS);
    for (idx, row) in sheet.rows.iter().take(HEADER_SCAN_ROWS).enumerate() {
        let cells: Vec<String> = row
            .iter()
            .map(|cell| cell.as_text().unwrap_or_default())
            .collect();
        println!("行 {}: {:?}", idx, cells);
    }

    let rule = if args.roster {
        &ROSTER_HEADER
    } else {
        &TRANSACTION_HEADER
    };
    let header_idx = locate_header_row(&sheet.rows, rule);
    println!("\n表头行: {}", header_idx);

    let Some(header) = sheet.rows.get(header_idx) else {
        println!("表头行超出数据范围");
        return Ok(());
    };
    let mut columns: Vec<(String, usize)> = column_lookup(header).into_iter().collect();
    columns.sort_by_key(|(_, col)| *col);
    for (label, col) in columns {
        let original = header.get(col).and_then(header_label).unwrap_or_default();
        println!("  Col {}: {} ({})", col, original, label);
    }
    Ok(())
}
