pub mod aggregator;
pub mod config;
pub mod encoding;
pub mod error;
pub mod excel_parser;
pub mod models;
pub mod normalizer;
pub mod report;
pub mod report_writer;
pub mod resolver;
pub mod roster;
pub mod session;
pub mod settings_store;
pub mod sources;

pub use error::ReportError;
pub use models::{MonthRange, ReferenceTables, TransactionRow};
pub use report::{generate_report, AggregatedReport, ReportInputs};
pub use session::{ReportSession, RowEdit, SourceWorkbook};

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use config::{config_path, load_config, save_config, AppConfig};
use settings_store::{save_tables, SettingsStore};
use sources::{load_workbook, load_workbooks, scan_excel_files};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "premium-report", version, about = "保单明细导入与保费多视图报表")]
pub struct Cli {
    /// 日志级别，RUST_LOG 优先
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 读取明细与花名册，生成报表
    Generate(GenerateArgs),
    /// 写出空白参考表和默认配置（已存在则跳过）
    InitTables {
        #[arg(long, value_name = "FILE")]
        tables: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// 保单明细文件，可多次指定
    #[arg(long = "source", value_name = "FILE", num_args = 1..)]
    sources: Vec<PathBuf>,

    /// 递归扫描该目录下的 .xls/.xlsx
    #[arg(long, value_name = "DIR")]
    source_dir: Option<PathBuf>,

    /// 花名册
    #[arg(long, value_name = "FILE")]
    roster: PathBuf,

    /// 当日日报
    #[arg(long, value_name = "FILE")]
    daily: Option<PathBuf>,

    #[arg(long, value_name = "MONTH")]
    start: Option<u32>,

    #[arg(long, value_name = "MONTH")]
    end: Option<u32>,

    /// 参考表 JSON，默认取配置
    #[arg(long, value_name = "FILE")]
    tables: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    json: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    xlsx: Option<PathBuf>,
}

fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("创建目录失败: {}", parent.display()))?;
        }
    }
    Ok(())
}

/// 生成报表
fn generate(args: GenerateArgs, config: &AppConfig) -> anyhow::Result<()> {
    let tables_path = args
        .tables
        .unwrap_or_else(|| PathBuf::from(&config.tables_path));
    let store = SettingsStore::open(tables_path.clone())
        .with_context(|| format!("加载参考表失败: {}", tables_path.display()))?;

    let mut paths = args.sources;
    if let Some(dir) = &args.source_dir {
        if !dir.exists() {
            bail!("明细目录不存在: {}", dir.display());
        }
        let found = scan_excel_files(dir);
        info!(dir = %dir.display(), count = found.len(), "找到 Excel 文件");
        paths.extend(found);
    }
    // 花名册和日报放在同一目录时不作为明细
    paths.retain(|path| path != &args.roster && Some(path) != args.daily.as_ref());

    let sources = load_workbooks(&paths).context("读取保单明细失败")?;
    let roster = load_workbook(&args.roster)
        .with_context(|| format!("读取花名册失败: {}", args.roster.display()))?;
    let daily = args
        .daily
        .as_deref()
        .map(load_workbook)
        .transpose()
        .context("读取日报失败")?;

    let session = ReportSession::ingest(&sources, Some(&roster), daily.as_ref(), store.snapshot())?;
    let start = args.start.unwrap_or(config.month_start);
    let end = args.end.unwrap_or(config.month_end);
    let report = session.generate(start, end, Utc::now())?;

    if !report.summary.reconciliation.balanced {
        warn!("报表核对未通过，请检查汇总页的核对结果");
    }

    let (json_path, xlsx_path) = match (args.json, args.xlsx) {
        (None, None) => {
            let file_name = format!("保费报表_{}-{}月.xlsx", start, end);
            (None, Some(PathBuf::from(&config.output_path).join(file_name)))
        }
        outputs => outputs,
    };

    if let Some(path) = json_path {
        ensure_parent(&path)?;
        let content = serde_json::to_string_pretty(&report).context("序列化报表失败")?;
        fs::write(&path, content).with_context(|| format!("写入失败: {}", path.display()))?;
        info!(path = %path.display(), "已写出 JSON 报表");
    }
    if let Some(path) = xlsx_path {
        ensure_parent(&path)?;
        report_writer::save_report(&report, &path)
            .with_context(|| format!("导出失败: {}", path.display()))?;
        info!(path = %path.display(), "已写出 Excel 报表");
    }

    info!(
        rows = report.summary.raw_rows,
        in_range = report.summary.in_range_rows,
        departments = report.summary.department_rows,
        channels = report.summary.channel_rows,
        "处理完成"
    );
    Ok(())
}

/// 初始化参考表与配置
fn init_tables(tables: Option<PathBuf>, config: &AppConfig) -> anyhow::Result<()> {
    let tables_path = tables.unwrap_or_else(|| PathBuf::from(&config.tables_path));
    if tables_path.exists() {
        info!(path = %tables_path.display(), "参考表已存在，跳过");
    } else {
        save_tables(&tables_path, &ReferenceTables::default())
            .with_context(|| format!("写入参考表失败: {}", tables_path.display()))?;
        info!(path = %tables_path.display(), "已生成空白参考表");
    }

    if !config_path().exists() {
        let config = AppConfig {
            tables_path: tables_path.to_string_lossy().to_string(),
            ..config.clone()
        };
        save_config(&config).context("保存配置失败")?;
        info!(path = %config_path().display(), "已生成默认配置");
    }
    Ok(())
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config();
    init_tracing(cli.log_level.as_deref().unwrap_or(&config.log_level));

    match cli.command {
        Command::Generate(args) => generate(args, &config),
        Command::InitTables { tables } => init_tables(tables, &config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn generate_accepts_repeated_sources() {
        let cli = Cli::try_parse_from([
            "premium-report",
            "generate",
            "--source",
            "a.xlsx",
            "--source",
            "b.xlsx",
            "--roster",
            "花名册.xlsx",
            "--start",
            "3",
            "--end",
            "6",
        ])
        .unwrap();
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.sources, vec![PathBuf::from("a.xlsx"), PathBuf::from("b.xlsx")]);
        assert_eq!(args.start, Some(3));
        assert_eq!(args.end, Some(6));
        assert!(args.json.is_none());
    }

    #[test]
    fn generate_requires_roster() {
        assert!(Cli::try_parse_from(["premium-report", "generate", "--source", "a.xlsx"]).is_err());
    }
}
