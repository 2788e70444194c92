use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

const APP_DIR: &str = "premium-report";
const CONFIG_FILE: &str = "config.json";
const TABLES_FILE: &str = "reference_tables.json";

/// 应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 参考表 JSON 路径
    pub tables_path: String,
    /// 输出目录
    pub output_path: String,
    /// 默认起始月
    pub month_start: u32,
    /// 默认结束月
    pub month_end: u32,
    /// 默认日志级别，RUST_LOG 优先
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tables_path: app_dir().join(TABLES_FILE).to_string_lossy().to_string(),
            output_path: "output".to_string(),
            month_start: 1,
            month_end: 12,
            log_level: "info".to_string(),
        }
    }
}

fn app_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// 获取配置文件路径
pub fn config_path() -> PathBuf {
    app_dir().join(CONFIG_FILE)
}

/// 加载配置，文件缺失或损坏时使用默认值
pub fn load_config() -> AppConfig {
    let path = config_path();
    if !path.exists() {
        return AppConfig::default();
    }
    match fs::read_to_string(&path).map(|content| serde_json::from_str::<AppConfig>(&content)) {
        Ok(Ok(config)) => config,
        Ok(Err(e)) => {
            warn!(path = %path.display(), error = %e, "配置文件格式错误，使用默认配置");
            AppConfig::default()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "读取配置文件失败，使用默认配置");
            AppConfig::default()
        }
    }
}

/// 保存配置
pub fn save_config(config: &AppConfig) -> Result<()> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)?;
    fs::write(&path, content)?;
    Ok(())
}
