use crate::error::Result;
use crate::models::ReferenceTables;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// 从 JSON 文件读取参考表
pub fn load_tables(path: &Path) -> Result<ReferenceTables> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// 保存参考表，目录不存在时创建
pub fn save_tables(path: &Path, tables: &ReferenceTables) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(tables)?;
    fs::write(path, content)?;
    Ok(())
}

/// 可编辑参考表的持有者。
///
/// 读取方拿到的是 `Arc` 快照；编辑时复制一份、修改、递增版本号后整体替换，
/// 所以正在运行的报表只会看到编辑前或编辑后的完整版本。
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    current: RwLock<Arc<ReferenceTables>>,
}

impl SettingsStore {
    /// 打开文件存储；文件不存在时从空表开始
    pub fn open(path: PathBuf) -> Result<Self> {
        let tables = if path.exists() {
            load_tables(&path)?
        } else {
            warn!(path = %path.display(), "参考表文件不存在，使用空表");
            ReferenceTables::default()
        };
        Ok(Self {
            path: Some(path),
            current: RwLock::new(Arc::new(tables)),
        })
    }

    pub fn in_memory(tables: ReferenceTables) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(tables)),
        }
    }

    pub fn snapshot(&self) -> Arc<ReferenceTables> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// 应用一次编辑并持久化，返回新的快照
    pub fn update<F>(&self, edit: F) -> Result<Arc<ReferenceTables>>
    where
        F: FnOnce(&mut ReferenceTables),
    {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = ReferenceTables::clone(&guard);
        edit(&mut next);
        next.version = guard.version + 1;

        if let Some(path) = &self.path {
            save_tables(path, &next)?;
        }
        let next = Arc::new(next);
        *guard = Arc::clone(&next);
        info!(version = next.version, "参考表已更新");
        Ok(next)
    }
}
