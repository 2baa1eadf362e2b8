//! 驻留状态检查点
//!
//! JSON 对象，键为模型名称，值为
//! `{sizeGB, lastUsed, loadDurationSeconds, usageCount, priority, status}`。

use crate::api::error::StorageError;
use crate::models::{ModelDescriptor, ModelStatus};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// 检查点中的单个模型记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    #[serde(rename = "sizeGB")]
    pub size_gb: f64,
    pub last_used: Option<DateTime<Utc>>,
    pub load_duration_seconds: f64,
    pub usage_count: u64,
    pub priority: u32,
    pub status: ModelStatus,
}

/// 检查点内容
pub type Checkpoint = BTreeMap<String, CheckpointRecord>;

impl From<&ModelDescriptor> for CheckpointRecord {
    fn from(model: &ModelDescriptor) -> Self {
        Self {
            size_gb: model.size_gb,
            last_used: model.last_used,
            load_duration_seconds: model.load_duration_seconds,
            usage_count: model.usage_count,
            priority: model.priority,
            status: model.status,
        }
    }
}

impl CheckpointRecord {
    pub fn into_descriptor(self, name: String) -> ModelDescriptor {
        ModelDescriptor {
            name,
            size_gb: self.size_gb,
            status: self.status,
            last_used: self.last_used,
            load_duration_seconds: self.load_duration_seconds,
            usage_count: self.usage_count,
            priority: self.priority,
        }
    }
}

/// 检查点文件存储
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取检查点
    ///
    /// 文件不存在返回 `Ok(None)`，无法解析返回 `StorageError::CorruptCheckpoint`。
    pub async fn load(&self) -> Result<Option<Checkpoint>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::ReadFailed(format!(
                    "Failed to read checkpoint {}: {}",
                    self.path.display(),
                    e
                ))
                .into())
            }
        };

        let checkpoint: Checkpoint =
            serde_json::from_str(&content).map_err(|e| StorageError::CorruptCheckpoint {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;

        Ok(Some(checkpoint))
    }

    /// 写入检查点（先写临时文件再重命名）
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::WriteFailed(format!("Failed to create checkpoint directory: {}", e))
            })?;
        }

        let content = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| StorageError::WriteFailed(format!("Failed to serialize checkpoint: {}", e)))?;

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("Failed to write checkpoint: {}", e)))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("Failed to replace checkpoint: {}", e)))?;

        tracing::debug!("Checkpoint saved to {}", self.path.display());
        Ok(())
    }
}
