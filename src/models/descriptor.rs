//! 模型描述与状态机
//!
//! 每个目录条目对应一个 [`ModelDescriptor`]，状态按
//! `Unloaded → Loading → Loaded → Unloading → Unloaded` 循环。

use crate::api::error::ModelError;
use crate::config::CatalogEntry;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 模型驻留状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    /// 未加载
    Unloaded,
    /// 加载中
    Loading,
    /// 已加载
    Loaded,
    /// 卸载中
    Unloading,
}

impl ModelStatus {
    /// 是否为过渡状态
    pub fn is_transient(self) -> bool {
        matches!(self, ModelStatus::Loading | ModelStatus::Unloading)
    }
}

/// 模型描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// 模型名称（唯一）
    pub name: String,
    /// 声明的内存占用（GB）
    pub size_gb: f64,
    pub status: ModelStatus,
    /// 最后使用时间
    pub last_used: Option<DateTime<Utc>>,
    /// 最近一次加载耗时（秒）
    pub load_duration_seconds: f64,
    pub usage_count: u64,
    /// 数值越小越重要
    pub priority: u32,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, size_gb: f64, priority: u32) -> Self {
        Self {
            name: name.into(),
            size_gb,
            status: ModelStatus::Unloaded,
            last_used: None,
            load_duration_seconds: 0.0,
            usage_count: 0,
            priority,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.status == ModelStatus::Loaded
    }

    /// 记录一次使用
    pub fn touch(&mut self) {
        self.last_used = Some(Utc::now());
        self.usage_count += 1;
    }

    /// 开始加载流程
    pub fn begin_load(&mut self) -> Result<()> {
        if self.status != ModelStatus::Unloaded {
            return Err(ModelError::LoadFailure {
                model: self.name.clone(),
                reason: format!("cannot load from {:?}", self.status),
            }
            .into());
        }
        self.status = ModelStatus::Loading;
        Ok(())
    }

    /// 完成加载流程
    pub fn finish_load(&mut self, elapsed: Duration) {
        self.status = ModelStatus::Loaded;
        self.load_duration_seconds = elapsed.as_secs_f64();
        self.touch();
    }

    /// 加载失败，回到未加载状态
    pub fn abort_load(&mut self) {
        self.status = ModelStatus::Unloaded;
    }

    /// 开始卸载流程
    pub fn begin_unload(&mut self) -> Result<()> {
        if self.status != ModelStatus::Loaded {
            return Err(ModelError::NotLoaded(self.name.clone()).into());
        }
        self.status = ModelStatus::Unloading;
        Ok(())
    }

    /// 完成卸载流程
    pub fn finish_unload(&mut self) {
        self.status = ModelStatus::Unloaded;
    }
}

impl From<&CatalogEntry> for ModelDescriptor {
    fn from(entry: &CatalogEntry) -> Self {
        Self::new(entry.name.clone(), entry.size_gb, entry.priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut model = ModelDescriptor::new("tinyllama", 0.6, 1);
        assert_eq!(model.status, ModelStatus::Unloaded);

        model.begin_load().unwrap();
        assert_eq!(model.status, ModelStatus::Loading);
        assert!(model.begin_load().is_err());

        model.finish_load(Duration::from_millis(1500));
        assert!(model.is_loaded());
        assert_eq!(model.usage_count, 1);
        assert!(model.last_used.is_some());
        assert!((model.load_duration_seconds - 1.5).abs() < 1e-9);

        model.begin_unload().unwrap();
        assert_eq!(model.status, ModelStatus::Unloading);
        model.finish_unload();
        assert_eq!(model.status, ModelStatus::Unloaded);
        assert!(model.begin_unload().is_err());
    }

    #[test]
    fn test_abort_load() {
        let mut model = ModelDescriptor::new("phi3", 2.3, 2);
        model.begin_load().unwrap();
        model.abort_load();
        assert_eq!(model.status, ModelStatus::Unloaded);
        assert_eq!(model.usage_count, 0);
    }
}
