use crate::config::defaults::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// 主配置结构
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub residency: ResidencyConfig,
    pub cache: CacheConfig,
    pub batching: BatchingConfig,
    pub gateway: GatewayConfig,
    pub logging: LoggingConfig,
    pub privacy: PrivacyConfig,
}

/// 模型目录条目
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    pub size_gb: f64,
    /// 数值越小越重要
    pub priority: u32,
}

/// 模型驻留配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResidencyConfig {
    /// 内存预算覆盖值（GB），None 表示按硬件探测结果计算
    pub memory_budget_gb: Option<f64>,
    pub checkpoint_path: PathBuf,
    pub primary_model: String,
    /// 加载前先调用 pull 确保远端已注册模型
    pub auto_pull: bool,
    pub catalog: Vec<CatalogEntry>,
    /// 任务提示 -> 首选模型
    pub task_models: HashMap<String, String>,
}

/// 语义缓存配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub similarity_threshold: f32,
    pub embedding_dim: usize,
    /// 语义匹配仅在相同上下文指纹的条目之间进行
    pub require_same_context: bool,
}

/// 自适应批处理配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub max_batch_size: usize,
    pub max_batch_wait_ms: u64,
    pub history_capacity: usize,
    pub refit_interval: usize,
    pub min_samples: usize,
}

/// 推理服务配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub chat_timeout_secs: u64,
    pub pull_timeout_secs: u64,
    pub list_timeout_secs: u64,
    pub system_prompt: String,
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: Vec<String>,
}

/// 查询变换配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PrivacyConfig {
    /// 在缓存与推理前脱敏查询中的个人信息
    pub redact_queries: bool,
}

impl Default for ResidencyConfig {
    fn default() -> Self {
        Self {
            memory_budget_gb: None,
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
            primary_model: DEFAULT_PRIMARY_MODEL.to_string(),
            auto_pull: false,
            catalog: vec![CatalogEntry {
                name: DEFAULT_PRIMARY_MODEL.to_string(),
                size_gb: DEFAULT_PRIMARY_MODEL_SIZE_GB,
                priority: 1,
            }],
            task_models: HashMap::new(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            require_same_context: false,
        }
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_batch_wait_ms: DEFAULT_MAX_BATCH_WAIT_MS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            refit_interval: DEFAULT_REFIT_INTERVAL,
            min_samples: DEFAULT_MIN_SAMPLES,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GATEWAY_URL.to_string(),
            chat_timeout_secs: DEFAULT_CHAT_TIMEOUT_SECS,
            pull_timeout_secs: DEFAULT_PULL_TIMEOUT_SECS,
            list_timeout_secs: DEFAULT_LIST_TIMEOUT_SECS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: DEFAULT_LOG_FORMAT.to_string(),
            output: vec!["stdout".to_string()],
        }
    }
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            redact_queries: true,
        }
    }
}

impl BatchingConfig {
    pub fn max_batch_wait(&self) -> Duration {
        Duration::from_millis(self.max_batch_wait_ms)
    }
}

impl GatewayConfig {
    pub fn chat_timeout(&self) -> Duration {
        Duration::from_secs(self.chat_timeout_secs)
    }
}

impl Config {
    /// 从文件加载配置
    pub fn from_file(path: &str) -> crate::Result<Self> {
        crate::config::loader::load_from_file(path)
    }

    /// 从环境变量加载配置
    pub fn from_env() -> crate::Result<Self> {
        crate::config::loader::load_from_env()
    }

    /// 校验配置取值
    pub fn validate(&self) -> crate::Result<()> {
        use crate::api::error::ConfigError;

        if let Some(budget) = self.residency.memory_budget_gb {
            if budget.is_nan() || budget <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "residency.memory_budget_gb must be positive, got {}",
                    budget
                ))
                .into());
            }
        }
        if let Some(entry) = self
            .residency
            .catalog
            .iter()
            .find(|e| e.size_gb.is_nan() || e.size_gb <= 0.0 || e.name.is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "invalid catalog entry '{}' ({}GB)",
                entry.name, entry.size_gb
            ))
            .into());
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid("cache.capacity must be at least 1".into()).into());
        }
        if !(0.0..=1.0).contains(&self.cache.similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "cache.similarity_threshold must be within [0, 1], got {}",
                self.cache.similarity_threshold
            ))
            .into());
        }
        if self.cache.embedding_dim == 0 {
            return Err(ConfigError::Invalid("cache.embedding_dim must be at least 1".into()).into());
        }
        if self.batching.max_batch_size == 0 {
            return Err(
                ConfigError::Invalid("batching.max_batch_size must be at least 1".into()).into(),
            );
        }
        if self.batching.history_capacity == 0 || self.batching.refit_interval == 0 {
            return Err(ConfigError::Invalid(
                "batching.history_capacity and batching.refit_interval must be at least 1".into(),
            )
            .into());
        }
        Ok(())
    }
}
