// 默认配置常量

pub const DEFAULT_CHECKPOINT_PATH: &str = "ai_memory_state.json";
pub const DEFAULT_PRIMARY_MODEL: &str = "tinyllama";
pub const DEFAULT_PRIMARY_MODEL_SIZE_GB: f64 = 0.6;
/// 未设置预算时，为操作系统保留 20% 内存
pub const DEFAULT_MEMORY_FRACTION: f64 = 0.8;

pub const DEFAULT_CACHE_CAPACITY: usize = 1000;
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.85;
pub const DEFAULT_EMBEDDING_DIM: usize = 512;

pub const DEFAULT_MAX_BATCH_SIZE: usize = 8;
pub const DEFAULT_MAX_BATCH_WAIT_MS: u64 = 500;
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;
pub const DEFAULT_REFIT_INTERVAL: usize = 10;
pub const DEFAULT_MIN_SAMPLES: usize = 10;

pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:11434";
pub const DEFAULT_CHAT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_PULL_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_LIST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a business analytics assistant. Answer concisely \
    using the provided context, and end with a line 'Confidence: <0-1>'.";

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOG_FORMAT: &str = "json";

pub const ENV_PREFIX: &str = "FERROUSMOAT";
