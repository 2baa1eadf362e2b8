use thiserror::Error;

/// FerrousMoat 错误类型
#[derive(Debug, Error)]
pub enum FerrousMoatError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// 模型驻留错误
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Model not loaded: {0}")]
    NotLoaded(String),

    #[error(
        "Resource exhausted loading {model}: required {required_gb:.2}GB, available {available_gb:.2}GB"
    )]
    ResourceExhausted {
        model: String,
        required_gb: f64,
        available_gb: f64,
    },

    #[error("Failed to load {model}: {reason}")]
    LoadFailure { model: String, reason: String },
}

/// 推理错误
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Inference failed: {0}")]
    Failed(String),

    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Inference service not available: {0}")]
    Unavailable(String),

    #[error("Request dropped before dispatch")]
    Dropped,
}

/// 存储错误
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Corrupt checkpoint {path}: {reason}")]
    CorruptCheckpoint { path: String, reason: String },

    #[error("Failed to read checkpoint: {0}")]
    ReadFailed(String),

    #[error("Failed to write checkpoint: {0}")]
    WriteFailed(String),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    LoadFailed(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, FerrousMoatError>;

impl From<reqwest::Error> for InferenceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            InferenceError::Failed(format!("request timed out: {}", e))
        } else if e.is_connect() {
            InferenceError::Unavailable(e.to_string())
        } else {
            InferenceError::Failed(e.to_string())
        }
    }
}
