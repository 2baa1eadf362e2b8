use super::gateway;
use crate::api::error::InferenceError;
use crate::config::Config;
use crate::Result;

/// 拉取模型
pub async fn pull(config: &Config, model: &str) -> Result<()> {
    if gateway(config)?.pull(model).await? {
        println!("Pulled {}", model);
        Ok(())
    } else {
        Err(InferenceError::Failed(format!("pull of {} was rejected", model)).into())
    }
}
