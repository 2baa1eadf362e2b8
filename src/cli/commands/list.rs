use super::gateway;
use crate::config::Config;
use crate::Result;

/// 列出推理服务上的模型
pub async fn list(config: &Config) -> Result<()> {
    tracing::info!("Listing models on {}", config.gateway.base_url);

    let models = gateway(config)?.list().await?;
    if models.is_empty() {
        println!("No models available.");
    }
    for model in models {
        println!("{}", model);
    }
    Ok(())
}
