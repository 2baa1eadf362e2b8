use super::residency;
use crate::config::Config;
use crate::Result;

/// 在内存预算内加载模型，必要时驱逐其他模型
pub async fn load(config: &Config, model: &str) -> Result<()> {
    let manager = residency(config).await?;
    manager.ensure_loaded(model).await?;

    let stats = manager.memory_stats().await;
    println!(
        "Loaded {} ({:.1}/{:.1}GB in use)",
        model, stats.used_gb, stats.budget_gb
    );
    Ok(())
}
