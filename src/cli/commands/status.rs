use super::{gateway, residency};
use crate::api::error::StorageError;
use crate::config::Config;
use crate::Result;

/// 显示硬件、内存预算与模型状态
pub async fn status(config: &Config) -> Result<()> {
    let manager = residency(config).await?;
    let healthy = gateway(config)?.health().await;

    let stats = manager.memory_stats().await;
    let json = serde_json::to_string_pretty(&stats)
        .map_err(|e| StorageError::WriteFailed(format!("Failed to render stats: {}", e)))?;
    println!("{}", json);
    println!(
        "Inference service {}: {}",
        config.gateway.base_url,
        if healthy { "reachable" } else { "unreachable" }
    );

    println!("{:<24} {:>8} {:>10} {:>8} {:>6}", "MODEL", "SIZE GB", "STATUS", "USES", "PRIO");
    for model in manager.descriptors().await {
        println!(
            "{:<24} {:>8.1} {:>10} {:>8} {:>6}",
            model.name,
            model.size_gb,
            format!("{:?}", model.status).to_lowercase(),
            model.usage_count,
            model.priority
        );
    }
    Ok(())
}
