pub mod list;
pub mod load;
pub mod pull;
pub mod query;
pub mod status;

pub use list::list;
pub use load::load;
pub use pull::pull;
pub use query::{query, QueryArgs};
pub use status::status;

use crate::config::Config;
use crate::inference::{HardwareProfiler, InferenceGateway, OllamaGateway};
use crate::management::ModelResidencyManager;
use crate::Result;
use std::sync::Arc;

fn gateway(config: &Config) -> Result<Arc<dyn InferenceGateway>> {
    Ok(Arc::new(OllamaGateway::from_config(&config.gateway)?))
}

async fn residency(config: &Config) -> Result<ModelResidencyManager> {
    let profile = HardwareProfiler::new().detect();
    Ok(ModelResidencyManager::open(&config.residency, profile, gateway(config)?).await)
}
