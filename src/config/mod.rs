pub mod defaults;
pub mod loader;
pub mod settings;

pub use settings::{
    BatchingConfig, CacheConfig, CatalogEntry, Config, GatewayConfig, LoggingConfig,
    PrivacyConfig, ResidencyConfig,
};
