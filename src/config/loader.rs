use crate::Result;
use crate::api::error::ConfigError;
use crate::config::defaults::ENV_PREFIX;
use crate::config::settings::Config;
use config::{Config as ConfigBuilder, Environment, File};

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

/// 从文件加载配置
pub fn load_from_file(path: &str) -> Result<Config> {
    let config = ConfigBuilder::builder()
        .add_source(File::with_name(path))
        .add_source(env_source())
        .build()
        .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

    finish(config)
}

/// 从环境变量加载配置
pub fn load_from_env() -> Result<Config> {
    let config = ConfigBuilder::builder()
        .add_source(env_source())
        .build()
        .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

    finish(config)
}

fn finish(config: ConfigBuilder) -> Result<Config> {
    let config: Config = config
        .try_deserialize()
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
