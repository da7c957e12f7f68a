pub mod budget;
pub mod classify;
pub mod compress;
pub mod config_cmd;

use std::path::Path;

use aegis_config::{ConfigError, EngineConfig};

/// `~/.aegis/config.toml` with env overrides, or `path` when given.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Loading config");
            let mut config = EngineConfig::load_from(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok())?;
            config.validate()?;
            Ok(config)
        }
        None => EngineConfig::load(),
    }
}
