//! Configuration loading and merging logic.

use std::path::PathBuf;

use super::{Config, Settings};

/// Environment variable naming a config file when `--config` is not given.
const CONFIG_ENV: &str = "QBROKER_CONFIG";

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides `QBROKER_CONFIG`).
    pub config_path: Option<PathBuf>,
}

/// Load settings: config file first, then environment overrides.
pub fn load_settings_with_options(options: &LoadOptions) -> anyhow::Result<Settings> {
    let path = options
        .config_path
        .clone()
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    let config = match path {
        Some(path) => {
            tracing::debug!("Loading config from {}", path.display());
            Config::load(&path)?
        }
        None => Config::default(),
    };

    let mut settings = Settings::from_config(config);
    settings.apply_env(|name| std::env::var(name).ok());
    Ok(settings)
}
