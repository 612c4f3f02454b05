//! CLI utilities for binaries
//!
//! Handles configuration path resolution and loading.

use anyhow::Context;
use meshwire::ClientConfig;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable naming the client configuration file
pub const CONFIG_PATH_ENV: &str = "MESHWIRE_CONFIG_PATH";

/// Used when `MESHWIRE_CONFIG_PATH` is unset
pub const DEFAULT_CONFIG_PATH: &str = "config/meshwire.yaml";

/// Load configuration path from environment or use default
///
/// # Examples
/// ```
/// use maya_link::bin_common::config_path_from_env;
///
/// let path = config_path_from_env();
/// assert!(path.to_str().is_some());
/// ```
pub fn config_path_from_env() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|path| !path.is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
        .into()
}

/// Load and validate the client configuration named by the environment
pub fn load_client_config() -> anyhow::Result<ClientConfig> {
    load_client_config_from(config_path_from_env())
}

/// Load and validate the client configuration at `path`
pub fn load_client_config_from(path: impl AsRef<Path>) -> anyhow::Result<ClientConfig> {
    let path = path.as_ref();
    let config = ClientConfig::load(path)
        .with_context(|| format!("Failed to load client configuration from {}", path.display()))?;
    info!("Loaded configuration for {} from {}", config.address(), path.display());
    Ok(config)
}
