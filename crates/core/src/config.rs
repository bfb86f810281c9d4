//! Application configuration.
//!
//! Values come from the built-in defaults, then an optional
//! `~/.config/gamekeep/config.json`, then `GAMEKEEP_*` environment variables.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::vault::DEFAULT_COMPRESSION_LEVEL;

/// Directory under the platform config dir holding `config.json`.
pub const CONFIG_DIR: &str = "gamekeep";

/// Prefix for environment overrides, e.g. `GAMEKEEP_VAULT_DIR`.
pub const ENV_PREFIX: &str = "GAMEKEEP";

/// Resolved settings used to wire the checkpoint service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding `games.json` and `checkpoints.json`.
    pub metadata_dir: PathBuf,
    /// Root of the archive vault.
    pub vault_dir: PathBuf,
    /// zstd level used for new archives.
    pub compression_level: i32,
}

impl Default for AppConfig {
    fn default() -> Self {
        let base = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".gamekeep");
        Self::with_root(base)
    }
}

impl AppConfig {
    /// Layout with metadata and vault side by side under `root`.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            metadata_dir: root.join("config"),
            vault_dir: root.join("vault"),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Load configuration from the default file location and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(config_path())
    }

    /// Load configuration from `path` (if present) and the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .with_context(|| format!("failed to read configuration {}", path.display()))?;

        settings
            .try_deserialize()
            .with_context(|| format!("invalid configuration in {}", path.display()))
    }
}

/// Default location of the configuration file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
        .join("config.json")
}

/// Write the default configuration if no file exists yet, returning its path.
pub fn ensure_default_config() -> Result<PathBuf> {
    let path = config_path();
    write_default_config(&path)?;
    Ok(path)
}

fn write_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }

    let serialized = serde_json::to_string_pretty(&AppConfig::default())
        .context("failed to serialize default configuration")?;
    fs::write(path, serialized)
        .with_context(|| format!("failed to write config {}", path.display()))
}
