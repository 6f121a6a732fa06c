//! Configuration management for maildew.

use std::fs;
use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::paths::{APP_NAME, AppPaths};
use crate::repo::DEFAULT_BANDWIDTH;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Local store settings.
    pub storage: StorageConfig,
    /// Remote sync settings.
    pub sync: SyncConfig,
}

/// Local store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Override data directory for the store.
    pub data_dir: Option<String>,
    /// Keep everything in memory; nothing survives the process.
    pub in_memory: bool,
    /// Row identifiers leased per sequence write.
    pub sequence_bandwidth: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            in_memory: false,
            sequence_bandwidth: DEFAULT_BANDWIDTH,
        }
    }
}

/// Remote sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Mailbox names buffered between the listing task and the pipeline.
    pub list_buffer: usize,
    /// Envelopes buffered between the fetch task and the pipeline.
    pub fetch_buffer: usize,
    /// Port used when the server address is derived from the username.
    pub imap_port: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            list_buffer: 10,
            fetch_buffer: 10,
            imap_port: 993,
        }
    }
}

impl AppConfig {
    /// Load configuration from paths with environment overlay.
    pub fn load(paths: &AppPaths) -> Result<Self> {
        let env_prefix = env_prefix();
        let defaults = AppConfig::default();
        let mut builder = Config::builder()
            .add_source(
                File::from(paths.global_config.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                File::from(paths.local_config.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(Environment::with_prefix(&env_prefix).separator("__"));

        if let Some(cli_cfg) = &paths.cli_config {
            builder = builder.add_source(
                File::from(cli_cfg.as_path())
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder
            .set_default("storage.in_memory", defaults.storage.in_memory)?
            .set_default("storage.sequence_bandwidth", defaults.storage.sequence_bandwidth)?
            .set_default("sync.list_buffer", defaults.sync.list_buffer as u64)?
            .set_default("sync.fetch_buffer", defaults.sync.fetch_buffer as u64)?
            .set_default("sync.imap_port", u64::from(defaults.sync.imap_port))?;

        let config: AppConfig = builder.build()?.try_deserialize()?;
        if config.storage.sequence_bandwidth == 0 {
            return Err(Error::Config(
                "storage.sequence_bandwidth must be greater than zero".into(),
            ));
        }
        Ok(config)
    }

    /// Write default config to a path.
    pub fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("creating config directory {parent:?}: {e}")))?;
        }
        let cfg = AppConfig::default();
        let toml = toml::to_string_pretty(&cfg)
            .map_err(|e| Error::Config(format!("serializing default config: {e}")))?;
        let mut content = String::new();
        content.push_str("# maildew configuration\n");
        content.push_str("# Place this file at $XDG_CONFIG_HOME/maildew/config.toml\n\n");
        content.push_str(&toml);
        content.push('\n');
        fs::write(path, content)
            .map_err(|e| Error::Config(format!("writing config file to {}: {e}", path.display())))
    }

    /// Ensure default config exists, creating it if necessary.
    pub fn ensure_default(path: &Path) -> Result<()> {
        if path.exists() {
            return Ok(());
        }
        Self::write_default(path)
    }
}

/// Generate environment variable prefix from app name.
fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
