//! Where maildew keeps its configuration and its store.

use std::env;
use std::path::PathBuf;

use crate::config::StorageConfig;
use crate::error::{Error, Result};

/// Directory and environment prefix name.
pub const APP_NAME: &str = "maildew";

/// File name of the store inside the data directory.
pub const DATABASE_FILE: &str = "maildew.db";

const CONFIG_FILE: &str = "config.toml";

/// Config files in precedence order, plus the default store directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// `$XDG_CONFIG_HOME/maildew/config.toml`
    pub global_config: PathBuf,
    /// `config.toml` in the working directory
    pub local_config: PathBuf,
    /// Passed with `--config`; must exist when set
    pub cli_config: Option<PathBuf>,
    /// `$XDG_DATA_HOME/maildew`, unless `storage.data_dir` overrides it
    pub data_dir: PathBuf,
}

/// Where the store lives for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    File(PathBuf),
}

impl AppPaths {
    pub fn discover(cli_config: Option<PathBuf>) -> Result<Self> {
        let cwd = env::current_dir()
            .map_err(|e| Error::Path(format!("determining current directory: {e}")))?;
        Ok(Self {
            global_config: default_config_dir()?.join(CONFIG_FILE),
            local_config: cwd.join(CONFIG_FILE),
            cli_config: cli_config.map(expand_path).transpose()?,
            data_dir: default_data_dir()?,
        })
    }

    /// Path of the store file, honouring `storage.data_dir`.
    pub fn database_path(&self, storage: &StorageConfig) -> Result<PathBuf> {
        let dir = match storage.data_dir.as_deref() {
            Some(dir) if !dir.is_empty() => expand_str_path(dir)?,
            _ => self.data_dir.clone(),
        };
        Ok(dir.join(DATABASE_FILE))
    }

    /// Resolve the store for `storage`; `in_memory` wins over any directory.
    pub fn store_location(&self, storage: &StorageConfig) -> Result<StoreLocation> {
        if storage.in_memory {
            return Ok(StoreLocation::Memory);
        }
        self.database_path(storage).map(StoreLocation::File)
    }
}

/// Expand shell variables and tilde in a path.
pub fn expand_path(path: PathBuf) -> Result<PathBuf> {
    match path.to_str() {
        Some(text) => expand_str_path(text),
        None => Ok(path),
    }
}

/// Expand shell variables and tilde in a path string.
pub fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded =
        shellexpand::full(text).map_err(|e| Error::Path(format!("expanding path: {e}")))?;
    Ok(PathBuf::from(expanded.into_owned()))
}

pub fn default_config_dir() -> Result<PathBuf> {
    app_dir("XDG_CONFIG_HOME", dirs::config_dir(), &[".config"])
        .ok_or_else(|| Error::Path("unable to determine configuration directory".into()))
}

pub fn default_data_dir() -> Result<PathBuf> {
    app_dir("XDG_DATA_HOME", dirs::data_dir(), &[".local", "share"])
        .ok_or_else(|| Error::Path("unable to determine data directory".into()))
}

/// `$var/maildew`, else `platform/maildew`, else `~/<home_rel>/maildew`.
fn app_dir(var: &str, platform: Option<PathBuf>, home_rel: &[&str]) -> Option<PathBuf> {
    env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or(platform)
        .or_else(|| dirs::home_dir().map(|home| home_rel.iter().fold(home, |p, c| p.join(c))))
        .map(|base| base.join(APP_NAME))
}
