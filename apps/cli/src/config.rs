//! CLI configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/lakestore/config.toml`
//! - Windows: `%APPDATA%/lakestore/config.toml`
//!
//! Every field is optional in the file; command-line flags override it and
//! `LAKESTORE_TOKEN` supplies the token when the file has none.

use std::path::{Path, PathBuf};
use std::time::Duration;

use lakestore_protocol::constants::{DEFAULT_API_VERSION, DEFAULT_URL_SUFFIX};
use lakestore_rest::HttpConfig;
use lakestore_transfer::{ClientConfig, DEFAULT_BLOCK_SIZE, DEFAULT_CHUNK_SIZE, default_state_dir};
use serde::{Deserialize, Serialize};

pub const TOKEN_ENV: &str = "LAKESTORE_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Account name; the endpoint is `https://{store_name}.{url_suffix}`.
    #[serde(default)]
    pub store_name: String,

    #[serde(default = "default_url_suffix")]
    pub url_suffix: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Bearer token.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    #[serde(default = "default_block_size")]
    pub block_size: u64,

    /// Worker count; defaults to the available parallelism.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nthreads: Option<usize>,

    /// Limit on a monitored transfer run (0 = no limit).
    #[serde(default)]
    pub timeout_secs: u64,

    /// Where unfinished sessions are kept for `resume`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

fn default_url_suffix() -> String {
    DEFAULT_URL_SUFFIX.into()
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.into()
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_block_size() -> u64 {
    DEFAULT_BLOCK_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_name: String::new(),
            url_suffix: default_url_suffix(),
            api_version: default_api_version(),
            token: String::new(),
            chunk_size: default_chunk_size(),
            block_size: default_block_size(),
            nthreads: None,
            timeout_secs: 0,
            state_dir: None,
        }
    }
}

impl Config {
    /// Loads `path`, or the platform default location. A missing file
    /// yields the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Fills the token from `env_token` when the file did not set one.
    pub fn with_env_token(mut self, env_token: Option<String>) -> Self {
        if self.token.is_empty() {
            if let Some(token) = env_token.filter(|t| !t.is_empty()) {
                self.token = token;
            }
        }
        self
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            store_name: self.store_name.clone(),
            url_suffix: self.url_suffix.clone(),
            api_version: self.api_version.clone(),
            token: self.token.clone(),
            timeout: None,
        }
    }

    pub fn client_config(&self, overwrite: bool) -> ClientConfig {
        let defaults = ClientConfig::default();
        ClientConfig {
            chunk_size: self.chunk_size,
            block_size: self.block_size,
            nthreads: self.nthreads.unwrap_or(defaults.nthreads),
            timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
            overwrite,
            ..defaults
        }
    }

    pub fn state_dir(&self) -> Option<PathBuf> {
        self.state_dir.clone().or_else(default_state_dir)
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("lakestore")
            .join("config.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("lakestore").join("config.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/lakestore/config.toml"))
    }
}
