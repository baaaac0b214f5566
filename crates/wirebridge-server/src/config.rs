//! Server configuration.
//!
//! Values come from an optional TOML file, then command-line flags and their
//! environment variables on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    /// Shown by `GET /` and in the startup banner.
    pub title: String,
    /// Verbose logging and unredacted internal errors.
    pub debug: bool,
    /// Where to write the generated TypeScript client, if anywhere.
    pub generate_ts: Option<PathBuf>,
    pub channel_capacity: usize,
    pub attach_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            title: "wirebridge".to_string(),
            debug: false,
            generate_ts: None,
            channel_capacity: wirebridge_core::DEFAULT_CHANNEL_CAPACITY,
            attach_timeout_secs: wirebridge_core::DEFAULT_ATTACH_TIMEOUT.as_secs(),
        }
    }
}

impl BridgeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_secs(self.attach_timeout_secs)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Log filter directive for `target`, e.g. `kitchen_sink=info`.
    pub fn log_directive(&self, target: &str) -> String {
        let level = if self.debug { "debug" } else { "info" };
        format!("{target}={level}")
    }
}

/// Flags shared by every bridge binary. Flatten into a `clap::Parser`.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct BridgeArgs {
    /// TOML config file.
    #[arg(long, env = "WIREBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,
    #[arg(long, env = "WIREBRIDGE_HOST")]
    pub host: Option<String>,
    #[arg(long, env = "WIREBRIDGE_PORT")]
    pub port: Option<u16>,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub debug: bool,
    /// Write the TypeScript client here on startup and on reload.
    #[arg(long, env = "WIREBRIDGE_GENERATE_TS")]
    pub generate_ts: Option<PathBuf>,
}

impl BridgeArgs {
    pub fn resolve(&self) -> Result<BridgeConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load(path)?,
            None => BridgeConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(title) = &self.title {
            config.title = title.clone();
        }
        if self.debug {
            config.debug = true;
        }
        if let Some(path) = &self.generate_ts {
            config.generate_ts = Some(path.clone());
        }
        Ok(config)
    }
}
