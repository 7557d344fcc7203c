//! Server configuration loaded from JSON with per-field defaults.
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Whether sessions share one tally or each start from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TallyScope {
    /// Every session owns a fresh tally
    #[default]
    Session,
    /// All sessions feed one process-wide tally
    Process,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("tick_interval_ms must be positive (got {0})")]
    TickInterval(i64),
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("sheet_name `{0}` is longer than 31 characters or contains []:*?/\\")]
    SheetName(String),
    #[error("http_addr and live_addr must differ (both {0})")]
    SharedAddr(SocketAddr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_http_addr")]
    pub http_addr: SocketAddr,
    #[serde(default = "ServerConfig::default_live_addr")]
    pub live_addr: SocketAddr,
    #[serde(default = "ServerConfig::default_tick_interval_ms")]
    pub tick_interval_ms: i64,
    #[serde(default = "ServerConfig::default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "ServerConfig::default_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "ServerConfig::default_sheet_name")]
    pub sheet_name: String,
    #[serde(default = "ServerConfig::default_landing_page")]
    pub landing_page: PathBuf,
    /// Text sent in the `info` event; defaults to the download URL.
    #[serde(default)]
    pub info: Option<String>,
    #[serde(default = "ServerConfig::default_progress_events")]
    pub progress_events: bool,
    #[serde(default)]
    pub scope: TallyScope,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: Self::default_http_addr(),
            live_addr: Self::default_live_addr(),
            tick_interval_ms: Self::default_tick_interval_ms(),
            output_dir: Self::default_output_dir(),
            file_prefix: Self::default_file_prefix(),
            sheet_name: Self::default_sheet_name(),
            landing_page: Self::default_landing_page(),
            info: None,
            progress_events: Self::default_progress_events(),
            scope: TallyScope::default(),
            seed: None,
        }
    }
}

impl ServerConfig {
    fn default_http_addr() -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], 4000))
    }

    fn default_live_addr() -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], 4001))
    }

    const fn default_tick_interval_ms() -> i64 {
        5000
    }

    fn default_output_dir() -> PathBuf {
        PathBuf::from(".")
    }

    fn default_file_prefix() -> String {
        "wheeltally".to_string()
    }

    fn default_sheet_name() -> String {
        "シート1".to_string()
    }

    fn default_landing_page() -> PathBuf {
        PathBuf::from("assets/index.html")
    }

    const fn default_progress_events() -> bool {
        true
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("invalid server configuration JSON")
    }

    /// Load from a file, or return the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms <= 0 {
            return Err(ConfigError::TickInterval(self.tick_interval_ms));
        }
        if self.file_prefix.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "file_prefix",
            });
        }
        if self.sheet_name.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "sheet_name",
            });
        }
        if self.sheet_name.chars().count() > 31
            || self
                .sheet_name
                .chars()
                .any(|c| matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        {
            return Err(ConfigError::SheetName(self.sheet_name.clone()));
        }
        if self.http_addr == self.live_addr {
            return Err(ConfigError::SharedAddr(self.http_addr));
        }
        Ok(())
    }

    /// Text for the `info` event at session start.
    #[must_use]
    pub fn info_text(&self) -> String {
        self.info.clone().unwrap_or_else(|| {
            let host = if self.http_addr.ip().is_unspecified() {
                "localhost".to_string()
            } else {
                self.http_addr.ip().to_string()
            };
            format!("http://{host}:{}/latest", self.http_addr.port())
        })
    }
}
