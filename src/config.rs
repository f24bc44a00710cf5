use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::TransferError;

pub const DEFAULT_CHUNK_SIZE: usize = 200_000; // 200 KB
pub const MAX_PARALLEL_UPLOADS: usize = 5;
pub const RETRY_LIMIT: u32 = 3;
pub const MAX_PASSES: u32 = 5;
pub const SYNC_CYCLES: usize = 10;
pub const PLAYING_THRESHOLD_SECS: f64 = 1.0;
pub const PAUSED_THRESHOLD_SECS: f64 = 0.05;

/// Top-level configuration file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub transfer: TransferConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the HTTP API, e.g. `https://quiz.example.org/`
    pub base_url: String,
    /// Game socket URL
    pub socket_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/".to_string(),
            socket_url: "ws://localhost:8000/ws".to_string(),
        }
    }
}

/// Tunables for the chunked upload engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub chunk_size: usize,
    pub max_parallel_uploads: usize,
    /// Immediate retries per chunk after the first attempt
    pub retry_limit: u32,
    /// Pool passes over the failed subset, the first pass included
    pub max_passes: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_parallel_uploads: MAX_PARALLEL_UPLOADS,
            retry_limit: RETRY_LIMIT,
            max_passes: MAX_PASSES,
            backoff_base_ms: 250,
            backoff_max_ms: 10_000,
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidConfig("chunk_size must be positive".into()));
        }
        if self.max_parallel_uploads == 0 {
            return Err(TransferError::InvalidConfig(
                "max_parallel_uploads must be positive".into(),
            ));
        }
        if self.max_passes == 0 {
            return Err(TransferError::InvalidConfig("max_passes must be positive".into()));
        }
        Ok(())
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

/// Clock sync and playback alignment settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub cycles: usize,
    pub timeout_ms: u64,
    pub playing_threshold_secs: f64,
    pub paused_threshold_secs: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cycles: SYNC_CYCLES,
            timeout_ms: 10_000,
            playing_threshold_secs: PLAYING_THRESHOLD_SECS,
            paused_threshold_secs: PAUSED_THRESHOLD_SECS,
        }
    }
}

/// Credentials of the current user session, passed explicitly to every
/// network component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub user_session_id: String,
    pub session_token: String,
}

impl SessionContext {
    pub fn new(user_session_id: impl Into<String>, session_token: impl Into<String>) -> Self {
        Self {
            user_session_id: user_session_id.into(),
            session_token: session_token.into(),
        }
    }

    /// Query pairs appended to every request
    pub fn query(&self) -> [(&'static str, &str); 2] {
        [
            ("user-session-id", self.user_session_id.as_str()),
            ("session-token", self.session_token.as_str()),
        ]
    }
}

impl Config {
    /// Load configuration from a TOML file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.transfer.validate()?;
        Ok(config)
    }
}
