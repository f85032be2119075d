//! Configuration loading for TinyHive.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Get the TinyHive home directory (~/.tinyhive).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".tinyhive"))
}

/// Get the config file path.
pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("config.json"))
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<FabricConfig> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Config file not found at {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let config: FabricConfig = serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    config.validate()?;

    tracing::debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Load ~/.tinyhive/config.json or return defaults if it is missing or invalid.
pub fn load_config_or_default() -> FabricConfig {
    get_config_path()
        .and_then(|path| load_config(&path))
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            FabricConfig::default()
        })
}

/// Fabric-wide settings. Every field has a default.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FabricConfig {
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Events buffered per subscriber before the slowest starts losing them.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_fail_on_error")]
    pub fail_on_error: bool,

    #[serde(default)]
    pub task_timeout_ms: Option<u64>,

    /// TTL stamped on messages sent without one.
    #[serde(default)]
    pub default_ttl_secs: Option<u64>,

    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_rpc_timeout_ms() -> u64 {
    30_000
}

fn default_event_capacity() -> usize {
    crate::events::DEFAULT_EVENT_CAPACITY
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_fail_on_error() -> bool {
    true
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: default_rpc_timeout_ms(),
            event_capacity: default_event_capacity(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            fail_on_error: default_fail_on_error(),
            task_timeout_ms: None,
            default_ttl_secs: None,
            log_dir: None,
        }
    }
}

impl FabricConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rpc_timeout_ms == 0 {
            return Err(Error::Config("rpc_timeout_ms must be positive".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be positive".to_string()));
        }
        if self.task_timeout_ms == Some(0) {
            return Err(Error::Config(
                "task_timeout_ms must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }
}
