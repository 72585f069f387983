/// Manager configuration
///
/// One file per process, TOML or YAML, every field optional.
use crate::error::{MtsError, MtsResult};
use crate::task::DrainPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_process_name() -> String {
    "mts".to_string()
}

fn default_mailbox_capacity() -> usize {
    64
}

fn default_timeout_ms() -> u64 {
    1000
}

/// Settings for a [`LocalManager`](crate::manager::LocalManager) and the
/// tasks it hosts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Name this process registers under with the global manager
    #[serde(default = "default_process_name")]
    pub process_name: String,

    /// Mailbox capacity for tasks created from this config
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    #[serde(default)]
    pub drain_policy: DrainPolicy,

    /// Per-call timeout on proxy transports
    #[serde(default = "default_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Send proxied Void commands without waiting for the servant
    #[serde(default)]
    pub void_fire_and_forget: bool,

    /// How long a caller waits on a queued VoidReturn command
    #[serde(default = "default_timeout_ms")]
    pub void_return_timeout_ms: u64,

    /// Address the proxy server listens on (e.g. "127.0.0.1:0")
    #[serde(default)]
    pub listen_address: Option<String>,

    /// Address of a standalone global manager (mts_gcm)
    #[serde(default)]
    pub global_manager_address: Option<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            process_name: default_process_name(),
            mailbox_capacity: default_mailbox_capacity(),
            drain_policy: DrainPolicy::default(),
            rpc_timeout_ms: default_timeout_ms(),
            void_fire_and_forget: false,
            void_return_timeout_ms: default_timeout_ms(),
            listen_address: None,
            global_manager_address: None,
        }
    }
}

impl ManagerConfig {
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            ..Self::default()
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn void_return_timeout(&self) -> Duration {
        Duration::from_millis(self.void_return_timeout_ms)
    }

    pub fn validate(&self) -> MtsResult<()> {
        if self.process_name.trim().is_empty() {
            return Err(MtsError::config("process_name must not be empty"));
        }
        if self.mailbox_capacity == 0 {
            return Err(MtsError::config("mailbox_capacity must be at least 1"));
        }
        if self.rpc_timeout_ms == 0 {
            return Err(MtsError::config("rpc_timeout_ms must be greater than 0"));
        }
        Ok(())
    }

    /// Load config from a file (auto-detect format)
    pub fn from_file<P: AsRef<Path>>(path: P) -> MtsResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MtsError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Self::from_toml(&contents)?,
            Some("yaml") | Some("yml") => Self::from_yaml(&contents)?,
            _ => Self::from_toml(&contents).or_else(|_| Self::from_yaml(&contents))?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> MtsResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_yaml(contents: &str) -> MtsResult<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Load the first config file found in the standard locations
    ///
    /// Search order:
    /// 1. ./mts.toml, ./mts.yaml
    /// 2. ~/.mts/config.toml, ~/.mts/config.yaml
    pub fn find() -> MtsResult<Self> {
        for path in Self::search_paths() {
            if path.exists() {
                log::info!("Loading manager config from {}", path.display());
                return Self::from_file(&path);
            }
        }
        Err(MtsError::config("No config file found in standard locations"))
    }

    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("mts.toml"),
            PathBuf::from("mts.yaml"),
            PathBuf::from("mts.yml"),
        ];
        if let Some(home) = dirs::home_dir() {
            let dir = home.join(".mts");
            paths.push(dir.join("config.toml"));
            paths.push(dir.join("config.yaml"));
        }
        paths
    }
}
