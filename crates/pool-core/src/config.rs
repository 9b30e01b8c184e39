//! Configuration system for Pool.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $POOL_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/pool/config.toml
//!   3. ~/.config/pool/config.toml

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the listener binds to.
    pub bind_addr: IpAddr,
    /// TCP port. 0 = OS-assigned.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file. Created on first use.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on each client read. 0 = wait forever.
    pub read_timeout_secs: u64,
    /// Total handshake attempts, including the first.
    pub handshake_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log file receiving every event at `file_level` and above.
    pub file: PathBuf,
    /// Filter directive for the log file.
    pub file_level: String,
    /// Filter directive for the console when RUST_LOG is unset.
    pub console_level: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

pub const DEFAULT_PORT: u16 = 8082;
pub const DEFAULT_HANDSHAKE_ATTEMPTS: u32 = 6;

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("locations.sqlite"),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: 30,
            handshake_attempts: DEFAULT_HANDSHAKE_ATTEMPTS,
        }
    }
}

impl SessionConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_secs > 0).then(|| Duration::from_secs(self.read_timeout_secs))
    }

    /// Attempt limit, never below one.
    pub fn attempts(&self) -> u32 {
        self.handshake_attempts.max(1)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: data_dir().join("poold.log"),
            file_level: "debug".into(),
            console_level: "warn".into(),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("pool")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("pool")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl PoolConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            PoolConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("POOL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&PoolConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply POOL_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("POOL_NETWORK__BIND_ADDR") {
            if let Ok(addr) = v.parse() {
                self.network.bind_addr = addr;
            }
        }
        if let Some(v) = var("POOL_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Some(v) = var("POOL_STORAGE__PATH") {
            self.storage.path = PathBuf::from(v);
        }
        if let Some(v) = var("POOL_SESSION__READ_TIMEOUT_SECS") {
            if let Ok(s) = v.parse() {
                self.session.read_timeout_secs = s;
            }
        }
        if let Some(v) = var("POOL_SESSION__HANDSHAKE_ATTEMPTS") {
            if let Ok(n) = v.parse() {
                self.session.handshake_attempts = n;
            }
        }
        if let Some(v) = var("POOL_LOGGING__FILE") {
            self.logging.file = PathBuf::from(v);
        }
        if let Some(v) = var("POOL_LOGGING__FILE_LEVEL") {
            self.logging.file_level = v;
        }
        if let Some(v) = var("POOL_LOGGING__CONSOLE_LEVEL") {
            self.logging.console_level = v;
        }
    }
}
