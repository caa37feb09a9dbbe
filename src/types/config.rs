//! Configuration structures.
//!
//! Settings are loaded from `config.json` under the supervisor home; every
//! section falls back to its `Default` when absent.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::role::Role;
use super::{Error, Result};

/// Environment variable naming the supervisor home directory.
pub const HOME_ENV: &str = "IZ_HOME";

/// Global supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Launch handshake configuration.
    #[serde(default)]
    pub launch: LaunchConfig,

    /// Control protocol configuration.
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load settings from `config.json` in `paths.home`, or defaults if the file is absent.
    pub fn load(paths: &Paths) -> Result<Self> {
        match std::fs::read_to_string(paths.config_file()) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Launch handshake configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Time allowed per expected advertisement; the launch window is this
    /// multiplied by the startup target.
    #[serde(with = "humantime_serde")]
    pub per_role_timeout: Duration,

    /// Interval between progress checks while waiting for advertisements.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            per_role_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl LaunchConfig {
    /// Total launch window for `target` advertisements.
    pub fn window(&self, target: usize) -> Duration {
        let count = u32::try_from(target.max(1)).unwrap_or(u32::MAX);
        self.per_role_timeout.saturating_mul(count)
    }
}

/// Control protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Maximum accepted command line length in bytes.
    pub max_line_bytes: usize,

    /// Maximum concurrent control connections per role.
    pub max_connections: usize,

    /// Connections that send no command within this many seconds are dropped.
    pub read_timeout_secs: u64,

    /// Replies that cannot be written within this many seconds are dropped.
    pub write_timeout_secs: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: 64 * 1024,
            max_connections: 256,
            read_timeout_secs: 30,
            write_timeout_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Directory layout under the supervisor home.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub home: PathBuf,
    pub run_dir: PathBuf,
    pub log_dir: PathBuf,
    pub storage_dir: PathBuf,
}

impl Paths {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            run_dir: home.join("run"),
            log_dir: home.join("log"),
            storage_dir: home.join("storage"),
            home,
        }
    }

    /// Resolve the home directory: explicit value, then `IZ_HOME`, then `~/.iz`.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self> {
        if let Some(home) = explicit {
            return Ok(Self::new(home));
        }
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(PathBuf::from(home)));
        }
        dirs::home_dir()
            .map(|home| Self::new(home.join(".iz")))
            .ok_or_else(|| Error::configuration("cannot determine home directory; set IZ_HOME"))
    }

    pub fn config_file(&self) -> PathBuf {
        self.home.join("config.json")
    }

    pub fn services_file(&self) -> PathBuf {
        self.home.join("services.json")
    }

    pub fn log_file(&self, name: &str, role: Role) -> PathBuf {
        self.log_dir
            .join(format!("{}-{}.log", name, role.as_str().to_lowercase()))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }
}
