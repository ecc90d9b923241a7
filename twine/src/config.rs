use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::errors::TwineError;

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "TRELLIS_CONFIG";

#[cfg(windows)]
pub const DEFAULT_CONFIG_PATH: &str = r"C:\ProgramData\Trellis\trellis.toml";
#[cfg(not(windows))]
pub const DEFAULT_CONFIG_PATH: &str = "/etc/trellis/trellis.toml";

#[cfg(windows)]
const DEFAULT_LOG_FILE: &str = r"C:\ProgramData\Trellis\logs\trellisd.log";
#[cfg(not(windows))]
const DEFAULT_LOG_FILE: &str = "/var/log/trellis/trellisd.log";

pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:47600";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub log_file: String,
    pub log_level: String,
    pub poll_interval_secs: u64,
    pub control_addr: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_file: DEFAULT_LOG_FILE.to_string(),
            log_level: "info".to_string(),
            poll_interval_secs: 5,
            control_addr: DEFAULT_CONTROL_ADDR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub recipients: Vec<String>,
    /// 0 or negative means unlimited.
    pub max_per_minute: i64,
    /// 0 or negative means unlimited.
    pub max_per_day: i64,
    pub command: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub archive: bool,
    pub clear: bool,
    pub archive_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub service_name: String,
    #[serde(default)]
    pub machine: Option<String>,
    #[serde(default)]
    pub start_order: u32,
    #[serde(default)]
    pub stop_order: u32,
    /// 0 waits indefinitely.
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(default)]
    pub notify_on_stop: bool,
    #[serde(default)]
    pub log_files: Vec<String>,
    #[serde(default)]
    pub log_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default, rename = "service")]
    pub services: Vec<ServiceConfig>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TwineError> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, TwineError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Path from `TRELLIS_CONFIG`, falling back to the platform default.
    pub fn resolve_path() -> String {
        std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    fn validate(&self) -> Result<(), TwineError> {
        let mut seen = HashSet::new();
        for svc in &self.services {
            if svc.name.trim().is_empty() {
                return Err(TwineError::Config("service with empty name".into()));
            }
            if svc.service_name.trim().is_empty() {
                return Err(TwineError::Config(format!(
                    "service '{}' has no service_name",
                    svc.name
                )));
            }
            if !seen.insert(svc.name.to_lowercase()) {
                return Err(TwineError::Config(format!("duplicate service '{}'", svc.name)));
            }
        }

        if self.daemon.poll_interval_secs == 0 {
            return Err(TwineError::Config("poll_interval_secs must be at least 1".into()));
        }

        Ok(())
    }
}
