//! Configuration file support for staticroutemgrd
//!
//! Loads and validates configuration from a TOML file.
//! Default location: /etc/staticroute/staticroutemgrd.toml

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MgrError, Result};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/staticroute/staticroutemgrd.toml";

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Directory scanned for StaticRoute manifests
    #[serde(default = "default_manifest_dir")]
    pub manifest_dir: PathBuf,

    /// Manifest poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Where to write the JSON status snapshot, if anywhere
    #[serde(default)]
    pub status_file: Option<PathBuf>,

    /// Apply routes to an in-memory table instead of the kernel
    #[serde(default)]
    pub dry_run: bool,
}

/// Routing table configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Upper bound on one add/delete, in milliseconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,

    /// Deadline of one `ip` child process, in milliseconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Reconciliations allowed to run at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_reconciles: usize,

    /// First retry delay in milliseconds
    #[serde(default = "default_retry_base")]
    pub retry_base_ms: u64,

    /// Retry delay cap in milliseconds
    #[serde(default = "default_retry_max")]
    pub retry_max_ms: u64,

    /// Retries per event; 0 retries forever
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Cluster service resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_cluster_domain")]
    pub cluster_domain: String,

    #[serde(default = "default_namespace")]
    pub default_namespace: String,

    /// Static service -> address overrides
    #[serde(default)]
    pub services: HashMap<String, String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive (trace, debug, info, warn, error, or an EnvFilter spec)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

/// Complete staticroutemgrd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticRouteConfig {
    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub table: TableConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default functions
fn default_manifest_dir() -> PathBuf {
    PathBuf::from("/etc/staticroute/routes.d")
}

fn default_poll_interval() -> u64 {
    5
}

fn default_call_timeout() -> u64 {
    5000
}

fn default_command_timeout() -> u64 {
    3000
}

fn default_max_concurrent() -> usize {
    4
}

fn default_retry_base() -> u64 {
    500
}

fn default_retry_max() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    10
}

fn default_cluster_domain() -> String {
    "cluster.local".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            manifest_dir: default_manifest_dir(),
            poll_interval_secs: default_poll_interval(),
            status_file: None,
            dry_run: false,
        }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout(),
            command_timeout_ms: default_command_timeout(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: default_max_concurrent(),
            retry_base_ms: default_retry_base(),
            retry_max_ms: default_retry_max(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cluster_domain: default_cluster_domain(),
            default_namespace: default_namespace(),
            services: HashMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl StaticRouteConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content).map_err(|e| {
                MgrError::config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!(
                    "staticroutemgrd: Config file {} not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(MgrError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.controller.poll_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.table.call_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.table.command_timeout_ms)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.dispatch.retry_base_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.dispatch.retry_max_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.controller.poll_interval_secs == 0 {
            return Err(MgrError::config("poll_interval_secs must be > 0"));
        }

        if self.table.call_timeout_ms == 0 || self.table.command_timeout_ms == 0 {
            return Err(MgrError::config("table timeouts must be > 0"));
        }

        if self.dispatch.max_concurrent_reconciles == 0 {
            return Err(MgrError::config("max_concurrent_reconciles must be > 0"));
        }

        if self.dispatch.retry_base_ms > self.dispatch.retry_max_ms {
            return Err(MgrError::config("retry_base_ms must not exceed retry_max_ms"));
        }

        if self.resolver.cluster_domain.trim().is_empty() {
            return Err(MgrError::config("cluster_domain must not be empty"));
        }

        Ok(())
    }
}
