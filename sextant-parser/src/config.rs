//! Sextant configuration loading from `sextant.toml`.
//!
//! Configuration is optional. Every section falls back to defaults when it is
//! absent, and a missing or unreadable file in the workspace root yields the
//! default configuration with a warning. A file named explicitly on the
//! command line is loaded strictly: failing to read or parse it is an error.
//!
//! # Example Configuration
//!
//! ```toml
//! [parse]
//! whole_command = false
//! include_paths = ["include", "/usr/local/include"]
//! disabled_parsers = []
//!
//! [collector]
//! poll_interval_ms = 50
//!
//! [cluster]
//! enabled = true
//! jobs = 4
//!
//! [traversal]
//! progress_interval_secs = 5
//! max_files = 100000
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the configuration file looked up in the workspace root.
pub const CONFIG_FILE_NAME: &str = "sextant.toml";

/// Errors raised when an explicitly requested configuration cannot be used.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Root configuration structure loaded from `sextant.toml`.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct SextantConfig {
    /// Parse dispatch settings.
    #[serde(default)]
    pub parse: ParseConfig,

    /// Result collector settings.
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Cluster engine settings.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Root traversal settings.
    #[serde(default)]
    pub traversal: TraversalConfig,
}

/// How build actions are handed to parsers.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ParseConfig {
    /// Dispatch one `parse_command` per multi-source action instead of one
    /// `parse` per source file.
    #[serde(default)]
    pub whole_command: bool,

    /// Extra include directories. Relative entries are resolved against the
    /// workspace root.
    #[serde(default)]
    pub include_paths: Vec<PathBuf>,

    /// Parsers (by name) that must not be used.
    #[serde(default)]
    pub disabled_parsers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CollectorConfig {
    /// Sleep between polls while nothing is in flight.
    ///
    /// Default: `50`
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    50
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ClusterConfig {
    /// Run the cluster engine after parsing.
    ///
    /// Default: `true`
    #[serde(default = "default_cluster_enabled")]
    pub enabled: bool,

    /// Worker pool size. `None` uses the number of CPUs.
    #[serde(default)]
    pub jobs: Option<usize>,
}

fn default_cluster_enabled() -> bool {
    true
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jobs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TraversalConfig {
    /// Seconds between progress lines during the directory walk.
    ///
    /// Default: `5`
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,

    /// Stop the language census after this many files.
    #[serde(default)]
    pub max_files: Option<usize>,
}

fn default_progress_interval_secs() -> u64 {
    5
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            progress_interval_secs: default_progress_interval_secs(),
            max_files: None,
        }
    }
}

impl SextantConfig {
    /// Load `sextant.toml` from `root`, falling back to defaults.
    ///
    /// Read and parse failures are logged as warnings.
    pub fn load(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Self::default();
        }
        match Self::from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}; using defaults", e);
                Self::default()
            }
        }
    }

    /// Load a configuration file strictly.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot constrain.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.jobs == Some(0) {
            return Err(ConfigError::Invalid("cluster.jobs must be at least 1".into()));
        }
        if self.collector.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "collector.poll_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Include paths with relative entries resolved against `root`.
    pub fn include_paths(&self, root: &Path) -> Vec<PathBuf> {
        self.parse
            .include_paths
            .iter()
            .map(|p| if p.is_absolute() { p.clone() } else { root.join(p) })
            .collect()
    }

    /// Cluster worker pool size.
    pub fn cluster_jobs(&self) -> usize {
        self.cluster.jobs.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.collector.poll_interval_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.traversal.progress_interval_secs)
    }
}
