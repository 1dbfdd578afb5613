//! Configuration management for the analysis core

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::DownSampling;

/// Environment variable that enables debug source emission
pub const DEBUG_SOURCE_DIR_ENV: &str = "OAP_OAL_DEBUG_DIR";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// OAL script configuration
    #[serde(default)]
    pub oal: OalConfig,

    /// Runtime analysis configuration
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML or JSON file
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = if path.as_ref().extension().map_or(false, |ext| ext == "toml") {
            toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse TOML config: {}", e)))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))?
        };

        config.validate()?;
        debug!(
            path = %path.as_ref().display(),
            scripts = config.oal.scripts.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.analysis.flush_interval_ms == 0 {
            return Err(Error::Config("analysis.flush_interval_ms must be positive".into()));
        }
        if self.analysis.remote_nodes == 0 {
            return Err(Error::Config("analysis.remote_nodes must be positive".into()));
        }
        if self.analysis.apdex.default_threshold_ms <= 0 {
            return Err(Error::Config("analysis.apdex.default_threshold_ms must be positive".into()));
        }
        Ok(())
    }
}

/// OAL script configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OalConfig {
    /// Script files compiled together as one batch, in order
    pub scripts: Vec<String>,
    /// Directory receiving rendered sources of every generated unit
    pub debug_source_dir: Option<String>,
}

impl Default for OalConfig {
    fn default() -> Self {
        Self {
            scripts: vec!["oal/core.oal".to_string()],
            debug_source_dir: None,
        }
    }
}

impl OalConfig {
    /// Debug directory from config, falling back to the environment
    pub fn debug_dir(&self) -> Option<String> {
        self.debug_source_dir
            .clone()
            .or_else(|| std::env::var(DEBUG_SOURCE_DIR_ENV).ok())
            .filter(|dir| !dir.is_empty())
    }
}

/// Runtime analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Interval between cache flushes
    pub flush_interval_ms: u64,
    /// Coarser granularities persisted besides the minute one
    pub downsampling: Vec<DownSampling>,
    /// Number of pre-aggregation nodes units are partitioned across
    pub remote_nodes: usize,
    /// Apdex thresholds
    pub apdex: ApdexConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 25_000,
            downsampling: vec![DownSampling::Hour, DownSampling::Day],
            remote_nodes: 1,
            apdex: ApdexConfig::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn should_to_hour(&self) -> bool {
        self.downsampling.contains(&DownSampling::Hour)
    }

    pub fn should_to_day(&self) -> bool {
        self.downsampling.contains(&DownSampling::Day)
    }
}

/// Apdex threshold configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApdexConfig {
    /// Threshold applied to services without an override
    pub default_threshold_ms: i64,
    /// Per-service thresholds keyed by service name
    pub services: BTreeMap<String, i64>,
}

impl Default for ApdexConfig {
    fn default() -> Self {
        Self {
            default_threshold_ms: 500,
            services: BTreeMap::new(),
        }
    }
}

impl ApdexConfig {
    /// Threshold for the named service
    pub fn threshold(&self, service: &str) -> i64 {
        self.services
            .get(service)
            .copied()
            .unwrap_or(self.default_threshold_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
