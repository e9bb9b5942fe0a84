//! Configuration parsing
//!
//! Reads settings from `~/.mirrorflow/config.toml`. Every field has a default,
//! so a missing file or an empty table yields a usable configuration.

use crate::defaults;
use crate::types::{CatalogSourceType, PlatformVersion};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for config operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for config operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root of `config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorflowConfig {
    #[serde(default)]
    pub operations: OperationsConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// `[operations]` - mirroring tool supervision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationsConfig {
    /// Operations allowed to run at once; further starts are rejected
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Mirroring tool executable (name on PATH or absolute path)
    #[serde(default = "default_mirror_binary")]
    pub mirror_binary: String,

    /// Extra arguments appended before the destination
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Verify TLS on source and destination registries
    #[serde(default)]
    pub tls_verify: bool,

    /// Registry credential file handed to the tool
    #[serde(default)]
    pub authfile: Option<PathBuf>,

    /// Seconds between SIGTERM and SIGKILL on stop
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,

    /// How often live log streams check for new output
    #[serde(default = "default_log_poll_interval_ms")]
    pub log_poll_interval_ms: u64,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            mirror_binary: default_mirror_binary(),
            extra_args: Vec::new(),
            tls_verify: false,
            authfile: None,
            stop_grace_secs: default_stop_grace_secs(),
            log_poll_interval_ms: default_log_poll_interval_ms(),
        }
    }
}

impl OperationsConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn log_poll_interval(&self) -> Duration {
        Duration::from_millis(self.log_poll_interval_ms.max(1))
    }
}

/// `[catalog]` - catalog fetch pipeline and lookup cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Platform versions to fetch
    #[serde(default = "default_versions")]
    pub versions: Vec<PlatformVersion>,

    /// Catalog sources to fetch
    #[serde(default = "default_sources")]
    pub sources: Vec<CatalogSourceType>,

    /// Fetch jobs running at once
    #[serde(default = "default_fetch_concurrency")]
    pub concurrency: usize,

    /// Skip a job whose previous extraction is younger than this
    #[serde(default = "default_freshness_hours")]
    pub freshness_hours: u64,

    /// Pull attempts per job, first try included
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Fixed delay between pull attempts
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Remove the pulled image once its configs are extracted
    #[serde(default = "default_true")]
    pub delete_artifacts: bool,

    /// Container CLI used to pull and unpack catalog images
    #[serde(default = "default_container_binary")]
    pub container_binary: String,

    /// Registry credential file for pulls
    #[serde(default)]
    pub authfile: Option<PathBuf>,

    /// Response cache time-to-live
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            versions: default_versions(),
            sources: default_sources(),
            concurrency: default_fetch_concurrency(),
            freshness_hours: default_freshness_hours(),
            retry_attempts: default_retry_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            delete_artifacts: true,
            container_binary: default_container_binary(),
            authfile: None,
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl CatalogConfig {
    /// Freshness window, capped at [`defaults::MAX_FRESHNESS_HOURS`].
    pub fn freshness(&self) -> chrono::Duration {
        let hours = self.freshness_hours.min(defaults::MAX_FRESHNESS_HOURS);
        chrono::Duration::hours(hours as i64)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn default_max_concurrent() -> usize {
    defaults::DEFAULT_MAX_CONCURRENT_OPERATIONS
}

fn default_mirror_binary() -> String {
    defaults::DEFAULT_MIRROR_BINARY.to_string()
}

fn default_stop_grace_secs() -> u64 {
    defaults::DEFAULT_STOP_GRACE_SECS
}

fn default_log_poll_interval_ms() -> u64 {
    defaults::DEFAULT_LOG_POLL_INTERVAL_MS
}

fn default_versions() -> Vec<PlatformVersion> {
    defaults::DEFAULT_PLATFORM_VERSIONS
        .iter()
        .filter_map(|v| v.parse().ok())
        .collect()
}

fn default_sources() -> Vec<CatalogSourceType> {
    CatalogSourceType::ALL.to_vec()
}

fn default_fetch_concurrency() -> usize {
    defaults::DEFAULT_FETCH_CONCURRENCY
}

fn default_freshness_hours() -> u64 {
    defaults::DEFAULT_FRESHNESS_HOURS
}

fn default_retry_attempts() -> u32 {
    defaults::DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_delay_secs() -> u64 {
    defaults::DEFAULT_RETRY_DELAY_SECS
}

fn default_true() -> bool {
    true
}

fn default_container_binary() -> String {
    defaults::DEFAULT_CONTAINER_BINARY.to_string()
}

fn default_cache_ttl_secs() -> u64 {
    defaults::DEFAULT_CACHE_TTL_SECS
}

impl MirrorflowConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MirrorflowConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load if the file exists, otherwise defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.operations.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "operations.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.catalog.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "catalog.concurrency must be at least 1".to_string(),
            ));
        }
        if self.catalog.freshness_hours > defaults::MAX_FRESHNESS_HOURS {
            return Err(ConfigError::Invalid(format!(
                "catalog.freshness_hours must be at most {}",
                defaults::MAX_FRESHNESS_HOURS
            )));
        }
        if self.catalog.retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "catalog.retry_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
