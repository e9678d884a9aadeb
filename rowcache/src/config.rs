use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::memory::{DEFAULT_TTL, ReplacementPolicy};
use crate::cache::serializer::{PayloadSerializer, SerdeFormat};
use crate::cache::sqlite::{JournalMode, SqliteTierConfig, SyncMode};
use crate::compression::{CompressionAlgorithm, CompressionConfig};
use crate::core::{CacheError, Result};

/// Only persistent provider shipped with the crate
pub const SQLITE_PROVIDER: &str = "sqlite";

/// Top-level cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub signatures: Vec<SignatureConfig>,
}

impl CacheConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: CacheConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn signature(&self, name: &str) -> Option<&SignatureConfig> {
        self.signatures.iter().find(|signature| signature.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Install a global tracing subscriber. `RUST_LOG` overrides `level`.
    pub fn init_tracing(&self) -> anyhow::Result<()> {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&self.level));
        let builder = tracing_subscriber::fmt().with_env_filter(filter);

        let installed = if self.format.eq_ignore_ascii_case("json") {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
    }
}

/// One database signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureConfig {
    pub name: String,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_true")]
    pub include_literal_values: bool,
    /// Applies to memory-only signatures
    #[serde(default)]
    pub standalone_replacement: ReplacementPolicy,
    #[serde(default)]
    pub persistent: Option<PersistentConfig>,
}

impl SignatureConfig {
    pub fn memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ttl_secs: default_ttl_secs(),
            include_literal_values: true,
            standalone_replacement: ReplacementPolicy::default(),
            persistent: None,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Persistent tier section of a signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub text_format: bool,
    #[serde(default)]
    pub format: SerdeFormat,
    #[serde(default)]
    pub compression: CompressionAlgorithm,
    #[serde(default)]
    pub journal_mode: JournalMode,
    #[serde(default)]
    pub synchronous: SyncMode,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_cache_size")]
    pub cache_size: i64,
    #[serde(default = "default_true")]
    pub exclusive_locking: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            path: None,
            text_format: true,
            format: SerdeFormat::Json,
            compression: CompressionAlgorithm::None,
            journal_mode: JournalMode::default(),
            synchronous: SyncMode::default(),
            page_size: default_page_size(),
            cache_size: default_cache_size(),
            exclusive_locking: true,
        }
    }
}

impl PersistentConfig {
    /// Validate the section and convert it into a tier configuration
    pub fn to_tier_config(&self) -> Result<SqliteTierConfig> {
        if !self.provider.eq_ignore_ascii_case(SQLITE_PROVIDER) {
            return Err(CacheError::Configuration(format!(
                "unknown persistent provider '{}'",
                self.provider
            )));
        }
        if self.text_format && !self.format.supports_text() {
            return Err(CacheError::Configuration(format!(
                "format {:?} cannot produce text content",
                self.format
            )));
        }
        if self.text_format && self.compression != CompressionAlgorithm::None {
            return Err(CacheError::Configuration(
                "compression requires binary content".to_string(),
            ));
        }

        Ok(SqliteTierConfig {
            path: self.path.clone(),
            text_format: self.text_format,
            journal_mode: self.journal_mode,
            synchronous: self.synchronous,
            page_size: self.page_size,
            cache_size: self.cache_size,
            exclusive_locking: self.exclusive_locking,
            compression: CompressionConfig::with_algorithm(self.compression),
        })
    }
}

fn default_ttl_secs() -> u64 {
    DEFAULT_TTL.as_secs()
}

fn default_true() -> bool {
    true
}

fn default_provider() -> String {
    SQLITE_PROVIDER.to_string()
}

fn default_page_size() -> u32 {
    4096
}

fn default_cache_size() -> i64 {
    -2000
}
