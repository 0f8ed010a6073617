//! Engine configuration.
//!
//! Loaded from a TOML file or built in code. Every field has a default, so a
//! file only needs the settings it changes:
//!
//! ```toml
//! data_dir = "/var/lib/brief-ai"
//! chunk_size = 800
//! embed_timeout_ms = 30000
//!
//! [embed]
//! backends = ["fastembed", "hashing"]
//! model_name = "all-MiniLM-L6-v2"
//! ```

use crate::error::{Result, RetrievalError};
use brief_ai_embed::EmbedConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the SQLite file inside the data directory
pub const DATABASE_FILE_NAME: &str = "brief-ai.db";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the database file
    pub data_dir: PathBuf,
    /// Chunk window length in characters
    pub chunk_size: usize,
    /// Upper bound on a single embedding call, in milliseconds
    pub embed_timeout_ms: u64,
    /// Embedding backend settings
    pub embed: EmbedConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".brief-ai"),
            chunk_size: 800,
            embed_timeout_ms: 30_000,
            embed: EmbedConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML document and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RetrievalError::invalid_config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML configuration file.
    pub async fn from_toml_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            RetrievalError::invalid_config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!("Loaded engine configuration from {}", path.display());
        Ok(config)
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_embed_config(mut self, embed: EmbedConfig) -> Self {
        self.embed = embed;
        self
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }

    /// Full path of the SQLite database file
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE_NAME)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RetrievalError::invalid_config("chunk_size must be at least 1"));
        }
        if self.embed_timeout_ms == 0 {
            return Err(RetrievalError::invalid_config(
                "embed_timeout_ms must be at least 1",
            ));
        }
        self.embed.validate()?;
        Ok(())
    }
}
