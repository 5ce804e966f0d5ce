//! Application configuration
//!
//! Every section has working defaults, so an empty or missing file is a
//! valid configuration. CLI flags are applied on top of the loaded values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::embedding::backends::{CandleBertConfig, EmbedderKind};
use crate::error::RagError;
use crate::rag::{GenerationConfig, GeneratorConfig, GeneratorKind, HostedConfig, RagConfig};
use crate::retrieval::{ChromaConfig, DistanceMetric};

/// Where unit vectors live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// In-process exact index, lost on exit
    Memory,
    /// Chroma server over HTTP
    #[default]
    Chroma,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSection {
    pub backend: IndexBackend,
    /// Metric used when a command creates a collection
    pub metric: DistanceMetric,
    pub chroma: ChromaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderSection {
    pub kind: EmbedderKind,
    pub bert: CandleBertConfig,
    /// Vector size of the token-hash embedder
    pub token_dimension: usize,
}

impl Default for EmbedderSection {
    fn default() -> Self {
        Self {
            kind: EmbedderKind::default(),
            bert: CandleBertConfig::default(),
            token_dimension: 384,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSection {
    pub kind: GeneratorKind,
    pub local: GeneratorConfig,
    pub hosted: HostedConfig,
}

/// Whole-application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Model cache root; `~/.cache/lexrag/models` when unset
    pub models_dir: Option<PathBuf>,
    /// Never contact the HuggingFace Hub
    pub offline: bool,
    pub index: IndexSection,
    pub embedder: EmbedderSection,
    pub generator: GeneratorSection,
    pub rag: RagConfig,
    pub generation: GenerationConfig,
}

impl AppConfig {
    /// Load from `path`, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config to TOML")
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        self.generation.validate()?;
        self.rag.validate()?;
        if self.embedder.token_dimension == 0 {
            return Err(RagError::invalid_config("token_dimension must be positive"));
        }
        if self.index.backend == IndexBackend::Chroma && self.index.chroma.port == 0 {
            return Err(RagError::invalid_config("chroma port must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.index.backend, IndexBackend::Chroma);
        assert_eq!(config.index.chroma.base_url(), "http://localhost:8000");
        assert_eq!(config.rag.top_k, 3);
        assert_eq!(config.generator.kind, GeneratorKind::Local);
        assert!(!config.offline);
    }

    #[test]
    fn test_sections_parse() {
        let config = AppConfig::from_toml(
            r#"
            offline = true

            [index]
            backend = "chroma"
            metric = "ip"

            [index.chroma]
            host = "chroma.internal"
            port = 8001

            [embedder]
            kind = "token"
            token_dimension = 128

            [generator]
            kind = "hosted"

            [generator.hosted]
            model = "GigaChat-Pro"

            [rag]
            top_k = 5

            [generation]
            temperature = 0.0
            max_new_tokens = 64
            "#,
        )
        .unwrap();

        assert!(config.offline);
        assert_eq!(config.index.backend, IndexBackend::Chroma);
        assert_eq!(config.index.metric, DistanceMetric::InnerProduct);
        assert_eq!(config.index.chroma.base_url(), "http://chroma.internal:8001");
        assert_eq!(config.embedder.kind, EmbedderKind::Token);
        assert_eq!(config.embedder.token_dimension, 128);
        assert_eq!(config.generator.kind, GeneratorKind::Hosted);
        assert_eq!(config.generator.hosted.model, "GigaChat-Pro");
        assert_eq!(config.rag.top_k, 5);
        assert_eq!(config.rag.max_context_chars, 3000);
        assert!(config.generation.is_greedy());
        assert_eq!(config.generation.max_new_tokens, 64);
    }

    #[test]
    fn test_invalid_generation_rejected() {
        let err = AppConfig::from_toml("[generation]\nmax_new_tokens = 0\n").unwrap_err();
        let rag = err.downcast_ref::<RagError>().unwrap();
        assert_eq!(rag.kind(), crate::error::ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[rag]\nmax_context_chars = 500").unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.rag.max_context_chars, 500);

        assert!(AppConfig::load(None).unwrap().embedder.token_dimension > 0);
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.index.chroma.port, 8000);
    }
}
