//! Answer generation
//!
//! Every backend takes a question plus an assembled context and returns a
//! clean answer with no prompt echo and no role markers.

pub mod candle;
pub mod config;
pub mod hosted;
pub mod postprocess;
pub mod sampling;

pub use candle::{CandleGenerator, LocalGenerator};
pub use config::{GenerationConfig, GeneratorConfig};
pub use hosted::{HostedConfig, HostedGenerator};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Trait for answer generators
pub trait Generator: Send + Sync {
    /// Answer `question` from `context`.
    ///
    /// Invalid decoding parameters fail with `InvalidConfig`; a model that is
    /// not loaded or a refusing service fails with `GenerationUnavailable`.
    fn ask(&self, question: &str, context: &str, config: &GenerationConfig) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Which generator answers questions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    /// Local candle checkpoint
    #[default]
    Local,
    /// Remote chat-completion service
    Hosted,
}

/// The configured generator backends
pub enum GeneratorBackend {
    Local(LocalGenerator),
    Hosted(HostedGenerator),
}

impl GeneratorBackend {
    pub fn kind(&self) -> GeneratorKind {
        match self {
            Self::Local(_) => GeneratorKind::Local,
            Self::Hosted(_) => GeneratorKind::Hosted,
        }
    }
}

impl Generator for GeneratorBackend {
    fn ask(&self, question: &str, context: &str, config: &GenerationConfig) -> Result<String> {
        match self {
            Self::Local(generator) => generator.ask(question, context, config),
            Self::Hosted(generator) => generator.ask(question, context, config),
        }
    }

    fn model_name(&self) -> &str {
        match self {
            Self::Local(generator) => generator.model_name(),
            Self::Hosted(generator) => generator.model_name(),
        }
    }
}
