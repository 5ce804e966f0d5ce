//! Retrieval-augmented answering
//!
//! ```text
//! question
//!     │
//!     ▼
//! ┌─────────────┐
//! │  Embedder   │  → query vector
//! └─────────────┘
//!     │
//!     ▼
//! ┌─────────────┐
//! │ VectorIndex │  → top-k units with distances
//! └─────────────┘
//!     │
//!     ▼
//! ┌─────────────┐
//! │  Assembler  │  → numbered context under a character budget
//! └─────────────┘
//!     │
//!     ▼
//! ┌─────────────┐
//! │  Generator  │  → local checkpoint or hosted chat service
//! └─────────────┘
//!     │
//!     ▼
//! RagAnswer (answer + distances)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use lexrag::rag::{RagConfig, RagPipeline, GenerationConfig};
//!
//! let pipeline = RagPipeline::new(embedder, index, generator, RagConfig::default());
//! let answer = pipeline.answer_question("Кто посадил репку?", "repka", &GenerationConfig::default())?;
//! println!("{}", answer);
//! ```

pub mod context;
pub mod generator;
pub mod pipeline;
pub mod query;

pub use context::{ChatTemplate, ContextAssembler, NO_DATA_REPLY};
pub use generator::{
    CandleGenerator, GenerationConfig, Generator, GeneratorBackend, GeneratorConfig,
    GeneratorKind, HostedConfig, HostedGenerator, LocalGenerator,
};
pub use pipeline::{RagConfig, RagPipeline};
pub use query::{Diagnostics, FlowStage, RagAnswer, Source};
