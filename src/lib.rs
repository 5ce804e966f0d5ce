//! # lexrag
//!
//! Retrieval-augmented question answering over legal codes and short texts.
//!
//! ## Overview
//!
//! A question is embedded, matched against a collection of indexed units,
//! the closest units are assembled into a bounded context, and a language
//! model answers from that context alone.
//!
//! ## Architecture
//!
//! - `data` - Units, article segmentation and narrative splitting
//! - `embedding` - Text embedders (candle BERT, token hashing)
//! - `retrieval` - Vector index trait with in-memory and Chroma backends
//! - `rag` - Context assembly, generators and the answering pipeline
//! - `models` - Device selection, checkpoint cache, tokenizer, readiness gate
//! - `config` - TOML application configuration
//! - `app` - Application context shared by every caller
//! - `cli` - Command-line interface
//! - `error` - Error types
//! - `utils` - Common utilities

pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod embedding;
pub mod error;
pub mod models;
pub mod rag;
pub mod retrieval;
pub mod utils;

pub use app::AppContext;
pub use config::AppConfig;
pub use data::{Segments, Unit};
pub use embedding::{Embedder, Embedding};
pub use error::{ErrorKind, RagError, Result};
pub use rag::{GenerationConfig, Generator, RagAnswer, RagPipeline};
pub use retrieval::{DistanceMetric, QueryHit, VectorIndex};
