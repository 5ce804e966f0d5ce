//! Error types shared by every pipeline stage

use thiserror::Error;

/// Result alias for pipeline operations
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors raised by the embedder, segmenter, index, assembler and generator.
///
/// Components never swallow or retry; the orchestrator hands the first
/// failing stage's error back to the caller as-is.
#[derive(Debug, Error)]
pub enum RagError {
    /// A vector's length differs from the collection's dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Collection does not exist
    #[error("Collection not found: {0}")]
    NotFound(String),

    /// Collection name already taken
    #[error("Collection already exists: {0}")]
    AlreadyExists(String),

    /// Unit id already present in the collection
    #[error("Duplicate unit id '{id}' in collection '{collection}'")]
    DuplicateId { collection: String, id: String },

    /// Vector store or hosted generator unreachable
    #[error("Service unreachable: {0}")]
    Connectivity(String),

    /// Invalid decoding or pipeline parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model not loaded, device failure or hosted service refusal
    #[error("Generation unavailable: {0}")]
    GenerationUnavailable(String),

    /// The boundary pattern matched nothing
    #[error("No segment boundary matched pattern '{0}'")]
    SegmentationEmpty(String),

    /// Embedding model failure
    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// Unexpected reply from a remote backend
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of [`RagError`] for callers that branch on failure type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DimensionMismatch,
    NotFound,
    AlreadyExists,
    DuplicateId,
    Connectivity,
    InvalidConfig,
    GenerationUnavailable,
    SegmentationEmpty,
    Embedding,
    Backend,
    Io,
}

impl RagError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::DuplicateId { .. } => ErrorKind::DuplicateId,
            Self::Connectivity(_) => ErrorKind::Connectivity,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::GenerationUnavailable(_) => ErrorKind::GenerationUnavailable,
            Self::SegmentationEmpty(_) => ErrorKind::SegmentationEmpty,
            Self::Embedding(_) => ErrorKind::Embedding,
            Self::Backend(_) => ErrorKind::Backend,
            Self::Io(_) | Self::Json(_) => ErrorKind::Io,
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::GenerationUnavailable(message.into())
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    /// Map a transport error from the blocking HTTP client.
    ///
    /// Connect and timeout failures become `Connectivity`; anything else
    /// is reported as a backend fault.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Connectivity(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}
