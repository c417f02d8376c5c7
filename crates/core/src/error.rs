use serde::Serialize;
use thiserror::Error;

/// Stable, machine-readable classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmptyDocument,
    EmbeddingService,
    CompletionService,
    CollectionNotFound,
    DimensionMismatch,
    QuizGeneration,
    EmptyContext,
    InvalidInput,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::EmptyDocument => "empty_document",
            ErrorKind::EmbeddingService => "embedding_service",
            ErrorKind::CompletionService => "completion_service",
            ErrorKind::CollectionNotFound => "collection_not_found",
            ErrorKind::DimensionMismatch => "dimension_mismatch",
            ErrorKind::QuizGeneration => "quiz_generation",
            ErrorKind::EmptyContext => "empty_context",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Storage => "storage",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("document {document_id} has no extractable text")]
    EmptyDocument { document_id: String },

    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    #[error("completion service error: {0}")]
    CompletionService(String),

    #[error("no index exists for document {document_id} of owner {owner}")]
    CollectionNotFound { owner: String, document_id: String },

    #[error("vector dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedder mismatch: collection indexed with {indexed_with}, querying with {querying_with}")]
    EmbedderMismatch {
        indexed_with: String,
        querying_with: String,
    },

    #[error("quiz generation failed after {attempts} attempt(s): {details}")]
    QuizGeneration { attempts: u32, details: String },

    #[error("no indexed content to build a context from")]
    EmptyContext,

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("document read error: {0}")]
    DocumentRead(String),

    #[error("invalid response from {backend}: {details}")]
    Storage { backend: String, details: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::EmptyDocument { .. } => ErrorKind::EmptyDocument,
            EngineError::EmbeddingService(_) => ErrorKind::EmbeddingService,
            EngineError::CompletionService(_) => ErrorKind::CompletionService,
            EngineError::CollectionNotFound { .. } => ErrorKind::CollectionNotFound,
            EngineError::DimensionMismatch { .. } | EngineError::EmbedderMismatch { .. } => {
                ErrorKind::DimensionMismatch
            }
            EngineError::QuizGeneration { .. } => ErrorKind::QuizGeneration,
            EngineError::EmptyContext => ErrorKind::EmptyContext,
            EngineError::InvalidChunkConfig(_)
            | EngineError::InvalidArgument(_)
            | EngineError::DocumentRead(_) => ErrorKind::InvalidInput,
            EngineError::Storage { .. } | EngineError::Io(_) | EngineError::Serialization(_) => {
                ErrorKind::Storage
            }
        }
    }

    /// Transient upstream failures a caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::EmbeddingService | ErrorKind::CompletionService
        )
    }

    pub(crate) fn storage(backend: &str, details: impl Into<String>) -> Self {
        EngineError::Storage {
            backend: backend.to_string(),
            details: details.into(),
        }
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
