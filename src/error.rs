//! Error types for the retrieval pipeline.

use thiserror::Error;

use crate::utils::retry::Retryable;

/// Errors related to embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to connect to embedding server: {0}")]
    ConnectionError(String),

    #[error("embedding server error: {0}")]
    ServerError(String),

    #[error("embedding request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("unknown embedding model: {0}")]
    UnknownModel(String),

    #[error("embedding timeout")]
    Timeout,
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        // An unknown model name can never succeed on a later attempt.
        !matches!(self, EmbeddingError::UnknownModel(_))
    }
}

/// Errors related to vector store operations.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("failed to connect to vector store: {0}")]
    ConnectionError(String),

    #[error("missing vector store credential: {0}")]
    MissingCredential(String),

    #[error("search error: {0}")]
    SearchError(String),

    #[error("PostgreSQL error: {0}")]
    PostgresError(String),

    #[error("pgvector extension error: {0}")]
    PgVectorExtensionError(String),

    #[error("invalid index name: {0}")]
    InvalidIndexName(String),

    #[error("index schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("batch size mismatch: sent {sent} queries, received {received} result lists")]
    BatchMismatch { sent: usize, received: usize },
}

impl Retryable for VectorStoreError {
    fn is_retryable(&self) -> bool {
        // Every backend failure is treated as transient, including missing
        // credentials. A malformed index name or a table without the
        // required columns is rejected outright.
        !matches!(
            self,
            VectorStoreError::InvalidIndexName(_) | VectorStoreError::SchemaMismatch(_)
        )
    }
}

/// Errors raised by a single similarity search (embedding plus lookup).
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("embedding error: {0}")]
    EmbeddingError(#[from] EmbeddingError),

    #[error("vector store error: {0}")]
    VectorStoreError(#[from] VectorStoreError),
}

impl Retryable for SearchError {
    fn is_retryable(&self) -> bool {
        match self {
            SearchError::EmbeddingError(e) => e.is_retryable(),
            SearchError::VectorStoreError(e) => e.is_retryable(),
        }
    }
}

/// Errors surfaced by a pipeline stage invocation.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("missing input field: {0}")]
    MissingField(String),

    #[error("invalid input type for field '{field}': expected string, list of strings, or map of strings, got {found}")]
    InvalidInputType { field: String, found: String },

    #[error("backend unavailable after {attempts} attempts: {last_error}")]
    BackendUnavailable { attempts: u32, last_error: String },

    #[error("stage construction failed: {0}")]
    Construction(String),
}

/// Errors related to pipeline assembly and execution.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: StageError,
    },

    #[error("stage '{0}' is defined more than once")]
    DuplicateStage(String),
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Errors related to the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen address: {0}")]
    InvalidAddress(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(String),
}

/// Application-level errors that wrap domain errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("server error: {0}")]
    Server(#[from] ServerError),
}
