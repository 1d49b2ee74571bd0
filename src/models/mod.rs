mod config;
mod document;
mod output;
mod query;

pub use config::{
    Config, DEFAULT_EMBEDDING_MODEL, DEFAULT_EMBEDDING_URL, DEFAULT_HOST, DEFAULT_PORT,
    DEFAULT_SEARCH_K, ENV_EMBEDDING_URL, ENV_VECTOR_API_KEY, ENV_VECTOR_URL, EmbeddingConfig,
    EmbeddingModelParams, PipelineConfig, RetrievalMethod, RetrieverConfig, SearchParams,
    ServerConfig, StageDefinition, VectorStoreConfig,
};
pub use document::Document;
pub use output::OutputFormat;
pub use query::QueryInput;
