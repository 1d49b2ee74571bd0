pub mod embedding;
mod search;
pub mod vector_store;

pub use embedding::{Embedder, EmbeddingClient, EmbeddingRegistry, HealthResponse};
pub use search::{SimilaritySearch, VectorStoreClient};
pub use vector_store::{PgVectorBackend, QdrantBackend, VectorStore, connect_backend};
