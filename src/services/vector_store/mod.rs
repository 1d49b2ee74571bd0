//! Vector store abstraction layer.
//!
//! Retriever stages talk to a backend through the [`VectorStore`] trait so that
//! the retrieval `method` of a stage (Qdrant or PostgreSQL/pgvector) only
//! matters at construction time.

mod pgvector;
mod qdrant;

pub use pgvector::PgVectorBackend;
pub use qdrant::QdrantBackend;

use async_trait::async_trait;

use crate::error::VectorStoreError;
use crate::models::{Document, RetrievalMethod, SearchParams, VectorStoreConfig};

/// Similarity search over pre-computed query vectors.
///
/// Implementations hold no client-side mutable state and are shared between
/// concurrent requests.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Check if the vector store is reachable.
    async fn health_check(&self) -> Result<bool, VectorStoreError>;

    /// Top-`k` documents for one query vector, best match first.
    async fn search(
        &self,
        query_vector: Vec<f32>,
        params: &SearchParams,
    ) -> Result<Vec<Document>, VectorStoreError>;

    /// One result list per query vector, in input order.
    async fn search_batch(
        &self,
        query_vectors: Vec<Vec<f32>>,
        params: &SearchParams,
    ) -> Result<Vec<Vec<Document>>, VectorStoreError>;

    /// Name of the collection/table being searched.
    fn collection(&self) -> &str;
}

/// Create and connect the backend selected by `method`.
///
/// A backend is only returned after it answered a health check, so callers
/// that wrap this in a retry loop get "wait until the store is up" semantics.
pub async fn connect_backend(
    method: RetrievalMethod,
    config: &VectorStoreConfig,
    index_name: &str,
) -> Result<Box<dyn VectorStore>, VectorStoreError> {
    let backend: Box<dyn VectorStore> = match method {
        RetrievalMethod::Qdrant => Box::new(QdrantBackend::new(config, index_name)?),
        RetrievalMethod::PgVector => Box::new(PgVectorBackend::new(config, index_name).await?),
    };
    if !backend.health_check().await? {
        return Err(VectorStoreError::ConnectionError(format!(
            "{method} index '{index_name}' failed its health check"
        )));
    }
    Ok(backend)
}

/// Check that a table or collection name is a plain (optionally schema
/// qualified) identifier before it is interpolated into a query.
pub(crate) fn validate_identifier(name: &str) -> Result<(), VectorStoreError> {
    let valid = !name.is_empty()
        && name.split('.').count() <= 2
        && name.split('.').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !part.starts_with(|c: char| c.is_ascii_digit())
        });

    if valid {
        Ok(())
    } else {
        Err(VectorStoreError::InvalidIndexName(name.to_string()))
    }
}

/// Check the result count of a batch call against the number of queries sent.
pub(crate) fn check_batch_len<T>(sent: usize, results: Vec<T>) -> Result<Vec<T>, VectorStoreError> {
    if results.len() == sent {
        Ok(results)
    } else {
        Err(VectorStoreError::BatchMismatch {
            sent,
            received: results.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("code_snippets").is_ok());
        assert!(validate_identifier("rag.code_snippets").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("a.b.c").is_err());
        assert!(validate_identifier("snippets; DROP TABLE x").is_err());
        assert!(validate_identifier("1table").is_err());
        assert!(validate_identifier("code-snippets").is_err());
    }

    #[test]
    fn test_check_batch_len() {
        assert_eq!(check_batch_len(2, vec![1, 2]).unwrap(), vec![1, 2]);
        let err = check_batch_len(3, vec![1]).unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::BatchMismatch {
                sent: 3,
                received: 1
            }
        ));
    }
}
