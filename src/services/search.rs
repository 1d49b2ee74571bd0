//! Text-level similarity search: embed the query, then ask the vector store.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{SearchError, StageError};
use crate::models::{Document, RetrievalMethod, SearchParams, VectorStoreConfig};
use crate::services::embedding::Embedder;
use crate::services::vector_store::{VectorStore, check_batch_len, connect_backend};
use crate::utils::{RetryPolicy, RetryResult, with_retry};

/// Query-text search as seen by a retriever stage.
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    /// Top-k documents for one query.
    async fn search_one(&self, query: &str) -> Result<Vec<Document>, SearchError>;

    /// One result list per query; `result[i]` belongs to `queries[i]`.
    async fn search_batch(&self, queries: &[String]) -> Result<Vec<Vec<Document>>, SearchError>;
}

/// A connected vector store plus the embedder used to vectorize queries.
pub struct VectorStoreClient {
    store: Box<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    params: SearchParams,
}

impl VectorStoreClient {
    pub fn new(store: Box<dyn VectorStore>, embedder: Arc<dyn Embedder>, params: SearchParams) -> Self {
        Self {
            store,
            embedder,
            params,
        }
    }

    /// Connect to the backend, retrying under `policy` until it answers.
    pub async fn connect(
        method: RetrievalMethod,
        config: &VectorStoreConfig,
        index_name: &str,
        embedder: Arc<dyn Embedder>,
        params: SearchParams,
        policy: &RetryPolicy,
    ) -> Result<Self, StageError> {
        let operation = format!("connecting to {method} index '{index_name}'");
        let store = match with_retry(policy, &operation, || {
            connect_backend(method, config, index_name)
        })
        .await
        {
            RetryResult::Success(store) => store,
            RetryResult::Failed {
                last_error,
                attempts,
            } => {
                return Err(StageError::BackendUnavailable {
                    attempts,
                    last_error: last_error.to_string(),
                });
            }
        };

        tracing::info!(
            method = %method,
            index = store.collection(),
            embedder = embedder.name(),
            k = params.k,
            "vector store connected"
        );

        Ok(Self::new(store, embedder, params))
    }

    pub fn collection(&self) -> &str {
        self.store.collection()
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }
}

#[async_trait]
impl SimilaritySearch for VectorStoreClient {
    async fn search_one(&self, query: &str) -> Result<Vec<Document>, SearchError> {
        let vector = self.embedder.embed_query(query).await?;
        Ok(self.store.search(vector, &self.params).await?)
    }

    async fn search_batch(&self, queries: &[String]) -> Result<Vec<Vec<Document>>, SearchError> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.embedder.embed_queries(queries).await?;
        let vectors = check_batch_len(queries.len(), vectors)?;
        let results = self.store.search_batch(vectors, &self.params).await?;
        Ok(check_batch_len(queries.len(), results)?)
    }
}
