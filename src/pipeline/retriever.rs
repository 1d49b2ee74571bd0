//! The retriever stage: normalize the query payload, search with retry, and
//! shape the documents into the stage output.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::invoker::RetryingInvoker;
use super::{RunConfig, Stage};
use crate::error::StageError;
use crate::models::{Document, EmbeddingConfig, QueryInput, RetrieverConfig, VectorStoreConfig};
use crate::services::{EmbeddingRegistry, SimilaritySearch, VectorStoreClient};

/// Raw search results, still grouped the way they were fetched.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieved {
    /// Scalar and keyed-map input: one flat list.
    Flat(Vec<Document>),
    /// Sequence input: one list per query, in query order.
    Batched(Vec<Vec<Document>>),
}

pub struct RetrieverStage {
    config: RetrieverConfig,
    client: Arc<dyn SimilaritySearch>,
    invoker: RetryingInvoker,
}

impl RetrieverStage {
    pub fn new(
        config: RetrieverConfig,
        client: Arc<dyn SimilaritySearch>,
        invoker: RetryingInvoker,
    ) -> Self {
        Self {
            config,
            client,
            invoker,
        }
    }

    /// Build the embedder from the registry and connect to the configured index.
    pub async fn connect(
        config: RetrieverConfig,
        vector_store: &VectorStoreConfig,
        embedding: &EmbeddingConfig,
        registry: &EmbeddingRegistry,
        invoker: RetryingInvoker,
    ) -> Result<Self, StageError> {
        let embedder = registry
            .create(&config.embedding_model, embedding)
            .map_err(|e| StageError::Construction(e.to_string()))?;

        let client = VectorStoreClient::connect(
            config.method,
            vector_store,
            &config.index_name,
            embedder,
            config.search_kwargs.clone(),
            invoker.policy(),
        )
        .await?;

        Ok(Self::new(config, Arc::new(client), invoker))
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Run the searches for an already classified input.
    pub async fn retrieve(&self, input: &QueryInput) -> Result<Retrieved, StageError> {
        match input {
            QueryInput::Scalar(query) => {
                let docs = self
                    .invoker
                    .invoke("retrieval", || self.client.search_one(query))
                    .await?;
                Ok(Retrieved::Flat(docs))
            }
            QueryInput::Sequence(queries) => {
                if queries.is_empty() {
                    return Ok(Retrieved::Batched(Vec::new()));
                }
                let grouped = self
                    .invoker
                    .invoke("batch retrieval", || self.client.search_batch(queries))
                    .await?;
                Ok(Retrieved::Batched(grouped))
            }
            QueryInput::KeyedMap(entries) => {
                let mut docs = Vec::new();
                for (_, query) in entries {
                    let found = self
                        .invoker
                        .invoke("retrieval", || self.client.search_one(query))
                        .await?;
                    docs.extend(found);
                }
                Ok(Retrieved::Flat(docs))
            }
        }
    }
}

/// Shape retrieved documents into the stage output mapping.
///
/// Batched results are merged into a single list wrapped in a one-element
/// list; the output key is present even when nothing was found.
pub fn assemble(key: &str, retrieved: Retrieved) -> Map<String, Value> {
    let value = match retrieved {
        Retrieved::Flat(docs) => Value::Array(docs.into_iter().map(Value::from).collect()),
        Retrieved::Batched(groups) => {
            let merged: Vec<Value> = groups.into_iter().flatten().map(Value::from).collect();
            Value::Array(vec![Value::Array(merged)])
        }
    };

    let mut output = Map::new();
    output.insert(key.to_string(), value);
    output
}

#[async_trait]
impl Stage for RetrieverStage {
    fn name(&self) -> &str {
        &self.config.key
    }

    async fn invoke(
        &self,
        input: &Map<String, Value>,
        _run: &RunConfig,
    ) -> Result<Map<String, Value>, StageError> {
        let value = input
            .get(&self.config.query_key)
            .ok_or_else(|| StageError::MissingField(self.config.query_key.clone()))?;

        let query = QueryInput::classify(&self.config.query_key, value)?;
        tracing::debug!(
            stage = %self.config.key,
            shape = query.kind(),
            queries = query.len(),
            "retrieving"
        );

        let retrieved = self.retrieve(&query).await?;
        Ok(assemble(&self.config.key, retrieved))
    }
}
