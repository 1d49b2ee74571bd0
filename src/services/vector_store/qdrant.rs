//! Qdrant vector store backend implementation.

use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{ScoredPoint, SearchBatchPointsBuilder, SearchPointsBuilder};
use serde_json::{Map, Number, Value};

use super::{VectorStore, check_batch_len};
use crate::error::VectorStoreError;
use crate::models::{Document, SearchParams, VectorStoreConfig};

/// Payload fields that may hold the document text, in lookup order.
const CONTENT_FIELDS: [&str; 3] = ["page_content", "content", "text"];

/// Qdrant vector store backend.
pub struct QdrantBackend {
    client: Qdrant,
    collection: String,
}

impl QdrantBackend {
    /// Build a client for `collection`. Does not touch the network.
    pub fn new(config: &VectorStoreConfig, collection: &str) -> Result<Self, VectorStoreError> {
        let url = config
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| VectorStoreError::MissingCredential("vector store url".to_string()))?;

        let mut builder = Qdrant::from_url(url);

        match config.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(api_key) => builder = builder.api_key(api_key.to_string()),
            None if config.allow_anonymous => {}
            None => {
                return Err(VectorStoreError::MissingCredential(
                    "vector store api_key".to_string(),
                ));
            }
        }

        let client = builder
            .build()
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            collection: collection.to_string(),
        })
    }

    fn search_builder(&self, query_vector: Vec<f32>, params: &SearchParams) -> SearchPointsBuilder {
        let mut builder = SearchPointsBuilder::new(&self.collection, query_vector, params.k)
            .with_payload(true);

        if let Some(score) = params.score_threshold {
            builder = builder.score_threshold(score);
        }

        builder
    }
}

#[async_trait]
impl VectorStore for QdrantBackend {
    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        self.client
            .health_check()
            .await
            .map(|_| true)
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))
    }

    async fn search(
        &self,
        query_vector: Vec<f32>,
        params: &SearchParams,
    ) -> Result<Vec<Document>, VectorStoreError> {
        let results = self
            .client
            .search_points(self.search_builder(query_vector, params))
            .await
            .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

        Ok(results.result.into_iter().map(point_to_document).collect())
    }

    async fn search_batch(
        &self,
        query_vectors: Vec<Vec<f32>>,
        params: &SearchParams,
    ) -> Result<Vec<Vec<Document>>, VectorStoreError> {
        if query_vectors.is_empty() {
            return Ok(Vec::new());
        }

        let sent = query_vectors.len();
        let searches: Vec<_> = query_vectors
            .into_iter()
            .map(|v| self.search_builder(v, params).build())
            .collect();

        let response = self
            .client
            .search_batch_points(SearchBatchPointsBuilder::new(&self.collection, searches))
            .await
            .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

        let grouped: Vec<Vec<Document>> = response
            .result
            .into_iter()
            .map(|batch| batch.result.into_iter().map(point_to_document).collect())
            .collect();

        check_batch_len(sent, grouped)
    }

    fn collection(&self) -> &str {
        &self.collection
    }
}

/// Turn a scored point into a document: the text field becomes the content,
/// every other payload entry is kept as metadata together with id and score.
fn point_to_document(point: ScoredPoint) -> Document {
    let mut metadata = Map::new();
    let mut content = None;
    let mut payload = point.payload;

    for field in CONTENT_FIELDS {
        let Some(value) = payload.remove(field) else {
            continue;
        };
        match qdrant_to_json(value.kind) {
            Value::String(text) => {
                content = Some(text);
                break;
            }
            other => {
                metadata.insert(field.to_string(), other);
            }
        }
    }

    let mut rest: Vec<_> = payload.into_iter().collect();
    rest.sort_by(|a, b| a.0.cmp(&b.0));
    for (key, value) in rest {
        metadata.insert(key, qdrant_to_json(value.kind));
    }

    if let Some(id) = point.id.and_then(|id| id.point_id_options) {
        let id = match id {
            PointIdOptions::Uuid(uuid) => Value::String(uuid),
            PointIdOptions::Num(num) => Value::from(num),
        };
        metadata.insert("id".to_string(), id);
    }
    metadata.insert("score".to_string(), Value::from(f64::from(point.score)));

    Document {
        page_content: content.unwrap_or_default(),
        metadata,
    }
}

fn qdrant_to_json(kind: Option<Kind>) -> Value {
    match kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(n)) => Value::from(n),
        Some(Kind::DoubleValue(d)) => Number::from_f64(d).map_or(Value::Null, Value::Number),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => Value::Array(
            list.values
                .into_iter()
                .map(|v| qdrant_to_json(v.kind))
                .collect(),
        ),
        Some(Kind::StructValue(st)) => {
            let mut fields: Vec<_> = st.fields.into_iter().collect();
            fields.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, qdrant_to_json(v.kind)))
                    .collect(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(url: Option<&str>, api_key: Option<&str>, anonymous: bool) -> VectorStoreConfig {
        VectorStoreConfig {
            url: url.map(str::to_string),
            api_key: api_key.map(str::to_string),
            allow_anonymous: anonymous,
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_url() {
        let err = QdrantBackend::new(&config(None, Some("k"), false), "c")
            .err()
            .unwrap();
        assert!(matches!(err, VectorStoreError::MissingCredential(_)));
    }

    #[test]
    fn test_missing_api_key() {
        let err = QdrantBackend::new(&config(Some("http://localhost:6334"), None, false), "c")
            .err()
            .unwrap();
        assert!(matches!(err, VectorStoreError::MissingCredential(_)));
    }

    #[test]
    fn test_anonymous_allowed() {
        let backend =
            QdrantBackend::new(&config(Some("http://localhost:6334"), None, true), "snippets")
                .unwrap();
        assert_eq!(backend.collection(), "snippets");
    }

    #[test]
    fn test_point_to_document() {
        let mut payload: HashMap<String, qdrant_client::qdrant::Value> = HashMap::new();
        payload.insert("content".to_string(), "fallback".into());
        payload.insert("page_content".to_string(), "def add(a, b):".into());
        payload.insert("source".to_string(), "utils.py".into());
        payload.insert("line".to_string(), 12_i64.into());

        let point = ScoredPoint {
            id: Some(7_u64.into()),
            payload,
            score: 0.5,
            ..Default::default()
        };

        let doc = point_to_document(point);
        assert_eq!(doc.page_content, "def add(a, b):");
        assert_eq!(doc.source(), Some("utils.py"));
        assert_eq!(doc.metadata["line"], 12);
        assert_eq!(doc.metadata["id"], 7);
        assert_eq!(doc.score(), Some(0.5));
        assert!(!doc.metadata.contains_key("page_content"));
        assert_eq!(doc.metadata["content"], "fallback");
    }
}
