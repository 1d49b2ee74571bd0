//! Embedding providers and the named-model registry they are looked up in.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::EmbeddingError;
use crate::models::{EmbeddingConfig, EmbeddingModelParams};

/// Anything that can turn query text into vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch of queries; the output has one vector per input, in order.
    async fn embed_queries(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Identifier used in logs and status output.
    fn name(&self) -> &str;
}

/// Instruction type sent with every embed request; only queries are embedded here.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
enum InstructionType {
    Query,
}

/// Request body for the /embed endpoint.
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    truncate: Option<bool>,
    instruction_type: InstructionType,
}

/// Response from the /embed endpoint.
#[derive(Debug, Deserialize)]
struct EmbedResponse(Vec<Vec<f32>>);

/// Health response from the /health endpoint.
#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
}

/// Client for an HTTP embedding server exposing `/embed` and `/health`.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    batch_size: usize,
}

impl EmbeddingClient {
    /// Create a new embedding client with the given configuration.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            batch_size: config.batch_size.max(1) as usize,
        })
    }

    /// Check if the embedding server is healthy and ready.
    pub async fn health_check(&self) -> Result<HealthResponse, EmbeddingError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EmbeddingError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::ServerError(format!(
                "health check failed with status: {}",
                response.status()
            )));
        }

        // Server may return an empty or non-JSON body on health check
        let text = response.text().await.unwrap_or_default();
        Ok(serde_json::from_str(&text).unwrap_or(HealthResponse {
            status: Some("healthy".to_string()),
            model_id: None,
        }))
    }

    /// Internal method to embed a single batch.
    async fn embed_single_batch(
        &self,
        texts: &[String],
        instruction_type: InstructionType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embed", self.base_url);
        let request = EmbedRequest {
            inputs: texts,
            truncate: Some(true),
            instruction_type,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::Timeout
                } else {
                    EmbeddingError::RequestError(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ServerError(format!(
                "status {}: {}",
                status, body
            )));
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        if embed_response.0.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embed_response.0.len()
            )));
        }

        Ok(embed_response.0)
    }

    /// Get the base URL of the embedding server.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let embeddings = self
            .embed_single_batch(&[text.to_string()], InstructionType::Query)
            .await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()))
    }

    async fn embed_queries(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let embeddings = self.embed_single_batch(chunk, InstructionType::Query).await?;
            all_embeddings.extend(embeddings);
        }
        Ok(all_embeddings)
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}

type EmbedderFactory =
    Arc<dyn Fn(&EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> + Send + Sync>;

/// Named lookup table of embedding providers.
///
/// `"embedding"` and `"http"` both resolve to [`EmbeddingClient`].
#[derive(Clone)]
pub struct EmbeddingRegistry {
    factories: HashMap<String, EmbedderFactory>,
}

impl Default for EmbeddingRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("embedding", http_factory);
        registry.register("http", http_factory);
        registry
    }
}

fn http_factory(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    Ok(Arc::new(EmbeddingClient::new(config)?))
}

impl EmbeddingRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Build the provider named in `params`, resolving its settings against `base`.
    pub fn create(
        &self,
        params: &EmbeddingModelParams,
        base: &EmbeddingConfig,
    ) -> Result<Arc<dyn Embedder>, EmbeddingError> {
        let factory = self
            .factories
            .get(&params.name)
            .ok_or_else(|| EmbeddingError::UnknownModel(params.name.clone()))?;
        factory(&params.resolve(base))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for EmbeddingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let config = EmbeddingConfig::default();
        let client = EmbeddingClient::new(&config);
        assert!(client.is_ok());
    }

    #[test]
    fn test_base_url_trimming() {
        let config = EmbeddingConfig {
            url: "http://localhost:11411/".to_string(),
            ..Default::default()
        };
        let client = EmbeddingClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "http://localhost:11411");
    }

    #[test]
    fn test_registry_default_names() {
        let registry = EmbeddingRegistry::default();
        assert_eq!(registry.names(), vec!["embedding", "http"]);
    }

    #[test]
    fn test_registry_resolves_override_url() {
        let registry = EmbeddingRegistry::default();
        let params = EmbeddingModelParams {
            url: Some("http://embedder:9000/".to_string()),
            ..Default::default()
        };
        let embedder = registry
            .create(&params, &EmbeddingConfig::default())
            .unwrap();
        assert_eq!(embedder.name(), "http://embedder:9000");
    }

    #[test]
    fn test_registry_unknown_model() {
        let registry = EmbeddingRegistry::default();
        let params = EmbeddingModelParams {
            name: "missing".to_string(),
            ..Default::default()
        };
        let Err(err) = registry.create(&params, &EmbeddingConfig::default()) else {
            panic!("unknown model name should not resolve");
        };
        assert!(matches!(err, EmbeddingError::UnknownModel(name) if name == "missing"));
    }
}
