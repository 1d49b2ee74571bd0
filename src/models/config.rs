use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::utils::RetryPolicy;

pub const DEFAULT_EMBEDDING_URL: &str = "http://localhost:11411";
pub const DEFAULT_EMBEDDING_MODEL: &str = "embedding";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SEARCH_K: u64 = 4;

pub const ENV_VECTOR_URL: &str = "RAGPIPE_VECTOR_URL";
pub const ENV_VECTOR_API_KEY: &str = "RAGPIPE_VECTOR_API_KEY";
pub const ENV_EMBEDDING_URL: &str = "RAGPIPE_EMBEDDING_URL";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ragpipe").join("config.toml"))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file yields the default config; a missing explicit
    /// file is an error. Environment overrides are applied afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path().ok_or_else(|| {
                ConfigError::PathError("could not determine config directory".to_string())
            })?,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Overlay connection settings from the environment.
    ///
    /// Only read once at startup; nothing in the crate writes the environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_VECTOR_URL).filter(|s| !s.is_empty()) {
            self.vector_store.url = Some(url);
        }
        if let Some(key) = lookup(ENV_VECTOR_API_KEY).filter(|s| !s.is_empty()) {
            self.vector_store.api_key = Some(key);
        }
        if let Some(url) = lookup(ENV_EMBEDDING_URL).filter(|s| !s.is_empty()) {
            self.embedding.url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.batch_size must be at least 1".to_string(),
            ));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "retry.multiplier must be a finite number >= 1.0, got {}",
                self.retry.multiplier
            )));
        }

        let mut seen = HashSet::new();
        for stage in &self.pipeline.stages {
            let StageDefinition::Retriever(retriever) = stage;
            retriever.validate()?;
            if !seen.insert(retriever.key.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate stage output key: {}",
                    retriever.key
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub url: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_embedding_url() -> String {
    DEFAULT_EMBEDDING_URL.to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_batch_size() -> u32 {
    8
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            timeout_secs: default_timeout(),
            batch_size: default_batch_size(),
        }
    }
}

/// Connection settings shared by every retriever stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Accept a Qdrant endpoint without an API key (local development).
    #[serde(default)]
    pub allow_anonymous: bool,

    #[serde(default = "default_pool_max")]
    pub pool_max: u32,

    #[serde(default = "default_pool_acquire_timeout")]
    pub pool_acquire_timeout: u32,
}

fn default_pool_max() -> u32 {
    5
}

fn default_pool_acquire_timeout() -> u32 {
    30
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            allow_anonymous: false,
            pool_max: default_pool_max(),
            pool_acquire_timeout: default_pool_acquire_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub stages: Vec<StageDefinition>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: vec![StageDefinition::Retriever(RetrieverConfig::default())],
        }
    }
}

/// One entry of `[[pipeline.stages]]`, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageDefinition {
    Retriever(RetrieverConfig),
}

impl StageDefinition {
    pub fn key(&self) -> &str {
        match self {
            StageDefinition::Retriever(r) => &r.key,
        }
    }
}

/// Backend used for similarity search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMethod {
    #[default]
    Qdrant,
    PgVector,
}

impl std::fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetrievalMethod::Qdrant => write!(f, "qdrant"),
            RetrievalMethod::PgVector => write!(f, "pgvector"),
        }
    }
}

/// Immutable configuration of a retriever stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieverConfig {
    /// Output key the retrieved documents are stored under.
    pub key: String,

    #[serde(default)]
    pub method: RetrievalMethod,

    /// Input field holding the query payload.
    pub query_key: String,

    /// Qdrant collection or PostgreSQL table name.
    pub index_name: String,

    #[serde(default)]
    pub embedding_model: EmbeddingModelParams,

    #[serde(default)]
    pub search_kwargs: SearchParams,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            key: "retrieved_codes".to_string(),
            method: RetrievalMethod::default(),
            query_key: "retrieval_queries".to_string(),
            index_name: "code_snippets".to_string(),
            embedding_model: EmbeddingModelParams::default(),
            search_kwargs: SearchParams::default(),
        }
    }
}

impl RetrieverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("key", &self.key),
            ("query_key", &self.query_key),
            ("index_name", &self.index_name),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "retriever stage {name} must not be empty"
                )));
            }
        }
        if self.search_kwargs.k == 0 {
            return Err(ConfigError::ValidationError(format!(
                "retriever stage '{}': search_kwargs.k must be at least 1",
                self.key
            )));
        }
        if let Some(score) = self.search_kwargs.score_threshold
            && !(0.0..=1.0).contains(&score)
        {
            return Err(ConfigError::ValidationError(format!(
                "retriever stage '{}': score_threshold must be between 0.0 and 1.0",
                self.key
            )));
        }
        Ok(())
    }
}

/// Per-stage embedding model selection, overriding `[embedding]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingModelParams {
    /// Registry name of the embedding provider.
    #[serde(default = "default_model_name")]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
}

fn default_model_name() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

impl Default for EmbeddingModelParams {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            url: None,
            timeout_secs: None,
            batch_size: None,
        }
    }
}

impl EmbeddingModelParams {
    /// Resolve against the global embedding section.
    pub fn resolve(&self, base: &EmbeddingConfig) -> EmbeddingConfig {
        EmbeddingConfig {
            url: self.url.clone().unwrap_or_else(|| base.url.clone()),
            timeout_secs: self.timeout_secs.unwrap_or(base.timeout_secs),
            batch_size: self.batch_size.unwrap_or(base.batch_size),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchParams {
    /// Number of documents returned per query.
    #[serde(default = "default_k")]
    pub k: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f32>,
}

fn default_k() -> u64 {
    DEFAULT_SEARCH_K
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            k: default_k(),
            score_threshold: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.embedding.url, DEFAULT_EMBEDDING_URL);
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.pipeline.stages.len(), 1);
        assert!(config.vector_store.url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_path() {
        if let Some(path) = Config::config_path() {
            assert!(path.ends_with("ragpipe/config.toml"));
        }
    }

    #[test]
    fn test_parse_pipeline_stages() {
        let toml_str = r#"
            [vector_store]
            url = "http://qdrant:6334"

            [retry]
            max_attempts = 0

            [[pipeline.stages]]
            type = "retriever"
            key = "retrieved_codes"
            method = "pgvector"
            query_key = "retrieval_queries"
            index_name = "snippets"

            [pipeline.stages.search_kwargs]
            k = 8

            [pipeline.stages.embedding_model]
            url = "http://embed:9000"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.retry.is_unbounded());
        let StageDefinition::Retriever(stage) = &config.pipeline.stages[0];
        assert_eq!(stage.method, RetrievalMethod::PgVector);
        assert_eq!(stage.search_kwargs.k, 8);
        assert_eq!(stage.embedding_model.name, DEFAULT_EMBEDDING_MODEL);

        let resolved = stage.embedding_model.resolve(&config.embedding);
        assert_eq!(resolved.url, "http://embed:9000");
        assert_eq!(resolved.batch_size, 8);
    }

    #[test]
    fn test_unknown_method_rejected() {
        let toml_str = r#"
            [[pipeline.stages]]
            type = "retriever"
            key = "k"
            method = "elasticsearch"
            query_key = "q"
            index_name = "i"
        "#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn test_validate_duplicate_keys() {
        let mut config = Config::default();
        config
            .pipeline
            .stages
            .push(StageDefinition::Retriever(RetrieverConfig::default()));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_retry_multiplier() {
        for bad in ["multiplier = inf", "multiplier = nan", "multiplier = 0.5"] {
            let config: Config = toml::from_str(&format!("[retry]\n{bad}")).unwrap();
            assert!(
                matches!(config.validate(), Err(ConfigError::ValidationError(_))),
                "{bad} should be rejected"
            );
        }
        let config: Config = toml::from_str("[retry]\nmultiplier = 1.5").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_k() {
        let mut stage = RetrieverConfig::default();
        stage.search_kwargs.k = 0;
        assert!(stage.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(|name| match name {
            ENV_VECTOR_URL => Some("http://vectors:6334".to_string()),
            ENV_VECTOR_API_KEY => Some("secret".to_string()),
            _ => None,
        });
        assert_eq!(config.vector_store.url.as_deref(), Some("http://vectors:6334"));
        assert_eq!(config.vector_store.api_key.as_deref(), Some("secret"));
        assert_eq!(config.embedding.url, DEFAULT_EMBEDDING_URL);
    }

    #[test]
    fn test_save_and_load_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.server.port = 9191;
        let written = config.save(Some(&path)).unwrap();
        assert_eq!(written, path);

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.server.port, 9191);
        assert_eq!(loaded.pipeline.stages[0].key(), "retrieved_codes");
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            Config::load(Some(&missing)),
            Err(ConfigError::IoError(_))
        ));
    }
}
