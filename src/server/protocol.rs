use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_QUERY_KEY: &str = "problem";

/// Body of `POST /generate`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    /// Pipeline input; any JSON value, stored under `nl_query_key`.
    pub nl_query: Value,

    #[serde(default = "default_query_key")]
    pub nl_query_key: String,

    /// Credential forwarded to downstream stages for this request only.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Only report outputs with these names.
    #[serde(default)]
    pub event_names: Option<Vec<String>>,

    /// Generation settings passed through untouched to downstream stages.
    #[serde(default)]
    pub llm_kwargs: Option<Value>,

    #[serde(default)]
    pub candidate_num: Option<u32>,
}

fn default_query_key() -> String {
    DEFAULT_QUERY_KEY.to_string()
}

impl GenerateRequest {
    /// Extra per-request settings for [`crate::pipeline::RunConfig::metadata`].
    pub fn run_metadata(&self) -> Map<String, Value> {
        let mut metadata = Map::new();
        if let Some(ref kwargs) = self.llm_kwargs {
            metadata.insert("llm_kwargs".to_string(), kwargs.clone());
        }
        if let Some(n) = self.candidate_num {
            metadata.insert("candidate_num".to_string(), Value::from(n));
        }
        metadata
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub stages: Vec<String>,
    pub requests_served: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
