//! Streaming HTTP front end for the pipeline.

pub mod protocol;

use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ServerError;
use crate::models::ServerConfig;
use crate::pipeline::{Pipeline, PipelineEvent, RunConfig};
use crate::server::protocol::{ErrorResponse, GenerateRequest, HealthResponse};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    requests_served: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            requests_served: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn requests_served(&self) -> u64 {
        self.requests_served.load(Ordering::Relaxed)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/generate", post(generate))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        stages: state
            .pipeline
            .stage_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
        requests_served: state.requests_served(),
    })
}

async fn generate(State(state): State<AppState>, Json(request): Json<GenerateRequest>) -> Response {
    if request.nl_query_key.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("nl_query_key must not be empty")),
        )
            .into_response();
    }
    state.requests_served.fetch_add(1, Ordering::Relaxed);

    let mut run = RunConfig::with_api_key(request.api_key.clone());
    run.metadata = request.run_metadata();
    let mut input = Map::new();
    input.insert(request.nl_query_key.clone(), request.nl_query);
    let filter = request.event_names;

    tracing::debug!(query_key = %request.nl_query_key, "generate request");

    let events = ReceiverStream::new(state.pipeline.stream(input, run))
        .filter_map(move |event| encode_event(event, filter.as_deref()))
        .map(Ok::<_, std::convert::Infallible>);

    Response::builder()
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from_stream(events))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Render one pipeline event as an NDJSON line.
///
/// Outputs are filtered down to `event_names` when given; a stage whose
/// filtered output is empty produces no line.
pub fn encode_event(event: PipelineEvent, event_names: Option<&[String]>) -> Option<String> {
    let payload = match event {
        PipelineEvent::Output { output, .. } => {
            let output: Map<String, Value> = match event_names {
                Some(names) => output
                    .into_iter()
                    .filter(|(key, _)| names.iter().any(|n| n == key))
                    .collect(),
                None => output,
            };
            if output.is_empty() {
                return None;
            }
            Value::Object(output)
        }
        PipelineEvent::Failed { stage, error } => {
            serde_json::json!({ "error": error, "stage": stage })
        }
    };

    let line = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());
    Some(line + "\n")
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve<F>(config: &ServerConfig, state: AppState, shutdown: F) -> Result<(), ServerError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ServerError::InvalidAddress(format!("{}:{} ({e})", config.host, config.port)))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;

    tracing::info!(%addr, stages = ?state.pipeline.stage_names(), "server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))?;

    tracing::info!("server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn output_event(pairs: &[(&str, Value)]) -> PipelineEvent {
        PipelineEvent::Output {
            stage: pairs[0].0.to_string(),
            output: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn test_encode_output_event() {
        let line = encode_event(output_event(&[("retrieved_codes", json!([]))]), None).unwrap();
        assert_eq!(line, "{\"retrieved_codes\":[]}\n");
    }

    #[test]
    fn test_encode_filters_event_names() {
        let event = output_event(&[("plan", json!("p")), ("plan_raw", json!("raw"))]);
        let names = vec!["plan".to_string()];
        let line = encode_event(event, Some(names.as_slice())).unwrap();
        let parsed: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed, json!({"plan": "p"}));

        let skipped = encode_event(output_event(&[("code", json!("c"))]), Some(names.as_slice()));
        assert!(skipped.is_none());
    }

    #[test]
    fn test_encode_failure_is_never_filtered() {
        let event = PipelineEvent::Failed {
            stage: "retrieved_codes".to_string(),
            error: "invalid input".to_string(),
        };
        let line = encode_event(event, Some(&[][..])).unwrap();
        let parsed: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed["error"], "invalid input");
        assert_eq!(parsed["stage"], "retrieved_codes");
    }
}
