//! Pipeline stages and the sequential runner that chains them.

mod invoker;
mod retriever;

pub use invoker::RetryingInvoker;
pub use retriever::{RetrieverStage, Retrieved, assemble};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{PipelineError, StageError};
use crate::models::{Config, StageDefinition};
use crate::services::EmbeddingRegistry;

/// Per-invocation settings handed to every stage.
///
/// Credentials travel here instead of through the process environment so
/// that concurrent requests can carry different keys.
#[derive(Clone, Default)]
pub struct RunConfig {
    pub api_key: Option<String>,
    pub metadata: Map<String, Value>,
}

impl RunConfig {
    pub fn with_api_key(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.is_empty()),
            metadata: Map::new(),
        }
    }
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// One node of the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Unique stage name; also the event name its output is reported under.
    fn name(&self) -> &str;

    /// Run the stage over the accumulated state and return its own outputs.
    async fn invoke(
        &self,
        input: &Map<String, Value>,
        run: &RunConfig,
    ) -> Result<Map<String, Value>, StageError>;
}

/// Progress report emitted while a pipeline runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Output {
        stage: String,
        output: Map<String, Value>,
    },
    Failed {
        stage: String,
        error: String,
    },
}

/// Ordered list of stages sharing one state mapping.
#[derive(Clone)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Result<Self, PipelineError> {
        let mut seen = HashSet::new();
        for stage in &stages {
            if !seen.insert(stage.name().to_string()) {
                return Err(PipelineError::DuplicateStage(stage.name().to_string()));
            }
        }
        Ok(Self { stages })
    }

    /// Build every configured stage, connecting to its backend.
    pub async fn build(config: &Config, registry: &EmbeddingRegistry) -> Result<Self, PipelineError> {
        let invoker = RetryingInvoker::new(config.retry.clone());
        let mut stages: Vec<Arc<dyn Stage>> = Vec::with_capacity(config.pipeline.stages.len());

        for definition in &config.pipeline.stages {
            let stage: Arc<dyn Stage> = match definition {
                StageDefinition::Retriever(retriever) => Arc::new(
                    RetrieverStage::connect(
                        retriever.clone(),
                        &config.vector_store,
                        &config.embedding,
                        registry,
                        invoker.clone(),
                    )
                    .await
                    .map_err(|source| PipelineError::Stage {
                        stage: definition.key().to_string(),
                        source,
                    })?,
                ),
            };
            stages.push(stage);
        }

        Self::new(stages)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run all stages and return the final state (inputs plus every output).
    pub async fn run(
        &self,
        input: Map<String, Value>,
        run: &RunConfig,
    ) -> Result<Map<String, Value>, PipelineError> {
        let mut state = input;
        for stage in &self.stages {
            let output = stage
                .invoke(&state, run)
                .await
                .map_err(|source| PipelineError::Stage {
                    stage: stage.name().to_string(),
                    source,
                })?;
            state.extend(output);
        }
        Ok(state)
    }

    /// Run the pipeline on a background task, reporting each stage as it finishes.
    ///
    /// The stream ends after the last stage or the first failure. Dropping
    /// the receiver stops the run once the current stage completes.
    pub fn stream(&self, input: Map<String, Value>, run: RunConfig) -> mpsc::Receiver<PipelineEvent> {
        let (tx, rx) = mpsc::channel(self.stages.len().max(1));
        let stages = self.stages.clone();

        tokio::spawn(async move {
            let mut state = input;
            for stage in stages {
                let event = match stage.invoke(&state, &run).await {
                    Ok(output) => {
                        state.extend(output.clone());
                        PipelineEvent::Output {
                            stage: stage.name().to_string(),
                            output,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(stage = stage.name(), error = %e, "stage failed");
                        PipelineEvent::Failed {
                            stage: stage.name().to_string(),
                            error: e.to_string(),
                        }
                    }
                };

                let failed = matches!(event, PipelineEvent::Failed { .. });
                if tx.send(event).await.is_err() {
                    tracing::debug!("pipeline receiver dropped, stopping");
                    return;
                }
                if failed {
                    return;
                }
            }
        });

        rx
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}
