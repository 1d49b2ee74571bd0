use anyhow::Result;

use crate::cli::output::{StageStatus, StatusInfo, get_formatter};
use crate::models::{Config, ENV_VECTOR_URL, OutputFormat, RetrievalMethod, StageDefinition};
use crate::services::{EmbeddingClient, connect_backend};

/// Probe every dependency once; failures are reported, not retried.
pub async fn handle_status(config: &Config, format: OutputFormat, verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);

    let client = EmbeddingClient::new(&config.embedding)?;
    let (embedding_healthy, embedding_model) = match client.health_check().await {
        Ok(health) => (true, health.model_id),
        Err(e) => {
            if verbose {
                eprintln!("Embedding health check failed: {e}");
            }
            (false, None)
        }
    };

    let mut stages = Vec::with_capacity(config.pipeline.stages.len());
    for definition in &config.pipeline.stages {
        let StageDefinition::Retriever(retriever) = definition;
        let result = connect_backend(
            retriever.method,
            &config.vector_store,
            &retriever.index_name,
        )
        .await;
        stages.push(StageStatus {
            key: retriever.key.clone(),
            method: retriever.method,
            index_name: retriever.index_name.clone(),
            connected: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        });
    }

    let status = StatusInfo {
        embedding_url: client.base_url().to_string(),
        embedding_healthy,
        embedding_model,
        stages,
    };

    print!("{}", formatter.format_status(&status));

    let down: Vec<&StageStatus> = status.stages.iter().filter(|s| !s.connected).collect();
    if !embedding_healthy || !down.is_empty() {
        eprintln!();
        if !embedding_healthy {
            eprintln!(
                "Warning: embedding server not reachable at {}",
                status.embedding_url
            );
        }
        for stage in down {
            if stage.method == RetrievalMethod::Qdrant {
                eprintln!(
                    "Warning: Qdrant not reachable for stage '{}'. Check {} and the API key.",
                    stage.key,
                    ENV_VECTOR_URL
                );
            } else {
                eprintln!(
                    "Warning: PostgreSQL not accessible for stage '{}'. Check connection settings.",
                    stage.key
                );
            }
        }
    }

    Ok(())
}
