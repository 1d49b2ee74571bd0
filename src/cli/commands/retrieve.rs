use anyhow::{Context, Result};
use clap::Args;
use serde_json::{Map, Value};
use std::time::Instant;

use crate::cli::output::{RetrievalOutput, get_formatter};
use crate::models::{Config, OutputFormat, QueryInput, RetrieverConfig, StageDefinition};
use crate::pipeline::{RetrieverStage, RetryingInvoker, RunConfig, Stage};
use crate::services::EmbeddingRegistry;

#[derive(Debug, Args)]
pub struct RetrieveArgs {
    #[arg(
        required = true,
        help = "Query text; several queries are searched as one batch"
    )]
    pub queries: Vec<String>,

    #[arg(long, help = "Parse each query as a JSON value (list or object input)")]
    pub json: bool,

    #[arg(long, short = 's', help = "Output key of the retriever stage to run")]
    pub stage: Option<String>,
}

pub async fn handle_retrieve(
    args: RetrieveArgs,
    config: &Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let stage_config = select_stage(config, args.stage.as_deref())?;
    let payload = build_payload(&args.queries, args.json)?;
    let shape = QueryInput::classify(&stage_config.query_key, &payload)?.kind();
    let formatter = get_formatter(format);

    if verbose {
        eprintln!("Stage: {}", stage_config.key);
        eprintln!("  Method: {}", stage_config.method);
        eprintln!("  Index: {}", stage_config.index_name);
        eprintln!("  Input: {shape}");
        eprintln!("  k: {}", stage_config.search_kwargs.k);
    }

    let start_time = Instant::now();
    let stage = RetrieverStage::connect(
        stage_config.clone(),
        &config.vector_store,
        &config.embedding,
        &EmbeddingRegistry::default(),
        RetryingInvoker::new(config.retry.clone()),
    )
    .await
    .with_context(|| format!("failed to build retriever stage '{}'", stage_config.key))?;
    let connect_ms = start_time.elapsed().as_millis();

    let mut input = Map::new();
    input.insert(stage_config.query_key.clone(), payload);

    let search_start = Instant::now();
    let mut output = stage
        .invoke(&input, &RunConfig::default())
        .await
        .context("retrieval failed")?;
    let search_ms = search_start.elapsed().as_millis();

    if verbose {
        eprintln!("Timing:");
        eprintln!("  Connect: {connect_ms}ms");
        eprintln!("  Retrieval: {search_ms}ms");
        eprintln!();
    }

    let results = RetrievalOutput {
        stage: stage_config.key.clone(),
        shape: shape.to_string(),
        value: output.remove(&stage_config.key).unwrap_or(Value::Array(Vec::new())),
        duration_ms: start_time.elapsed().as_millis() as u64,
    };

    print!("{}", formatter.format_retrieval(&results));

    Ok(())
}

fn select_stage<'a>(config: &'a Config, key: Option<&str>) -> Result<&'a RetrieverConfig> {
    let mut retrievers = config.pipeline.stages.iter().map(|stage| match stage {
        StageDefinition::Retriever(retriever) => retriever,
    });

    match key {
        Some(key) => retrievers
            .find(|r| r.key == key)
            .ok_or_else(|| anyhow::anyhow!("no retriever stage with key '{key}'")),
        None => retrievers
            .next()
            .ok_or_else(|| anyhow::anyhow!("no retriever stage configured")),
    }
}

/// Turn command-line queries into the stage's input value.
///
/// One query stays a scalar; several become a list.
fn build_payload(queries: &[String], json: bool) -> Result<Value> {
    let mut values = queries
        .iter()
        .map(|q| {
            if json {
                serde_json::from_str(q).with_context(|| format!("invalid JSON query: {q}"))
            } else {
                Ok(Value::String(q.clone()))
            }
        })
        .collect::<Result<Vec<Value>>>()?;

    if values.len() == 1 {
        Ok(values.remove(0))
    } else {
        Ok(Value::Array(values))
    }
}
