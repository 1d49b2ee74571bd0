use clap::Args;
use std::future::Future;

use crate::error::AppError;
use crate::models::{Config, ServerConfig};
use crate::pipeline::Pipeline;
use crate::server::{AppState, serve};
use crate::services::EmbeddingRegistry;

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long, help = "Address to bind (overrides [server].host)")]
    pub host: Option<String>,

    #[arg(long, short = 'p', help = "Port to listen on (overrides [server].port)")]
    pub port: Option<u16>,
}

impl ServeArgs {
    fn server_config(&self, base: &ServerConfig) -> ServerConfig {
        ServerConfig {
            host: self.host.clone().unwrap_or_else(|| base.host.clone()),
            port: self.port.unwrap_or(base.port),
        }
    }
}

pub async fn handle_serve<F>(args: ServeArgs, config: &Config, shutdown: F) -> Result<(), AppError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let server_config = args.server_config(&config.server);

    let pipeline = Pipeline::build(config, &EmbeddingRegistry::default()).await?;
    if pipeline.is_empty() {
        tracing::warn!("no pipeline stages configured; /generate will return no events");
    }

    serve(&server_config, AppState::new(pipeline), shutdown).await?;
    Ok(())
}
