use std::future::Future;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use ragpipe::cli::commands::{handle_config, handle_retrieve, handle_serve, handle_status};
use ragpipe::cli::{Cli, Commands};
use ragpipe::models::Config;

fn init_tracing(verbose: bool) {
    let default = if verbose { "ragpipe=debug" } else { "ragpipe=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let format = cli.format.unwrap_or_default();
    let verbose = cli.verbose;
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Config(cmd) => handle_config(cmd, config_path, format).await?,
        Commands::Serve(args) => {
            let config = Config::load(config_path)?;
            handle_serve(args, &config, shutdown_signal()).await?;
        }
        Commands::Retrieve(args) => {
            let config = Config::load(config_path)?;
            interruptible(handle_retrieve(args, &config, format, verbose)).await?;
        }
        Commands::Status => {
            let config = Config::load(config_path)?;
            interruptible(handle_status(&config, format, verbose)).await?;
        }
    }

    Ok(())
}

/// Run a one-shot command, abandoning it on Ctrl-C or SIGTERM.
async fn interruptible<F>(command: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::select! {
        result = command => result,
        _ = shutdown_signal() => {
            eprintln!("\nReceived shutdown signal, cleaning up...");
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
