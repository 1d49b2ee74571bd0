//! Command-line front end for the retrieval pipeline.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::models::OutputFormat;

/// Retrieval pipeline stage for code generation, with a streaming HTTP server.
#[derive(Debug, Parser)]
#[command(name = "ragpipe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(
        long,
        short = 'c',
        global = true,
        env = "RAGPIPE_CONFIG",
        help = "Path to the configuration file"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        short = 'f',
        global = true,
        help = "Output format: text, json, or markdown"
    )]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the streaming HTTP server
    Serve(commands::ServeArgs),

    /// Run a retriever stage once against the configured index
    Retrieve(commands::RetrieveArgs),

    /// Check embedding server and vector store connectivity
    Status,

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retrieve_args() {
        let cli = Cli::try_parse_from([
            "ragpipe",
            "--format",
            "json",
            "retrieve",
            "reverse a list",
            "sort a map",
            "--stage",
            "retrieved_codes",
        ])
        .unwrap();
        assert_eq!(cli.format, Some(OutputFormat::Json));
        match cli.command {
            Commands::Retrieve(args) => {
                assert_eq!(args.queries.len(), 2);
                assert_eq!(args.stage.as_deref(), Some("retrieved_codes"));
                assert!(!args.json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_serve_overrides() {
        let cli = Cli::try_parse_from(["ragpipe", "serve", "--port", "9000", "-v"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.port, Some(9000));
                assert!(args.host.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_config_init_force() {
        for flag in ["--force", "-F"] {
            let cli = Cli::try_parse_from(["ragpipe", "config", "init", flag]).unwrap();
            assert!(matches!(
                cli.command,
                Commands::Config(commands::ConfigCommand::Init { force: true })
            ));
        }

        let cli = Cli::try_parse_from(["ragpipe", "config", "init", "-f", "json"]).unwrap();
        assert_eq!(cli.format, Some(OutputFormat::Json));
        assert!(matches!(
            cli.command,
            Commands::Config(commands::ConfigCommand::Init { force: false })
        ));
    }

    #[test]
    fn test_retrieve_requires_query() {
        assert!(Cli::try_parse_from(["ragpipe", "retrieve"]).is_err());
    }
}
