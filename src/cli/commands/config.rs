use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::{Path, PathBuf};

use crate::cli::output::{Formatter, get_formatter};
use crate::models::{
    Config, ENV_EMBEDDING_URL, ENV_VECTOR_API_KEY, ENV_VECTOR_URL, OutputFormat, StageDefinition,
};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Write a default configuration file")]
    Init {
        #[arg(long, short = 'F', help = "Force overwrite existing config")]
        force: bool,
    },
    #[command(about = "Show the effective configuration")]
    Show,
    #[command(about = "Show the configuration file path")]
    Path,
}

pub async fn handle_config(
    cmd: ConfigCommand,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let formatter = get_formatter(format);

    match cmd {
        ConfigCommand::Init { force } => handle_init(config_path, force, formatter.as_ref()),
        ConfigCommand::Show => handle_show(config_path, format),
        ConfigCommand::Path => handle_path(config_path),
    }
}

fn target_path(config_path: Option<&Path>) -> Result<PathBuf> {
    config_path
        .map(Path::to_path_buf)
        .or_else(Config::config_path)
        .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))
}

fn handle_init(config_path: Option<&Path>, force: bool, formatter: &dyn Formatter) -> Result<()> {
    let path = target_path(config_path)?;

    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at: {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let written = Config::default()
        .save(Some(&path))
        .context("failed to write config")?;
    println!(
        "{}",
        formatter.format_message(&format!("Created config at: {}", written.display()))
    );
    Ok(())
}

fn handle_show(config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let mut config = Config::load(config_path)?;
    if config.vector_store.api_key.is_some() {
        config.vector_store.api_key = Some("********".to_string());
    }

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let path = target_path(config_path)?;
    if path.exists() {
        println!("# Loaded from: {}", path.display());
    } else {
        println!("# No config file; showing defaults");
    }
    println!();

    print!(
        "{}",
        toml::to_string_pretty(&config).context("failed to render config")?
    );

    let stages: Vec<&str> = config
        .pipeline
        .stages
        .iter()
        .map(StageDefinition::key)
        .collect();
    println!();
    println!("# Stages: {}", stages.join(", "));

    Ok(())
}

fn handle_path(config_path: Option<&Path>) -> Result<()> {
    let path = target_path(config_path)?;

    println!("Configuration paths:");
    println!();
    if path.exists() {
        println!("Config (active): {}", path.display());
    } else {
        println!("Config (would be): {}", path.display());
    }

    if let Ok(cwd) = std::env::current_dir() {
        let env_path = cwd.join(".env");
        if env_path.exists() {
            println!(".env file (active): {}", env_path.display());
        } else {
            println!(".env file (would be): {}", env_path.display());
        }
    }

    println!();
    println!("Environment overrides: {ENV_VECTOR_URL}, {ENV_VECTOR_API_KEY}, {ENV_EMBEDDING_URL}");

    Ok(())
}
