use clap::{Parser, Subcommand};
use cses2humio::config::{resolve_config, resolve_config_path, ConfigOverrides};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cses2humio")]
#[command(version)]
#[command(about = "Ships the CrowdStrike Falcon event stream to Humio", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Run,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run) | None => {
            // Default behavior is to run
            let config_path = resolve_config_path(cli.config.as_deref());
            let config = resolve_config(config_path.as_deref(), &cli.overrides)?;

            let default_filter = if config.general.verbose {
                "cses2humio=debug"
            } else {
                "cses2humio=info"
            };
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| default_filter.into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            if let Some(path) = &config_path {
                tracing::info!(config_path = %path.display(), "Loaded configuration file");
            }

            cses2humio::cli::run::run(config).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                cses2humio::cli::config::init(stdout)?;
            }
        },
    }

    Ok(())
}
