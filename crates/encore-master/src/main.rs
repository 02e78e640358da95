//! Encore Master -- matchmaking master server for dedicated game nodes.
//!
//! Usage:
//!   encore-master                      # Run with ./encore.toml (or defaults)
//!   encore-master --config path.toml   # Run with custom config
//!   encore-master config               # Print the effective config

use clap::{Parser, Subcommand};

use encore_master::config::MasterConfig;
use encore_master::{expand_tilde, Master};

#[derive(Parser)]
#[command(name = "encore-master", about = "Encore matchmaking master server")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "encore.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the master server (default)
    Run,
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "encore_master=info,encore_coordinator=info,encore_registry=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let cfg = MasterConfig::load_or_default(&config_path)?;

    match cli.command {
        Some(Commands::Config) => {
            print!("{}", cfg.to_toml_string()?);
        }
        Some(Commands::Run) | None => {
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                config = %config_path.display(),
                "starting encore-master"
            );
            let master = Master::start(&cfg).await?;
            tokio::signal::ctrl_c().await?;
            tracing::info!("shutdown signal received");
            master.shutdown().await;
        }
    }

    Ok(())
}
