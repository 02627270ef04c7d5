use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use volley::commands;
use volley::config::Config;

#[derive(Parser)]
#[command(
    name = "volley",
    version,
    about = "Bulk message dispatcher with account rotation and proxy failover",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    /// Configuration file (falls back to environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a dispatch job described by a TOML job file
    Run {
        /// Path to the job file
        #[arg(short, long)]
        job: PathBuf,

        /// Proxy list to import before starting (one endpoint per line)
        #[arg(long)]
        proxies: Option<PathBuf>,
    },

    /// Show progress for one job or all jobs
    Status {
        /// Job id (omit to list everything)
        #[arg(short, long)]
        job_id: Option<String>,
    },

    /// Serve job status and metrics over HTTP
    Serve {
        /// Listen address
        #[arg(short, long, default_value = "127.0.0.1:9090")]
        addr: String,
    },

    /// Import an account session credential
    ImportSession {
        /// Account identifier
        #[arg(short, long)]
        account_id: String,

        /// File holding the credential token
        #[arg(short, long)]
        token_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_tracing(&cli.log_format, cli.verbose)?;

    if let Err(e) = volley::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without");
    }

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    tracing::info!("volley dispatcher starting");

    match cli.command {
        Commands::Run { job, proxies } => {
            tracing::info!(job = %job.display(), "Starting run command");
            commands::run::execute(job, proxies, config).await?;
        }

        Commands::Status { job_id } => {
            commands::status::execute(job_id, config).await?;
        }

        Commands::Serve { addr } => {
            tracing::info!(addr = %addr, "Starting serve command");
            commands::serve::execute(addr, config).await?;
        }

        Commands::ImportSession {
            account_id,
            token_file,
        } => {
            commands::accounts::import_session(account_id, token_file, config).await?;
        }
    }

    tracing::info!("volley completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("volley=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("volley=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
