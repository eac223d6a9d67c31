//! # Main: CLI Entry Point
//!
//! ## Subcommands
//!
//! - `serve`: run the HTTP service.
//! - `migrate`: apply the PostgreSQL schema and exit.
//!
//! ## Configuration
//!
//! `--config <file.toml>` supplies a base configuration; flags and their
//! environment variables (`DATABASE_URL`, `JWT_SECRET`, `RANDOM_SEED`,
//! `NOTIFY_WEBHOOK`, `EXPORT_DIR`, `PORT`) override it. A `.env` file is read
//! first. `LOG_FORMAT=json` switches logs to JSON; `RUST_LOG` filters them.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use randomise_me::config::{AppConfig, Overrides};
use randomise_me::{db, server};

#[derive(Parser)]
#[command(name = "randomise-me", about = "Run randomised trials on yourself and with others")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// PostgreSQL connection URL (in-memory store when unset)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(long, env = "PORT")]
        port: Option<u16>,
        /// HS256 secret for bearer tokens (unverified development decoding when unset)
        #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
        jwt_secret: Option<String>,
        /// Serve CSV exports inline instead of through the reverse proxy
        #[arg(long)]
        debug: bool,
        /// Directory CSV exports are written to
        #[arg(long, env = "EXPORT_DIR")]
        export_dir: Option<PathBuf>,
        /// Seed for arm randomisation
        #[arg(long, env = "RANDOM_SEED")]
        random_seed: Option<u64>,
        /// URL notices are POSTed to
        #[arg(long, env = "NOTIFY_WEBHOOK")]
        notify_webhook: Option<String>,
    },
    /// Apply the database schema and exit
    Migrate,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // LOG_FORMAT=json for log shipping, human-readable otherwise
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            jwt_secret,
            debug,
            export_dir,
            random_seed,
            notify_webhook,
        } => {
            let config = AppConfig::load(
                cli.config.as_deref(),
                Overrides {
                    port,
                    database_url: cli.database_url,
                    jwt_secret,
                    debug: debug.then_some(true),
                    export_dir,
                    random_seed,
                    notify_webhook,
                },
            )?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(server::run(config))
        }
        Commands::Migrate => {
            let config = AppConfig::load(
                cli.config.as_deref(),
                Overrides {
                    database_url: cli.database_url,
                    ..Default::default()
                },
            )?;
            let url = config
                .database_url
                .context("DATABASE_URL is required (set via --database-url or env)")?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let database = db::Database::connect(&url).await?;
                database.migrate().await?;
                tracing::info!("schema applied");
                Ok(())
            })
        }
    }
}
