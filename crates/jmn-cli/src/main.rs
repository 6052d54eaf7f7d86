use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jmn_pipeline::wiring::{build_collaborators, realtime_channel, SeedFiles};
use jmn_pipeline::{logging, EventConsumer, JsonLinesSource, PipelineConfig, SessionHub};
use jmn_storage::postgres::{connect, MIGRATOR};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "jmn-cli")]
#[command(about = "Job Match Notifier command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Replay a JSON-lines event file through the pipeline.
    Consume {
        #[arg(long)]
        file: PathBuf,
        /// Seed profiles for in-memory runs (ignored when DATABASE_URL is set).
        #[arg(long)]
        profiles: Option<PathBuf>,
        #[arg(long)]
        subscriptions: Option<PathBuf>,
    },
    /// Apply database migrations.
    Migrate,
    /// Run the HTTP ingress and session stream.
    Serve {
        #[arg(long)]
        profiles: Option<PathBuf>,
        #[arg(long)]
        subscriptions: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = PipelineConfig::from_env();
    logging::init(config.log_format);

    match cli.command {
        Commands::Consume {
            file,
            profiles,
            subscriptions,
        } => {
            let seeds = SeedFiles {
                profiles,
                subscriptions,
            };
            let realtime = realtime_channel(&config, Arc::new(SessionHub::default()))?;
            let collaborators = build_collaborators(&config, &seeds, realtime).await?;
            let consumer = EventConsumer::from_config(&config, collaborators)?;
            let mut source = JsonLinesSource::open(&file).await?;
            let summary = consumer.run(&mut source).await?;
            println!(
                "consume complete: deliveries={} processed={} unsupported={} inactive={} malformed={} failed={} matches_created={} notified={}",
                summary.deliveries,
                summary.processed,
                summary.unsupported,
                summary.inactive,
                summary.malformed,
                summary.failed,
                summary.matches_created,
                summary.notified
            );
        }
        Commands::Migrate => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set to run migrations")?;
            let pool = connect(url, config.store_timeout).await?;
            MIGRATOR.run(&pool).await.context("applying migrations")?;
            info!("migrations applied");
            println!("migrations applied");
        }
        Commands::Serve {
            profiles,
            subscriptions,
        } => {
            let seeds = SeedFiles {
                profiles,
                subscriptions,
            };
            jmn_web::serve(config, seeds).await?;
        }
    }

    Ok(())
}
