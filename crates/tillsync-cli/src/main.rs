use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tillsync_adapters::{ExportFileSource, HttpExportConfig, HttpExportSource, SalesSource};
use tillsync_storage::{PgSalesStore, SalesStore};
use tillsync_sync::{build_scheduler, SyncConfig, SyncService};
use tillsync_web::AppState;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tillsync")]
#[command(about = "POS sales sync service command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP server (and the daily-sync scheduler when enabled).
    Serve {
        #[arg(long, env = "TILLSYNC_PORT", default_value_t = 8080)]
        port: u16,
    },
    /// Sync today's sales once and exit.
    Daily,
    /// Sync a historical date range, month by month.
    Historical {
        #[arg(long)]
        start_date: NaiveDate,
        #[arg(long)]
        end_date: NaiveDate,
    },
    /// Print the validated range and cost estimate without syncing.
    Estimate {
        #[arg(long)]
        start_date: NaiveDate,
        #[arg(long)]
        end_date: NaiveDate,
    },
    /// Create the sync tables if they do not exist.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve { port: 8080 }) {
        Commands::Serve { port } => {
            let service = Arc::new(build_service(&config).await?);
            if config.scheduler_enabled {
                let sched = build_scheduler(service.clone(), &config.daily_cron).await?;
                sched.start().await.context("starting scheduler")?;
                info!(cron = %config.daily_cron, "daily sync scheduler started");
            } else {
                warn!("scheduler disabled; daily sync only runs via POST /sync/daily");
            }
            tillsync_web::serve(AppState::new(service), port).await?;
        }
        Commands::Daily => {
            let service = build_service(&config).await?;
            let outcome = service.sync_daily().await?;
            println!(
                "daily sync complete: batch_id={} scraped={} inserted={} processed={}",
                outcome.batch_id,
                outcome.records_scraped,
                outcome.records_inserted,
                outcome.records_processed
            );
        }
        Commands::Historical {
            start_date,
            end_date,
        } => {
            let service = build_service(&config).await?;
            let outcome = service.sync_historical(start_date, end_date).await?;
            println!(
                "historical sync {}: {} ({}/{} chunks, {} records)",
                if outcome.success { "complete" } else { "finished with errors" },
                outcome.message,
                outcome.chunks_processed,
                outcome.total_chunks,
                outcome.total_records_processed
            );
            for chunk in &outcome.chunk_results {
                println!(
                    "  chunk {} {}..{}: {}",
                    chunk.chunk_index, chunk.start_date, chunk.end_date, chunk.message
                );
            }
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Commands::Estimate {
            start_date,
            end_date,
        } => {
            let service = build_service(&config).await?;
            let outcome = service.estimates(start_date, end_date);
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Migrate => {
            let store = PgSalesStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
    }

    Ok(())
}

async fn build_service(config: &SyncConfig) -> Result<SyncService> {
    let store = PgSalesStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    store.migrate().await.context("running migrations")?;
    let store: Arc<dyn SalesStore> = Arc::new(store);

    let source: Arc<dyn SalesSource> = match &config.export_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "using file export source");
            Arc::new(ExportFileSource::new(dir.clone(), config.utc_offset_hours))
        }
        None => {
            info!(url = %config.export_base_url, "using http export source");
            Arc::new(HttpExportSource::new(HttpExportConfig {
                base_url: config.export_base_url.clone(),
                api_key: config.export_api_key.clone(),
                timeout: Duration::from_secs(config.http_timeout_secs),
                utc_offset_hours: config.utc_offset_hours,
                ..HttpExportConfig::default()
            })?)
        }
    };

    Ok(SyncService::new(
        store,
        source,
        config.range_policy(),
        config.utc_offset_hours,
    ))
}
