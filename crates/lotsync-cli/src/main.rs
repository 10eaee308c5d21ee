use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lotsync_cli::{Command, Config, QueryArgs, SyncAction};
use lotsync_client::InventoryClient;
use lotsync_core::{
    load_config, AppConfig, ControlError, FileCheckpointStore, InventoryStore, PaginationEngine,
    StartMode, SyncContext, SyncOrchestrator, SyncStatus,
};
use lotsync_db::{InventoryRepository, SyncStatusRepository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Setup logging (stderr to keep stdout clean for query output)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install log subscriber")?;

    let config = Config::parse();
    let app_config =
        load_config(config.config.as_deref()).context("Failed to load configuration")?;

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(app_config.db.max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    match config.command {
        Command::Migrate => {
            lotsync_db::migrate(&pool).await?;
        }
        Command::Get { id } => {
            get_record(&InventoryRepository::new(pool), &id).await?;
        }
        Command::Stats => {
            show_stats(&InventoryRepository::new(pool)).await?;
        }
        Command::Query(args) => {
            query(InventoryRepository::new(pool), &app_config, args).await?;
        }
        Command::Sync { action } => {
            let orchestrator = build_orchestrator(
                pool,
                &app_config,
                config.inventory_api_url.as_deref(),
                config.inventory_api_key,
                &action,
            )?;
            if let Err(e) = run_sync(orchestrator, action).await {
                eprintln!("\n{}\n", e);
                process::exit(e.exit_code());
            }
        }
    }

    Ok(())
}

fn build_orchestrator(
    pool: sqlx::PgPool,
    app_config: &AppConfig,
    api_url: Option<&str>,
    api_key: Option<String>,
    action: &SyncAction,
) -> anyhow::Result<Arc<SyncOrchestrator>> {
    let api_url = api_url.context("INVENTORY_API_URL is required for sync commands")?;
    let client = InventoryClient::new(api_url, api_key, &app_config.http)
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    let mut sync_config = app_config.sync.clone();
    if let SyncAction::Start {
        page_size: Some(n), ..
    } = action
    {
        sync_config.page_size = *n;
    }

    let checkpoint_path = sync_config.checkpoint_path();
    info!(path = %checkpoint_path.display(), "Using checkpoint file");

    let ctx = SyncContext {
        source: Arc::new(client),
        store: Arc::new(InventoryRepository::new(pool.clone())),
        statuses: Arc::new(SyncStatusRepository::new(pool)),
        checkpoints: Arc::new(FileCheckpointStore::new(checkpoint_path)),
    };

    Ok(Arc::new(SyncOrchestrator::new(
        ctx,
        sync_config,
        app_config.retry.clone(),
    )))
}

/// Executes a sync control operation
async fn run_sync(
    orchestrator: Arc<SyncOrchestrator>,
    action: SyncAction,
) -> Result<(), ControlError> {
    match action {
        SyncAction::Start {
            resume, from_page, ..
        } => {
            let mode = if resume {
                StartMode::Resume
            } else {
                StartMode::Fresh
            };

            let stopper = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, stopping at the next page boundary");
                    stopper.stop();
                }
            });

            let report = orchestrator.start(mode, from_page).await.inspect_err(|e| {
                error!(error = %e, "Sync run did not complete");
            })?;

            let stats = &report.stats;
            print_status(&report.status);
            println!(
                "  This run:              {} items: {} created, {} updated, {} unchanged, {} failed",
                stats.total(),
                stats.created,
                stats.updated,
                stats.unchanged,
                stats.failed
            );
            println!();
        }
        SyncAction::Status => {
            print_status(&orchestrator.status().await?);
        }
        SyncAction::Checkpoint { page } => {
            let checkpoint = orchestrator.checkpoint(page).await?;
            println!(
                "Checkpoint saved at page {} ({} records processed)",
                checkpoint.last_page, checkpoint.total_processed
            );
        }
        SyncAction::ClearCheckpoint => {
            orchestrator.clear_checkpoint().await?;
            println!("Checkpoint cleared");
        }
    }

    Ok(())
}

/// Print a sync status block
fn print_status(status: &SyncStatus) {
    println!("\n🔄 Sync Status\n");
    println!("  State:                 {}", status.status);
    println!("  Current page:          {}", status.current_page);
    match status.total_pages {
        Some(total) => println!("  Reported last page:    {}", total),
        None => println!("  Reported last page:    unknown"),
    }
    match (status.total_records, status.progress_percent()) {
        (Some(total), Some(pct)) => println!(
            "  Records processed:     {} of {} ({:.1}%)",
            status.records_processed, total, pct
        ),
        _ => println!("  Records processed:     {}", status.records_processed),
    }
    println!("  Errors:                {}", status.error_count);
    if let Some(started) = status.started_at {
        println!("  Started:               {}", started);
    }
    if let Some(completed) = status.completed_at {
        println!("  Completed:             {}", completed);
    }
    println!("  Last activity:         {}", status.last_activity_at);
    if let Some(message) = &status.error_message {
        println!("  Message:               {}", message);
    }
    println!();
}

/// Serve one page of the local mirror as JSON
async fn query(
    repo: InventoryRepository,
    app_config: &AppConfig,
    args: QueryArgs,
) -> anyhow::Result<()> {
    let request = args
        .into_params()
        .into_request()
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    let store: Arc<dyn InventoryStore> = Arc::new(repo);
    let engine = PaginationEngine::new(store, app_config.query.clone());
    let response = engine.page(request).await?;

    info!(
        items = response.items.len(),
        total = response.total,
        has_next = response.has_next,
        "Query served"
    );
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Print a single record of the local mirror as JSON
async fn get_record(repo: &InventoryRepository, id: &str) -> anyhow::Result<()> {
    let record = repo
        .get(id)
        .await?
        .with_context(|| format!("No record with id '{}'", id))?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// Show database statistics
async fn show_stats(repo: &InventoryRepository) -> anyhow::Result<()> {
    let stats = repo.stats().await?;

    println!("\n📊 Database Statistics\n");
    println!("  Total records:         {}", stats.total_records);
    println!("  Distinct makes:        {}", stats.distinct_makes);
    if let Some(last_synced) = stats.last_synced_at {
        println!("  Last synced:           {}", last_synced);
    }
    println!();

    Ok(())
}
