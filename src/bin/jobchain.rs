//! jobchain CLI: submit and inspect serial job chains.

use clap::{Parser, Subcommand};
use jobchain::calculator::{HookCalculator, HookConfig};
use jobchain::config::Config;
use jobchain::config::secrets::ExposeSecret;
use jobchain::db::Db;
use jobchain::engine::ChainScheduler;
use jobchain::model::{ItemId, Payload};
use jobchain::telemetry::{TelemetryConfig, init_telemetry};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "jobchain", about = "Run work items through a calculator one at a time")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a chain and drive it to completion
    Run {
        /// Calculator TOML config
        #[arg(long)]
        calculator: PathBuf,
        /// File with one item ID per line (`#` starts a comment)
        #[arg(long)]
        file: Option<PathBuf>,
        /// Item IDs, appended after those from --file
        ids: Vec<String>,
    },
    /// Show the persisted queue for the configured chain key
    Show,
    /// Item payload operations
    Item {
        #[command(subcommand)]
        action: ItemAction,
    },
}

#[derive(Subcommand)]
enum ItemAction {
    /// Insert or overwrite an item's payload
    Put {
        id: String,
        /// JSON payload (defaults to {})
        #[arg(long)]
        payload: Option<String>,
    },
    /// Show an item's payload
    Show { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;

    match cli.command {
        Command::Run {
            calculator,
            file,
            ids,
        } => cmd_run(config, db, &calculator, file.as_deref(), ids).await,
        Command::Show => cmd_show(&config, db).await,
        Command::Item { action } => match action {
            ItemAction::Put { id, payload } => cmd_item_put(&db, id, payload).await,
            ItemAction::Show { id } => cmd_item_show(&db, id).await,
        },
    }
}

async fn cmd_run(
    config: Config,
    db: Db,
    calculator: &Path,
    file: Option<&Path>,
    ids: Vec<String>,
) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "jobchain".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    let mut items = match file {
        Some(path) => read_id_file(path)?,
        None => Vec::new(),
    };
    items.extend(ids.into_iter().map(ItemId::from));

    let hook = HookConfig::load(calculator)?;
    let db = Arc::new(db);
    let scheduler = ChainScheduler::new(
        db.clone(),
        db.clone(),
        Arc::new(HookCalculator::new(hook)),
        config.scheduler_config(),
    );

    let handle = scheduler.submit(items).await?;
    let run_id = handle.run_id();
    println!("Submitted run {run_id} on chain '{}'", config.chain_key);

    tokio::select! {
        report = handle.wait() => {
            let report = report?;
            println!("Run {}: {}", report.run_id, report.state);
            println!("  saved:   {}", report.saved);
            println!("  skipped: {}", report.skipped.len());
            for skipped in &report.skipped {
                println!("    {}: {}", skipped.item, skipped.error);
            }
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            scheduler.interrupt(run_id, "interrupted").await?;
            anyhow::bail!(
                "interrupted; run {run_id} marked aborted. The item in flight was not saved \
                 and must be resubmitted with the remaining queue (see `jobchain show`)"
            )
        }
    }
}

async fn cmd_show(config: &Config, db: Db) -> anyhow::Result<()> {
    use jobchain::store::QueueStore;

    let Some(queue) = db.load(&config.chain_key).await? else {
        println!("No queue for chain '{}'.", config.chain_key);
        return Ok(());
    };

    println!("Chain:      {}", config.chain_key);
    println!("Run:        {}", queue.run_id.0);
    println!("Status:     {}", queue.status);
    println!("Progress:   {}/{} dispatched", queue.dispatched(), queue.submitted);
    println!("Created:    {}", queue.created_at);
    println!("Updated:    {}", queue.updated_at);
    if let Some(ref error) = queue.error {
        println!("Error:      {error}");
    }
    if !queue.is_empty() {
        println!("---");
        for id in &queue.items {
            println!("{id}");
        }
    }

    Ok(())
}

async fn cmd_item_put(db: &Db, id: String, payload: Option<String>) -> anyhow::Result<()> {
    let payload: Payload = match payload {
        Some(json) => serde_json::from_str(&json)?,
        None => serde_json::json!({}),
    };
    let id = ItemId::from(id);
    db.put_item(&id, &payload).await?;
    println!("Stored: {id}");
    Ok(())
}

async fn cmd_item_show(db: &Db, id: String) -> anyhow::Result<()> {
    let item = db.get_item(&ItemId::from(id)).await?;
    println!("ID:         {}", item.id);
    println!("Updated:    {}", item.updated_at);
    println!("Payload:    {}", serde_json::to_string_pretty(&item.payload)?);
    Ok(())
}

fn read_id_file(path: &Path) -> anyhow::Result<Vec<ItemId>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ItemId::from)
        .collect())
}
