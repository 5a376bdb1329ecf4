use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use upkeep_core::UpkeepConfig;
use upkeep_recurring::{RecurringScheduler, SqliteStore};

/// Recurring maintenance job generator.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to upkeep.toml (default: $UPKEEP_CONFIG, then ~/.upkeep/upkeep.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the weekly and daily catch-up triggers until Ctrl-C
    Serve,
    /// Generate the current week for every active template now
    Run,
    /// Re-attempt templates not generated since this week began
    CatchUp,
    /// Generate one template, optionally backfilling several weeks
    Generate {
        /// Template ID
        template_id: String,
        /// Any date in the first week to generate (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Number of consecutive weeks to generate
        #[arg(long)]
        periods: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upkeep_daemon=info,upkeep_recurring=info".into()),
        )
        .init();

    let args = Args::parse();

    // load config: --config > UPKEEP_CONFIG env > ~/.upkeep/upkeep.toml
    let config_path = args.config.or_else(|| std::env::var("UPKEEP_CONFIG").ok());
    let config = match UpkeepConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(code = e.code(), "config load failed: {e}");
            return Err(e.into());
        }
    };

    let scheduler = Arc::new(open_scheduler(&config)?);

    match args.command {
        Command::Serve => {
            let service = Arc::clone(&scheduler).start();
            info!("upkeep scheduler running; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            info!("shutdown requested");
            service.stop().await;
        }
        Command::Run => print_json(&scheduler.run_manual()?)?,
        Command::CatchUp => print_json(&scheduler.run_catch_up(chrono::Utc::now())?)?,
        Command::Generate {
            template_id,
            start,
            periods,
        } => print_json(&scheduler.run_template(&template_id, start, periods)?)?,
    }
    Ok(())
}

/// Open the SQLite database, run migrations and build the scheduler.
fn open_scheduler(config: &UpkeepConfig) -> anyhow::Result<RecurringScheduler> {
    let db_path = &config.database.path;
    ensure_parent_dir(db_path)?;
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    let store = Arc::new(SqliteStore::new(db)?);
    info!("database migrations complete");

    Ok(RecurringScheduler::new(store, config)?)
}

fn ensure_parent_dir(path: &str) -> upkeep_core::Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
