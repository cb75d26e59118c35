use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;

mod activity;
mod app;
mod catalog;
mod config;
mod connectivity;
mod init;
mod output;
mod pending;
mod refresh;
mod store;
mod sync;
mod telemetry;

#[derive(Parser)]
#[command(name = "dock-sync", about = "Warehouse data refresh and offline transaction sync")]
struct Cli {
    #[arg(global = true, long, env = "DOCK_DATABASE_URL", default_value = "sqlite://dock-sync.db")]
    db: String,
    /// Responsibility catalog (JSON)
    #[arg(global = true, long, env = "DOCK_CATALOG", default_value = "catalog.json")]
    catalog: PathBuf,
    /// Emit a single JSON envelope to stdout; logs go to stderr
    #[arg(global = true, long, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Init(init::InitCmd),
    Refresh(refresh::RefreshCmd),
    Retry(refresh::RetryCmd),
    Activity(activity::ActivityCmd),
    Sync(sync::SyncCmd),
    Pending(pending::PendingCmd),
    Probe(connectivity::ProbeCmd),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    telemetry::config::set_json_mode(cli.json || output::config::OutputConfig::from_env().wants_json());

    // logs go to stderr; RUST_LOG and DOCK_LOG_FORMAT apply
    telemetry::config::init_tracing();

    let open = || app::AppContext::open(&cli.db, &cli.catalog);
    match cli.command {
        Commands::Init(args) => init::run(&cli.db, args).await?,
        Commands::Refresh(args) => refresh::run(&open().await?, args).await?,
        Commands::Retry(args) => refresh::retry(&open().await?, args).await?,
        Commands::Activity(args) => activity::run(&open().await?, args).await?,
        Commands::Sync(args) => sync::run(&open().await?, args).await?,
        Commands::Pending(args) => pending::run(&open().await?, args).await?,
        Commands::Probe(args) => connectivity::run(&open().await?, args).await?,
    }

    Ok(())
}
