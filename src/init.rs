use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::store::SqliteStore;
use crate::telemetry::ops::init::Phase as InitPhase;
use crate::telemetry::{self};

#[derive(Args, Debug)]
pub struct InitCmd {
    #[arg(long, default_value_t = false)] pub apply: bool,
}

#[derive(Serialize)]
struct InitOut<'a> {
    database: &'a str,
    migrated: bool,
}

/// Create the SQLite file if needed and apply pending migrations (idempotent).
pub async fn run(db: &str, args: InitCmd) -> Result<()> {
    let log = telemetry::init();
    let mode = if args.apply { "apply" } else { "plan" };
    let _g = log.root_span_kv([("mode", mode.to_string()), ("db", db.to_string())]).entered();

    {
        let _p = log.span(&InitPhase::Plan).entered();
        log.info(format!("📝 Init plan — database={db}"));
    }
    if !args.apply {
        log.info("   Use --apply to execute.");
        if telemetry::config::json_mode() {
            log.plan(&InitOut { database: db, migrated: false })?;
        }
        return Ok(());
    }

    let store = {
        let _s = log.span(&InitPhase::Connect).entered();
        SqliteStore::connect(db).await.with_context(|| format!("open {db}"))?
    };
    {
        let _s = log.span(&InitPhase::Migrate).entered();
        store.migrate().await.context("apply migrations")?;
    }
    log.info("✅ Database initialized");
    if telemetry::config::json_mode() {
        log.result(&InitOut { database: db, migrated: true })?;
    }
    Ok(())
}
