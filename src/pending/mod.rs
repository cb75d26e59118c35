use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::app::AppContext;
use crate::store::{PendingStatus, PendingTransaction};
use crate::telemetry::ops::pending::Phase as PendingPhase;
use crate::telemetry::{self};

#[derive(Args, Debug)]
pub struct PendingCmd {
    #[command(subcommand)]
    pub command: PendingSub,
}

#[derive(Subcommand, Debug)]
pub enum PendingSub {
    /// List queued transactions
    Ls {
        /// Include confirmed rows
        #[arg(long, default_value_t = false)] all: bool,
    },
    /// Queue a transaction for later confirmation
    Add {
        responsibility: String,
        /// JSON payload sent to the confirm endpoint
        payload: String,
        #[arg(long, default_value_t = false)] apply: bool,
    },
}

#[derive(Serialize)]
struct EnqueuePlanOut<'a> {
    responsibility: &'a str,
    payload: &'a serde_json::Value,
    routed: bool,
}

pub async fn run(app: &AppContext, args: PendingCmd) -> Result<()> {
    match args.command {
        PendingSub::Ls { all } => list(app, all).await,
        PendingSub::Add { responsibility, payload, apply } => add(app, &responsibility, &payload, apply).await,
    }
}

async fn list(app: &AppContext, all: bool) -> Result<()> {
    let t0 = Instant::now();
    let log = telemetry::pending();
    let _g = log.root_span_kv([("all", all.to_string())]).entered();
    let rows: Vec<PendingTransaction> = {
        let _s = log.span(&PendingPhase::List).entered();
        let rows = app.store.list(None).await?;
        if all { rows } else { rows.into_iter().filter(|t| t.status != PendingStatus::Confirmed).collect() }
    };

    log.info(format!("📦 {} transaction(s)", rows.len()));
    for t in &rows {
        let err = t.last_error.as_deref().map(|e| format!(" error={e}")).unwrap_or_default();
        log.info(format!("  {} {:<16} {:<9} retries={} at={}{}",
            t.id, t.responsibility, t.status.as_str(), t.retry_count, t.created_at.format("%Y-%m-%d %H:%M:%S"), err));
    }
    if telemetry::config::json_mode() {
        log.result_timed(&rows, t0.elapsed().as_millis())?;
    }
    Ok(())
}

async fn add(app: &AppContext, responsibility: &str, raw: &str, apply: bool) -> Result<()> {
    let log = telemetry::pending();
    let mode = if apply { "apply" } else { "plan" };
    let _g = log.root_span_kv([
        ("mode", mode.to_string()),
        ("responsibility", responsibility.to_string()),
    ]).entered();

    let payload: serde_json::Value = serde_json::from_str(raw).context("payload must be valid JSON")?;
    let routed = app.catalog.get(responsibility).is_some_and(|d| d.confirm_path.is_some());
    {
        let _p = log.span(&PendingPhase::Plan).entered();
        log.info(format!("📝 Enqueue plan — {} {}", responsibility, payload));
        if !routed {
            log.warn(format!("   '{}' has no confirmPath in the catalog; sync will report it as invalid", responsibility));
        }
    }
    if !apply {
        log.info("   Use --apply to execute.");
        if telemetry::config::json_mode() {
            log.plan(&EnqueuePlanOut { responsibility, payload: &payload, routed })?;
        }
        return Ok(());
    }

    let tx = {
        let _s = log.span(&PendingPhase::Enqueue).entered();
        app.store.enqueue(responsibility, payload).await?
    };
    log.info(format!("✅ Queued {} for {}", tx.id, tx.responsibility));
    if telemetry::config::json_mode() {
        log.result(&tx)?;
    }
    Ok(())
}
