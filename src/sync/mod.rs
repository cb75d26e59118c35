pub mod confirm;
pub mod coordinator;
pub mod notify;
pub mod router;
pub mod types;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::app::AppContext;
use crate::telemetry::ops::sync::Phase as SyncPhase;
use crate::telemetry::{self};

use coordinator::TransactionSyncCoordinator;
use notify::LogNotifier;

#[derive(Args, Debug)]
pub struct SyncCmd {
    /// Responsibilities to sync, in order; defaults to every registered confirm route
    pub responsibilities: Vec<String>,
    #[arg(long, default_value_t = false)] pub apply: bool,
    /// Keep running and sync again whenever connectivity comes back
    #[arg(long, default_value_t = false)] pub watch: bool,
}

#[derive(Serialize)]
struct SyncPlanOut {
    responsibilities: Vec<String>,
    pending: usize,
    unrouted: Vec<String>,
}

pub async fn run(app: &AppContext, args: SyncCmd) -> Result<()> {
    let t0 = Instant::now();
    let log = telemetry::sync();
    let router = app.confirm_router()?;
    let responsibilities = if args.responsibilities.is_empty() { router.responsibilities() } else { args.responsibilities };
    if responsibilities.is_empty() {
        bail!("nothing to sync: no responsibilities given and no catalog entry has a confirmPath");
    }
    let mode = if args.apply { "apply" } else { "plan" };
    let _g = log.root_span_kv([
        ("mode", mode.to_string()),
        ("responsibilities", responsibilities.join(",")),
        ("watch", args.watch.to_string()),
    ]).entered();

    if !args.apply {
        let _p = log.span(&SyncPhase::Plan).entered();
        let pending = app.store.list(None).await?
            .into_iter()
            .filter(|t| t.status != crate::store::PendingStatus::Confirmed)
            .count();
        let unrouted: Vec<String> = responsibilities.iter().filter(|r| !router.is_registered(r)).cloned().collect();
        log.info(format!("📝 Sync plan — {} pending transaction(s) across {}", pending, responsibilities.join(", ")));
        if !unrouted.is_empty() {
            log.warn(format!("   No confirm route for: {}", unrouted.join(", ")));
        }
        log.info("   Use --apply to execute.");
        if telemetry::config::json_mode() {
            log.plan(&SyncPlanOut { responsibilities, pending, unrouted })?;
        }
        return Ok(());
    }

    let probe = app.probe()?;
    let coord = Arc::new(TransactionSyncCoordinator::new(
        probe.clone(),
        Arc::new(app.store.clone()),
        router,
        Arc::new(LogNotifier),
    ));

    let report = {
        let _s = log.span(&SyncPhase::Confirm).entered();
        coord.sync_all(&responsibilities).await?
    };
    log.totals(&report);
    if telemetry::config::json_mode() {
        log.result_timed(&report, t0.elapsed().as_millis())?;
    }

    if args.watch {
        let _w = log.span(&SyncPhase::Watch).entered();
        log.info(format!("👀 Watching connectivity every {:?}; Ctrl-C to stop.", app.settings.probe_interval));
        let cancel = CancellationToken::new();
        let monitor = probe.spawn_monitor(app.settings.probe_interval, cancel.clone());
        let auto = Arc::clone(&coord).spawn_auto_sync(responsibilities, cancel.clone());
        tokio::signal::ctrl_c().await?;
        cancel.cancel();
        auto.stop().await;
        if let Err(e) = monitor.await {
            log.warn(format!("connectivity monitor ended abnormally: {e}"));
        }
        log.info(format!("🛑 Stopped; {} transaction(s) still pending.", *coord.pending_count().borrow()));
    }
    Ok(())
}
