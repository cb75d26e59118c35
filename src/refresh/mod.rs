pub mod fetch;
pub mod orchestrator;
pub mod progress;
pub mod types;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;

use crate::activity::consolidate::{ConsolidatedApiRecord, ConsolidationEngine};
use crate::app::AppContext;
use crate::store::JournalEntry;
use crate::telemetry::ctx::LogCtx;
use crate::telemetry::ops::refresh::{Phase as RefreshPhase, Refresh};
use crate::telemetry::{self};

use orchestrator::{RefreshObserver, RefreshOrchestrator};
use types::{RefreshError, RefreshOutcome, RefreshProgress, RefreshResult, RefreshSummary};

#[derive(Args, Debug)]
pub struct RefreshCmd {
    /// Responsibilities in processing order; defaults to the whole catalog
    pub responsibilities: Vec<String>,
    #[arg(long, default_value_t = false)] pub apply: bool,
}

#[derive(Args, Debug)]
pub struct RetryCmd {
    /// Retry just this responsibility instead of every failed one
    #[arg(long)] pub only: Option<String>,
    #[arg(long, default_value_t = false)] pub apply: bool,
}

struct LogObserver {
    log: LogCtx<Refresh>,
}

impl RefreshObserver for LogObserver {
    fn on_progress(&self, p: &RefreshProgress) { self.log.progress(p); }
    fn on_result(&self, r: &RefreshResult) { self.log.responsibility_result(r); }
}

#[derive(Serialize)]
struct RefreshPlanOut {
    mode: &'static str,
    responsibilities: Vec<String>,
}

#[derive(Serialize)]
struct RefreshOut {
    pass_id: String,
    summary: RefreshSummary,
    results: Vec<RefreshResult>,
    apis: Vec<ConsolidatedApiRecord>,
}

fn orchestrator(app: &AppContext) -> Result<Arc<RefreshOrchestrator>> {
    let observer = Arc::new(LogObserver { log: telemetry::refresh() });
    Ok(Arc::new(RefreshOrchestrator::new(app.catalog.clone(), app.probe()?).with_observer(observer)))
}

// Ctrl-C stops the pass after the in-flight responsibility.
fn cancel_on_ctrl_c(orch: &Arc<RefreshOrchestrator>) -> tokio::task::JoinHandle<()> {
    let orch = Arc::clone(orch);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing current responsibility");
            orch.cancel();
        }
    })
}

pub async fn run(app: &AppContext, args: RefreshCmd) -> Result<()> {
    let t0 = Instant::now();
    let log = telemetry::refresh();
    let responsibilities = if args.responsibilities.is_empty() { app.catalog.responsibilities() } else { args.responsibilities };
    if responsibilities.is_empty() {
        bail!("no responsibilities given and the catalog is empty");
    }
    let mode = if args.apply { "apply" } else { "plan" };
    let _g = log.root_span_kv([
        ("mode", mode.to_string()),
        ("responsibilities", responsibilities.len().to_string()),
    ]).entered();

    {
        let _p = log.span(&RefreshPhase::Plan).entered();
        log.info(format!("📝 Refresh plan — {} responsibilit{}: {}", responsibilities.len(),
            if responsibilities.len() == 1 { "y" } else { "ies" }, responsibilities.join(", ")));
    }
    if !args.apply {
        log.info("   Use --apply to execute.");
        if telemetry::config::json_mode() {
            log.plan(&RefreshPlanOut { mode, responsibilities })?;
        }
        return Ok(());
    }

    let orch = orchestrator(app)?;
    let fetcher = app.fetcher()?;
    let interrupt = cancel_on_ctrl_c(&orch);
    let outcome = {
        let _s = log.span(&RefreshPhase::Pass).entered();
        orch.run(&responsibilities, &fetcher).await
    };
    interrupt.abort();
    finish(app, &log, &orch, outcome?, t0).await
}

pub async fn retry(app: &AppContext, args: RetryCmd) -> Result<()> {
    let t0 = Instant::now();
    let log = telemetry::refresh();
    let mode = if args.apply { "apply" } else { "plan" };
    let _g = log.root_span_kv([
        ("mode", mode.to_string()),
        ("only", format!("{:?}", args.only)),
    ]).entered();

    let last = {
        let _s = log.span(&RefreshPhase::LoadJournal).entered();
        app.store.last_pass().await.context("read refresh journal")?
    };
    let Some(last) = last else {
        bail!("no refresh pass recorded yet; run `refresh --apply` first");
    };

    let targets: Vec<String> = match &args.only {
        Some(r) => vec![r.clone()],
        None => last.results.iter().filter(|r| r.is_hard_failure()).map(|r| r.responsibility.clone()).collect(),
    };
    if targets.is_empty() {
        log.info("✨ Nothing to retry — last pass had no failures.");
        return Ok(());
    }
    log.info(format!("📝 Retry plan — pass={} targets: {}", last.pass_id, targets.join(", ")));
    if !args.apply {
        log.info("   Use --apply to execute.");
        if telemetry::config::json_mode() {
            log.plan(&RefreshPlanOut { mode, responsibilities: targets })?;
        }
        return Ok(());
    }

    let orch = orchestrator(app)?;
    orch.restore(last.results, last.lanes)?;
    let fetcher = app.fetcher()?;
    let interrupt = cancel_on_ctrl_c(&orch);
    let outcome = {
        let _s = log.span(&RefreshPhase::Pass).entered();
        match &args.only {
            Some(r) => orch.retry_one(r, &fetcher).await,
            None => orch.retry_failed_only(&fetcher).await,
        }
    };
    interrupt.abort();
    match outcome {
        Err(RefreshError::NothingToRetry) => {
            log.info("✨ Nothing to retry.");
            Ok(())
        }
        other => finish(app, &log, &orch, other?, t0).await,
    }
}

async fn finish(app: &AppContext, log: &LogCtx<Refresh>, orch: &RefreshOrchestrator, outcome: RefreshOutcome, t0: Instant) -> Result<()> {
    {
        let _s = log.span(&RefreshPhase::SaveJournal).entered();
        let entry = JournalEntry {
            pass_id: outcome.pass_id.clone(),
            started_at: outcome.summary.started_at,
            completed_at: outcome.summary.completed_at,
            cancelled: outcome.summary.cancelled,
            results: orch.last_results(),
            lanes: orch.lanes(),
        };
        app.store.save_pass(&entry).await.context("save refresh journal")?;
    }

    let apis = {
        let _s = log.span(&RefreshPhase::Consolidate).entered();
        ConsolidationEngine::default().consolidate(&outcome.activities)
    };
    for g in apis.iter().filter(|g| g.can_expand) {
        log.warn_kv("needs attention", [("api", g.id.clone()), ("status", g.status.to_string())]);
    }
    log.summary(&outcome.summary);

    if telemetry::config::json_mode() {
        let out = RefreshOut { pass_id: outcome.pass_id, summary: outcome.summary, results: outcome.results, apis };
        log.result_timed(&out, t0.elapsed().as_millis())?;
    }
    Ok(())
}
