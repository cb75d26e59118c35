use anyhow::Result;
use serde::Serialize;
use std::marker::PhantomData;
use tracing::{info, debug, warn, Span};

use super::emit;
use crate::activity::consolidate::ConsolidatedApiRecord;
use crate::refresh::types::{RefreshProgress, RefreshResult, RefreshSummary};
use crate::sync::types::SyncReport;

pub trait PhaseSpan {
    fn name(&self) -> &'static str;
    fn span(&self) -> Span;
}

pub trait OpMarker {
    const NAME: &'static str;
    type Phase: PhaseSpan;
    fn root_span() -> Span;
}

pub struct LogCtx<O: OpMarker> {
    pub(crate) json: bool,
    pub(crate) _marker: PhantomData<O>,
}

impl<O: OpMarker> LogCtx<O> {
    fn op_name(&self) -> &'static str { O::NAME }

    pub fn root_span(&self) -> Span { O::root_span() }

    pub fn root_span_kv<'a, T>(&self, fields: T) -> Span
    where
        T: IntoIterator<Item = (&'a str, String)>,
    {
        let span = self.root_span();
        let details = kv_to_string(fields);
        if details.is_empty() {
            info!(op = %self.op_name(), "start");
        } else {
            info!(op = %self.op_name(), details = %details, "start");
        }
        span
    }

    pub fn span(&self, ph: &O::Phase) -> Span {
        debug!(op = %self.op_name(), phase = ph.name(), "span_start");
        ph.span()
    }

    pub fn info(&self, msg: impl AsRef<str>) { if self.json { info!(op = %self.op_name(), "{}", msg.as_ref()); } else { info!("{}", msg.as_ref()); } }
    pub fn warn(&self, msg: impl AsRef<str>) { if self.json { warn!(op = %self.op_name(), "{}", msg.as_ref()); } else { warn!("{}", msg.as_ref()); } }

    pub fn warn_kv<'a, D>(&self, msg: &str, kv: D)
    where
        D: IntoIterator<Item = (&'a str, String)>,
    {
        let details = kv_to_string(kv);
        if self.json { warn!(op = %self.op_name(), details = %details, "{}", msg); }
        else if details.is_empty() { warn!("{}", msg); }
        else { warn!("{} {}", msg, details); }
    }

    pub fn plan<T: Serialize>(&self, plan: &T) -> Result<()> { emit::print_plan(self.op_name(), plan, None) }
    pub fn result<T: Serialize>(&self, result: &T) -> Result<()> { emit::print_result(self.op_name(), result, None) }
    pub fn result_timed<T: Serialize>(&self, result: &T, duration_ms: u128) -> Result<()> {
        emit::print_result(self.op_name(), result, Some(emit::timed(duration_ms)))
    }
}

impl LogCtx<crate::telemetry::ops::refresh::Refresh> {
    pub fn progress(&self, p: &RefreshProgress) {
        let eta = p.estimated_time_remaining.map(|ms| format!("{ms}ms")).unwrap_or_else(|| "-".to_string());
        if self.json {
            info!(op = %self.op_name(), current = p.current, total = p.total, percentage = p.percentage,
                api = %p.current_api, api_type = %p.current_api_type, eta = %eta, "progress");
        } else {
            info!("⏳ [{}/{}] {}% {} ({}) eta={}", p.current, p.total, p.percentage, p.current_api, p.current_api_type, eta);
        }
    }

    pub fn responsibility_result(&self, r: &RefreshResult) {
        let error = r.error.as_deref().unwrap_or("");
        if self.json {
            if r.success { info!(op = %self.op_name(), responsibility = %r.responsibility, "responsibility_ok"); }
            else if r.offline { warn!(op = %self.op_name(), responsibility = %r.responsibility, "responsibility_offline"); }
            else { warn!(op = %self.op_name(), responsibility = %r.responsibility, error = %error, "responsibility_failed"); }
        } else if r.success {
            info!("✅ {}", r.responsibility);
        } else if r.offline {
            warn!("📴 {} — offline, not attempted", r.responsibility);
        } else {
            warn!("❌ {} — {}", r.responsibility, error);
        }
    }

    pub fn summary(&self, s: &RefreshSummary) {
        if self.json {
            info!(op = %self.op_name(), succeeded = s.succeeded, failed = s.failed, offline = s.offline,
                total = s.total, cancelled = s.cancelled, "refresh_summary");
        } else {
            info!("📊 Refresh — succeeded={} failed={} offline={} total={} cancelled={}",
                s.succeeded, s.failed, s.offline, s.total, s.cancelled);
        }
    }
}

impl LogCtx<crate::telemetry::ops::activity::Activity> {
    pub fn api_line(&self, g: &ConsolidatedApiRecord) {
        if self.json {
            info!(op = %self.op_name(), id = %g.id, status = %g.status, inserted = g.inserted_records,
                attempts = g.activities.len(), can_expand = g.can_expand, retry_count = g.retry_count, "api");
        } else {
            let marker = if g.can_expand { "▸" } else { " " };
            info!("{} {:<28} {:<13} {:<10} records={} attempts={} retries={}",
                marker, g.api_name, g.api_type, g.status, g.inserted_records, g.activities.len(), g.retry_count);
        }
    }
}

impl LogCtx<crate::telemetry::ops::sync::SyncOp> {
    pub fn totals(&self, r: &SyncReport) {
        if self.json {
            info!(op = %self.op_name(), outcome = ?r.classification, synced = r.synced, errored = r.errored,
                deferred = r.deferred, pending_before = r.pending_before, pending_after = r.pending_after, "sync_totals");
        } else {
            info!("📊 Sync {:?} — synced={} errored={} deferred={} pending {}→{}",
                r.classification, r.synced, r.errored, r.deferred, r.pending_before, r.pending_after);
        }
    }
}

fn kv_to_string<'a, T>(kv: T) -> String
where
    T: IntoIterator<Item = (&'a str, String)>,
{
    let mut parts: Vec<String> = Vec::new();
    for (k, v) in kv { parts.push(format!("{}={}", k, v)); }
    parts.join(" ")
}
