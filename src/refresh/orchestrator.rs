use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::fetch::{FetchError, ResponsibilityFetcher};
use super::progress::EtaEstimator;
use super::types::{ActivityLane, RefreshError, RefreshOutcome, RefreshProgress, RefreshResult, RefreshSummary, RunState};
use crate::activity::consolidate::{ConsolidatedApiRecord, ConsolidationEngine};
use crate::activity::types::{ActivityStatus, RawActivityRecord};
use crate::catalog::{ApiDescriptor, Catalog};
use crate::connectivity::probe::ConnectivityProbe;

/// Callbacks fired while a pass runs. All default to no-ops.
pub trait RefreshObserver: Send + Sync {
    fn on_progress(&self, _progress: &RefreshProgress) {}
    fn on_result(&self, _result: &RefreshResult) {}
    fn on_activity(&self, _records: &[RawActivityRecord]) {}
}

pub struct NoopObserver;
impl RefreshObserver for NoopObserver {}

/// Holds the run flag for one pass; dropping it returns the orchestrator to idle.
struct RunGuard<'a> {
    state: &'a Mutex<RunState>,
}

impl<'a> RunGuard<'a> {
    /// Flips to running and hands out the pass's cancel token under one lock,
    /// so a `cancel()` that sees `Running` always reaches this pass's token.
    fn acquire(
        state: &'a Mutex<RunState>,
        cancel: &Mutex<CancellationToken>,
    ) -> Result<(Self, CancellationToken), RefreshError> {
        let mut s = state.lock().unwrap_or_else(PoisonError::into_inner);
        if *s == RunState::Running {
            return Err(RefreshError::AlreadyRunning);
        }
        let token = {
            let mut slot = cancel.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_cancelled() {
                *slot = CancellationToken::new();
            }
            slot.clone()
        };
        *s = RunState::Running;
        Ok((Self { state }, token))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = RunState::Idle;
    }
}

/// Sequential, cancellable refresh over a list of responsibilities.
pub struct RefreshOrchestrator {
    catalog: Arc<Catalog>,
    probe: ConnectivityProbe,
    observer: Arc<dyn RefreshObserver>,
    state: Mutex<RunState>,
    board: Mutex<Vec<ActivityLane>>,
    last_results: Mutex<Vec<RefreshResult>>,
    cancel: Mutex<CancellationToken>,
}

impl RefreshOrchestrator {
    pub fn new(catalog: Arc<Catalog>, probe: ConnectivityProbe) -> Self {
        Self {
            catalog,
            probe,
            observer: Arc::new(NoopObserver),
            state: Mutex::new(RunState::Idle),
            board: Mutex::new(Vec::new()),
            last_results: Mutex::new(Vec::new()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RefreshObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Full pass; clears the activity board first.
    pub async fn run(&self, responsibilities: &[String], fetch: &dyn ResponsibilityFetcher) -> Result<RefreshOutcome, RefreshError> {
        self.pass(responsibilities, fetch, false).await
    }

    /// Re-run responsibilities whose last result was a hard failure, in their original order.
    pub async fn retry_failed_only(&self, fetch: &dyn ResponsibilityFetcher) -> Result<RefreshOutcome, RefreshError> {
        let failed: Vec<String> = self
            .last_results()
            .into_iter()
            .filter(RefreshResult::is_hard_failure)
            .map(|r| r.responsibility)
            .collect();
        if failed.is_empty() {
            return Err(RefreshError::NothingToRetry);
        }
        self.pass(&failed, fetch, true).await
    }

    pub async fn retry_one(&self, responsibility: &str, fetch: &dyn ResponsibilityFetcher) -> Result<RefreshOutcome, RefreshError> {
        self.pass(&[responsibility.to_string()], fetch, true).await
    }

    /// Stop after the in-flight responsibility. No-op when idle.
    pub fn cancel(&self) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == RunState::Running {
            self.cancel.lock().unwrap_or_else(PoisonError::into_inner).cancel();
        }
    }

    /// Seed from a journaled pass so retries work in a fresh process.
    pub fn restore(&self, results: Vec<RefreshResult>, lanes: Vec<ActivityLane>) -> Result<(), RefreshError> {
        let _guard = RunGuard::acquire(&self.state, &self.cancel)?;
        *self.last_results.lock().unwrap_or_else(PoisonError::into_inner) = results;
        *self.board.lock().unwrap_or_else(PoisonError::into_inner) = lanes;
        Ok(())
    }

    pub fn activities(&self) -> Vec<RawActivityRecord> {
        flatten_lanes(&self.board.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn lanes(&self) -> Vec<ActivityLane> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last_results(&self) -> Vec<RefreshResult> {
        self.last_results.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn consolidated(&self, engine: &ConsolidationEngine) -> Vec<ConsolidatedApiRecord> {
        engine.consolidate(&self.activities())
    }

    async fn pass(&self, responsibilities: &[String], fetch: &dyn ResponsibilityFetcher, retry: bool) -> Result<RefreshOutcome, RefreshError> {
        if responsibilities.is_empty() {
            return Err(RefreshError::EmptyResponsibilities);
        }
        let (_guard, token) = RunGuard::acquire(&self.state, &self.cancel)?;
        let pass_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let apis: Vec<ApiDescriptor> = responsibilities.iter().map(|r| self.catalog.descriptor(r)).collect();
        let total = apis.len();

        tracing::debug!(pass_id = %pass_id, total, retry, "refresh pass start");
        self.seed_board(&apis, retry);
        self.publish_activity();

        let mut eta = EtaEstimator::default();
        let mut results: Vec<RefreshResult> = Vec::with_capacity(total);

        for (idx, api) in apis.iter().enumerate() {
            if token.is_cancelled() {
                tracing::info!(skipped = total - idx, "refresh cancelled");
                break;
            }
            if !self.probe.is_online().await {
                tracing::warn!(responsibility = %api.responsibility, "offline; remaining responsibilities not attempted");
                self.mark_offline(&apis[idx..], &mut results);
                break;
            }

            let progress = RefreshProgress::at(idx + 1, total, api, eta.remaining_ms(total - idx));
            self.observer.on_progress(&progress);
            self.with_lane(&api.responsibility, |lane| lane.records[0].start(Utc::now()));
            self.publish_activity();

            let t0 = Instant::now();
            let span = tracing::info_span!("responsibility", name = %api.responsibility);
            let reply = fetch.fetch(api).instrument(span).await;
            eta.record(t0.elapsed());

            let result = match reply {
                Ok(delta) => {
                    self.with_lane(&api.responsibility, |lane| merge_delta(lane, delta));
                    RefreshResult::succeeded(&api.responsibility)
                }
                Err(FetchError::NetworkUnavailable(msg)) => {
                    tracing::warn!(responsibility = %api.responsibility, error = %msg, "network lost mid-pass");
                    self.mark_offline(&apis[idx..], &mut results);
                    self.publish_activity();
                    break;
                }
                Err(e @ FetchError::RemoteCallFailed(_)) => {
                    let msg = e.to_string();
                    self.with_lane(&api.responsibility, |lane| lane.records[0].fail(Utc::now(), msg.clone()));
                    RefreshResult::failed(&api.responsibility, msg)
                }
            };
            self.observer.on_result(&result);
            results.push(result);
            self.publish_activity();
        }

        let cancelled = token.is_cancelled();
        let completed_at = Utc::now();
        self.record_results(&results, retry);

        let summary = RefreshSummary::from_results(&results, cancelled, started_at, completed_at);
        tracing::debug!(pass_id = %pass_id, succeeded = summary.succeeded, failed = summary.failed,
            offline = summary.offline, cancelled, "refresh pass end");
        Ok(RefreshOutcome {
            pass_id,
            state: if cancelled { RunState::Cancelled } else { RunState::Completed },
            summary,
            results,
            activities: self.activities(),
        })
    }

    fn seed_board(&self, apis: &[ApiDescriptor], retry: bool) {
        let mut board = self.board.lock().unwrap_or_else(PoisonError::into_inner);
        if !retry {
            board.clear();
        }
        for api in apis {
            let mut tracker = RawActivityRecord::pending(&api.api_name, api.api_type, &api.path);
            match board.iter_mut().find(|l| l.responsibility == api.responsibility) {
                Some(lane) => {
                    let prev = lane.records.first().map(|r| r.retry_count).unwrap_or(0);
                    tracker.retry_count = if retry { prev + 1 } else { prev };
                    lane.records = vec![tracker];
                }
                None => {
                    if retry {
                        tracker.retry_count = 1;
                    }
                    board.push(ActivityLane { responsibility: api.responsibility.clone(), records: vec![tracker] });
                }
            }
        }
    }

    fn with_lane<F>(&self, responsibility: &str, f: F)
    where
        F: FnOnce(&mut ActivityLane),
    {
        let mut board = self.board.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lane) = board.iter_mut().find(|l| l.responsibility == responsibility && !l.records.is_empty()) {
            f(lane);
        }
    }

    fn mark_offline(&self, rest: &[ApiDescriptor], results: &mut Vec<RefreshResult>) {
        for api in rest {
            self.with_lane(&api.responsibility, |lane| lane.records[0].reset());
            let r = RefreshResult::offline(&api.responsibility);
            self.observer.on_result(&r);
            results.push(r);
        }
    }

    fn record_results(&self, results: &[RefreshResult], retry: bool) {
        let mut last = self.last_results.lock().unwrap_or_else(PoisonError::into_inner);
        if !retry {
            *last = results.to_vec();
            return;
        }
        for r in results {
            match last.iter_mut().find(|l| l.responsibility == r.responsibility) {
                Some(slot) => *slot = r.clone(),
                None => last.push(r.clone()),
            }
        }
    }

    fn publish_activity(&self) {
        let snapshot = self.activities();
        self.observer.on_activity(&snapshot);
    }
}

fn flatten_lanes(lanes: &[ActivityLane]) -> Vec<RawActivityRecord> {
    lanes.iter().flat_map(|l| l.records.iter().cloned()).collect()
}

// Same-key success records fold into the lane's tracker; everything else rides along.
fn merge_delta(lane: &mut ActivityLane, delta: Vec<RawActivityRecord>) {
    lane.records.truncate(1);
    let key = lane.records[0].key();
    let (mut total, mut inserted) = (0i64, 0i64);
    let mut org: Option<String> = None;
    for rec in delta {
        if rec.key() == key && rec.status == ActivityStatus::Success {
            total += rec.total_records;
            inserted += rec.inserted_records;
            org.get_or_insert(rec.org_id);
        } else {
            lane.records.push(rec);
        }
    }
    let tracker = &mut lane.records[0];
    if let Some(org) = org {
        tracker.org_id = org;
    }
    tracker.succeed(Utc::now(), total, inserted);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::types::{ApiType, PENDING_ORG};
    use crate::connectivity::probe::testing::{online, probe, ScriptedSource};
    use crate::connectivity::probe::NetworkState;
    use crate::refresh::fetch::testing::ScriptedFetcher;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Recorder {
        progress: Mutex<Vec<RefreshProgress>>,
        results: Mutex<Vec<RefreshResult>>,
    }

    impl RefreshObserver for Recorder {
        fn on_progress(&self, p: &RefreshProgress) { self.progress.lock().unwrap().push(p.clone()); }
        fn on_result(&self, r: &RefreshResult) { self.results.lock().unwrap().push(r.clone()); }
    }

    fn names(list: &[&str]) -> Vec<String> { list.iter().map(|s| s.to_string()).collect() }

    fn orchestrator(src: Arc<ScriptedSource>) -> RefreshOrchestrator {
        RefreshOrchestrator::new(Arc::new(Catalog::default()), probe(src))
    }

    #[tokio::test]
    async fn completed_pass_reports_progress_for_every_responsibility() {
        let rec = Arc::new(Recorder::default());
        let orch = orchestrator(ScriptedSource::always_online()).with_observer(rec.clone());
        let out = orch.run(&names(&["A", "B", "C", "D"]), &ScriptedFetcher::new()).await.unwrap();

        assert_eq!(out.state, RunState::Completed);
        assert_eq!(out.summary.succeeded, 4);
        let progress = rec.progress.lock().unwrap();
        let currents: Vec<_> = progress.iter().map(|p| p.current).collect();
        assert_eq!(currents, vec![1, 2, 3, 4]);
        assert!(progress.windows(2).all(|w| w[0].percentage <= w[1].percentage));
        assert_eq!(progress.last().unwrap().percentage, 100);
        assert!(progress[0].estimated_time_remaining.is_none());
        assert!(progress[1].estimated_time_remaining.is_some());
        assert_eq!(rec.results.lock().unwrap().len(), 4);
        assert_eq!(orch.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn failure_does_not_abort_the_pass() {
        let orch = orchestrator(ScriptedSource::always_online());
        let fetch = ScriptedFetcher::new();
        fetch.fail("B", "500 internal");
        let out = orch.run(&names(&["A", "B", "C"]), &fetch).await.unwrap();

        assert_eq!(fetch.calls(), names(&["A", "B", "C"]));
        assert!(out.results[0].success && out.results[2].success);
        assert!(out.results[1].is_hard_failure());
        assert!(out.results[1].error.as_deref().unwrap().contains("500 internal"));
        let b = &orch.lanes()[1].records[0];
        assert_eq!(b.status, ActivityStatus::Error);
        assert!(b.completed_at.is_some());
    }

    #[tokio::test]
    async fn connectivity_drop_turns_the_rest_offline() {
        let src = ScriptedSource::new(vec![online(), NetworkState::disconnected()]);
        let orch = orchestrator(src);
        let fetch = ScriptedFetcher::new();
        let out = orch.run(&names(&["A", "B", "C"]), &fetch).await.unwrap();

        assert_eq!(fetch.calls(), names(&["A"]));
        assert_eq!(out.results, vec![
            RefreshResult::succeeded("A"),
            RefreshResult::offline("B"),
            RefreshResult::offline("C"),
        ]);
        assert_eq!((out.summary.failed, out.summary.offline), (0, 2));
        assert_eq!(out.state, RunState::Completed);
    }

    #[tokio::test]
    async fn network_unavailable_from_fetch_is_soft() {
        let orch = orchestrator(ScriptedSource::always_online());
        let fetch = ScriptedFetcher::new();
        fetch.push("B", Err(FetchError::NetworkUnavailable("dns".into())));
        let out = orch.run(&names(&["A", "B", "C"]), &fetch).await.unwrap();

        assert_eq!(fetch.calls(), names(&["A", "B"]));
        assert!(out.results[1].offline && out.results[2].offline);
        assert_eq!(orch.lanes()[1].records[0].status, ActivityStatus::Pending);
        assert!(orch.lanes()[1].records[0].completed_at.is_none());
    }

    #[tokio::test]
    async fn cancel_finishes_in_flight_and_skips_the_rest() {
        let orch = Arc::new(orchestrator(ScriptedSource::always_online()));
        let handle = Arc::clone(&orch);
        let fetch = ScriptedFetcher::with_hook(move |r| if r == "B" { handle.cancel() });
        let out = orch.run(&names(&["A", "B", "C"]), &fetch).await.unwrap();

        assert_eq!(fetch.calls(), names(&["A", "B"]));
        assert_eq!(out.state, RunState::Cancelled);
        assert!(out.summary.cancelled);
        assert_eq!(out.summary.total, 2);
        assert_eq!(orch.lanes()[2].records[0].status, ActivityStatus::Pending);

        // a cancelled pass does not poison the next one
        let out = orch.run(&names(&["C"]), &ScriptedFetcher::new()).await.unwrap();
        assert_eq!(out.state, RunState::Completed);
    }

    #[tokio::test]
    async fn cancel_reaches_the_pass_after_a_cancelled_one() {
        let orch = Arc::new(orchestrator(ScriptedSource::always_online()));
        let handle = Arc::clone(&orch);
        let first = ScriptedFetcher::with_hook(move |r| if r == "A" { handle.cancel() });
        let out = orch.run(&names(&["A", "B"]), &first).await.unwrap();
        assert_eq!(out.state, RunState::Cancelled);

        // the stale token is swapped out together with the running flag
        let handle = Arc::clone(&orch);
        let second = ScriptedFetcher::with_hook(move |r| if r == "A" { handle.cancel() });
        let out = orch.run(&names(&["A", "B"]), &second).await.unwrap();
        assert_eq!(second.calls(), names(&["A"]));
        assert_eq!(out.state, RunState::Cancelled);
    }

    #[tokio::test]
    async fn cancel_while_idle_is_a_no_op() {
        let orch = orchestrator(ScriptedSource::always_online());
        orch.cancel();
        let out = orch.run(&names(&["A"]), &ScriptedFetcher::new()).await.unwrap();
        assert_eq!(out.state, RunState::Completed);
    }

    #[tokio::test]
    async fn retry_failed_only_reruns_hard_failures_in_order() {
        let orch = orchestrator(ScriptedSource::always_online());
        let fetch = ScriptedFetcher::new();
        fetch.fail("B", "timeout");
        fetch.fail("C", "502");
        orch.run(&names(&["A", "B", "C"]), &fetch).await.unwrap();

        let out = orch.retry_failed_only(&fetch).await.unwrap();
        assert_eq!(fetch.calls(), names(&["A", "B", "C", "B", "C"]));
        assert_eq!(out.summary.total, 2);

        let lanes = orch.lanes();
        assert_eq!(lanes.len(), 3);
        assert_eq!(lanes[0].records[0].retry_count, 0);
        assert_eq!(lanes[1].records[0].retry_count, 1);
        assert!(orch.last_results().iter().all(|r| r.success));
        assert_eq!(orch.retry_failed_only(&fetch).await.unwrap_err(), RefreshError::NothingToRetry);
    }

    #[tokio::test]
    async fn offline_results_are_not_retried() {
        let orch = orchestrator(ScriptedSource::always_online());
        orch.restore(
            vec![RefreshResult::succeeded("A"), RefreshResult::offline("B"), RefreshResult::failed("C", "x")],
            vec![],
        )
        .unwrap();
        let fetch = ScriptedFetcher::new();
        orch.retry_failed_only(&fetch).await.unwrap();
        assert_eq!(fetch.calls(), names(&["C"]));
    }

    #[tokio::test]
    async fn retry_one_increments_retry_count_each_time() {
        let orch = orchestrator(ScriptedSource::always_online());
        let fetch = ScriptedFetcher::new();
        orch.run(&names(&["A", "B"]), &fetch).await.unwrap();
        orch.retry_one("B", &fetch).await.unwrap();
        orch.retry_one("B", &fetch).await.unwrap();
        assert_eq!(orch.lanes()[1].records[0].retry_count, 2);
        assert_eq!(orch.lanes()[0].records[0].retry_count, 0);
    }

    #[tokio::test]
    async fn fetch_delta_merges_into_the_tracker() {
        let orch = orchestrator(ScriptedSource::always_online());
        let fetch = ScriptedFetcher::new();
        let mut own = RawActivityRecord::pending("A", ApiType::Unknown, "A");
        own.org_id = "204".into();
        own.succeed(Utc::now(), 10, 8);
        let mut side = RawActivityRecord::pending("A_uoms", ApiType::Master, "uoms");
        side.fail(Utc::now(), "timeout");
        fetch.push("A", Ok(vec![own, side]));
        orch.run(&names(&["A"]), &fetch).await.unwrap();

        let lane = &orch.lanes()[0];
        assert_eq!(lane.records.len(), 2);
        assert_eq!(lane.records[0].status, ActivityStatus::Success);
        assert_eq!((lane.records[0].total_records, lane.records[0].inserted_records), (10, 8));
        assert_eq!(lane.records[0].org_id, "204");
        assert_eq!(lane.records[1].api_name, "A_uoms");

        let groups = orch.consolidated(&ConsolidationEngine::default());
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.can_expand));
    }

    #[tokio::test]
    async fn fresh_run_clears_the_board() {
        let orch = orchestrator(ScriptedSource::always_online());
        let fetch = ScriptedFetcher::new();
        orch.run(&names(&["A", "B"]), &fetch).await.unwrap();
        orch.run(&names(&["C"]), &fetch).await.unwrap();
        let lanes = orch.lanes();
        assert_eq!(lanes.len(), 1);
        assert_eq!(lanes[0].responsibility, "C");
        assert_eq!(lanes[0].records[0].org_id, PENDING_ORG);
    }

    #[tokio::test]
    async fn empty_list_is_rejected() {
        let orch = orchestrator(ScriptedSource::always_online());
        let err = orch.run(&[], &ScriptedFetcher::new()).await.unwrap_err();
        assert_eq!(err, RefreshError::EmptyResponsibilities);
    }

    struct Gate(Arc<Notify>);

    #[async_trait]
    impl ResponsibilityFetcher for Gate {
        async fn fetch(&self, _api: &ApiDescriptor) -> Result<Vec<RawActivityRecord>, FetchError> {
            self.0.notified().await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn second_run_while_running_is_rejected() {
        let orch = Arc::new(orchestrator(ScriptedSource::always_online()));
        let gate = Arc::new(Notify::new());
        let task = {
            let orch = Arc::clone(&orch);
            let gate = Gate(Arc::clone(&gate));
            tokio::spawn(async move { orch.run(&names(&["A"]), &gate).await })
        };
        while orch.state() != RunState::Running {
            tokio::task::yield_now().await;
        }

        let fetch = ScriptedFetcher::new();
        assert_eq!(orch.run(&names(&["B"]), &fetch).await.unwrap_err(), RefreshError::AlreadyRunning);
        assert!(fetch.calls().is_empty());

        gate.notify_one();
        assert!(task.await.unwrap().is_ok());
        assert_eq!(orch.state(), RunState::Idle);
    }
}
