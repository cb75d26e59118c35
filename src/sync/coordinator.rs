use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::notify::{Notification, Notifier};
use super::router::ConfirmRouter;
use super::types::{classify, ResponsibilitySync, SyncClassification, SyncError, SyncReport};
use crate::connectivity::probe::ConnectivityProbe;
use crate::store::{PendingTransaction, PendingTransactionStore};

struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, SyncError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::AlreadySyncing)?;
        Ok(Self(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) { self.0.store(false, Ordering::Release); }
}

/// Replays locally queued transactions once the device is online.
pub struct TransactionSyncCoordinator {
    probe: ConnectivityProbe,
    store: Arc<dyn PendingTransactionStore>,
    router: ConfirmRouter,
    notifier: Arc<dyn Notifier>,
    syncing: AtomicBool,
    pending_count: watch::Sender<usize>,
}

impl TransactionSyncCoordinator {
    pub fn new(
        probe: ConnectivityProbe,
        store: Arc<dyn PendingTransactionStore>,
        router: ConfirmRouter,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (pending_count, _) = watch::channel(0);
        Self { probe, store, router, notifier, syncing: AtomicBool::new(false), pending_count }
    }

    pub fn is_syncing(&self) -> bool { self.syncing.load(Ordering::Acquire) }

    /// Pending count as of the last pass (or the last offline report).
    pub fn pending_count(&self) -> watch::Receiver<usize> { self.pending_count.subscribe() }

    pub async fn sync_all(&self, responsibilities: &[String]) -> Result<SyncReport, SyncError> {
        if responsibilities.is_empty() {
            return Err(SyncError::EmptyResponsibilities);
        }
        let _guard = SyncGuard::acquire(&self.syncing)?;

        if !self.probe.is_online().await {
            let known = *self.pending_count.borrow();
            let outcomes = responsibilities.iter().map(|r| ResponsibilitySync::offline(r)).collect();
            tracing::info!(pending = known, "offline; sync deferred");
            return Ok(self.finish(outcomes, known, known));
        }

        let pending = self.store.list_pending().await?;
        let pending_before = pending.len();
        self.pending_count.send_replace(pending_before);

        let mut by_resp: HashMap<&str, Vec<PendingTransaction>> = HashMap::new();
        for tx in &pending {
            by_resp.entry(tx.responsibility.as_str()).or_default().push(tx.clone());
        }

        let mut outcomes: Vec<ResponsibilitySync> = Vec::with_capacity(responsibilities.len());
        for (idx, resp) in responsibilities.iter().enumerate() {
            let batch = by_resp.get(resp.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            tracing::debug!(responsibility = %resp, pending = batch.len(), "confirm");
            let outcome = self.router.route(resp, batch).await;
            if outcome.offline {
                outcomes.push(outcome);
                outcomes.extend(responsibilities[idx + 1..].iter().map(|r| ResponsibilitySync::offline(r)));
                break;
            }
            outcomes.push(outcome);
        }

        let pending_after = self.store.list_pending().await?.len();
        self.pending_count.send_replace(pending_after);
        Ok(self.finish(outcomes, pending_before, pending_after))
    }

    fn finish(&self, outcomes: Vec<ResponsibilitySync>, pending_before: usize, pending_after: usize) -> SyncReport {
        let classification = classify(&outcomes);
        let synced = outcomes.iter().filter(|o| o.success).count();
        let errored = outcomes.iter().filter(|o| o.is_error()).count();
        let deferred = outcomes.iter().filter(|o| o.offline).count();
        let notification = Notification::for_sync(classification, synced, errored, deferred);
        self.notifier.notify(&notification);
        SyncReport { classification, synced, errored, deferred, outcomes, pending_before, pending_after, notification }
    }

    /// Run `sync_all` every time connectivity comes back, until `cancel` fires.
    pub fn spawn_auto_sync(self: Arc<Self>, responsibilities: Vec<String>, cancel: CancellationToken) -> AutoSync {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let was_online = Arc::new(AtomicBool::new(
            self.probe.cached_state().map(|s| s.is_online()).unwrap_or(false),
        ));
        let subscription = self.probe.subscribe(move |state| {
            let now = state.is_online();
            if now && !was_online.swap(now, Ordering::AcqRel) {
                let _ = tx.send(());
            } else {
                was_online.store(now, Ordering::Release);
            }
        });

        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => {
                        if msg.is_none() { break; }
                        match self.sync_all(&responsibilities).await {
                            Ok(r) if r.classification == SyncClassification::Offline => {
                                tracing::debug!("reconnect was brief; still offline");
                            }
                            Ok(r) => tracing::info!(synced = r.synced, errored = r.errored, "auto sync finished"),
                            Err(SyncError::AlreadySyncing) => tracing::debug!("sync already running; skipping"),
                            Err(e) => tracing::warn!(error = %e, "auto sync failed"),
                        }
                    }
                }
            }
            subscription.release();
        });
        AutoSync { cancel, handle }
    }
}

pub struct AutoSync {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl AutoSync {
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "auto sync task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Notify;

    use super::*;
    use crate::connectivity::probe::testing::{online, probe, ScriptedSource};
    use crate::connectivity::probe::NetworkState;
    use crate::store::{PendingStatus, SqliteStore, StoreError};
    use crate::sync::notify::testing::CapturingNotifier;
    use crate::sync::notify::NotificationKind;
    use crate::sync::router::testing::ScriptedConfirmer;
    use crate::sync::router::{ConfirmError, ConfirmPrimitive};

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<PendingTransaction>>,
        lists: AtomicUsize,
    }

    impl MemoryStore {
        fn with(rows: Vec<PendingTransaction>) -> Arc<Self> {
            Arc::new(Self { rows: Mutex::new(rows), ..Self::default() })
        }
    }

    #[async_trait]
    impl PendingTransactionStore for MemoryStore {
        async fn list_pending(&self) -> Result<Vec<PendingTransaction>, StoreError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    fn tx(id: &str, resp: &str) -> PendingTransaction {
        PendingTransaction {
            id: id.into(),
            responsibility: resp.into(),
            payload: serde_json::json!({"id": id}),
            retry_count: 0,
            status: PendingStatus::Pending,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    fn names(list: &[&str]) -> Vec<String> { list.iter().map(|s| s.to_string()).collect() }

    fn coordinator(
        src: Arc<ScriptedSource>,
        store: Arc<dyn PendingTransactionStore>,
        router: ConfirmRouter,
    ) -> (TransactionSyncCoordinator, Arc<CapturingNotifier>) {
        let notes = Arc::new(CapturingNotifier::default());
        (TransactionSyncCoordinator::new(probe(src), store, router, notes.clone()), notes)
    }

    #[tokio::test]
    async fn offline_sync_touches_neither_store_nor_network() {
        let store = MemoryStore::with(vec![tx("1", "A")]);
        let c = ScriptedConfirmer::new();
        let mut router = ConfirmRouter::new();
        router.register("A", c.clone());
        let (coord, notes) = coordinator(ScriptedSource::always_offline(), store.clone(), router);

        let report = coord.sync_all(&names(&["A"])).await.unwrap();
        assert_eq!(report.classification, SyncClassification::Offline);
        assert_eq!(store.lists.load(Ordering::SeqCst), 0);
        assert!(c.calls().is_empty());
        assert_eq!(notes.seen.lock().unwrap()[0].kind, NotificationKind::Info);
    }

    #[tokio::test]
    async fn partial_failure_is_classified_and_announced() {
        let store = MemoryStore::with(vec![tx("1", "A"), tx("2", "B"), tx("3", "A")]);
        let ok = ScriptedConfirmer::new();
        let bad = ScriptedConfirmer::new();
        bad.push(Err(ConfirmError::RemoteCallFailed("409".into())));
        let mut router = ConfirmRouter::new();
        router.register("A", ok.clone()).register("B", bad.clone());
        let (coord, notes) = coordinator(ScriptedSource::always_online(), store.clone(), router);

        let report = coord.sync_all(&names(&["A", "B"])).await.unwrap();
        assert_eq!(report.classification, SyncClassification::Partial);
        assert_eq!((report.synced, report.errored), (1, 1));
        assert_eq!(ok.calls(), vec![("A".to_string(), 2)]);
        assert_eq!(bad.calls(), vec![("B".to_string(), 1)]);
        assert_eq!(store.lists.load(Ordering::SeqCst), 2);

        let seen = notes.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, NotificationKind::Warning);
        assert!(seen[0].message.contains("1 of 2"));
    }

    #[tokio::test]
    async fn unknown_responsibility_is_reported_not_thrown() {
        let (coord, _) = coordinator(ScriptedSource::always_online(), MemoryStore::with(vec![]), ConfirmRouter::new());
        let report = coord.sync_all(&names(&["GHOST"])).await.unwrap();
        assert_eq!(report.classification, SyncClassification::Failure);
        assert!(report.outcomes[0].error.as_deref().unwrap().contains("invalid responsibility"));
    }

    #[tokio::test]
    async fn primitive_going_offline_short_circuits() {
        let a = ScriptedConfirmer::new();
        a.push(Err(ConfirmError::NetworkUnavailable("reset".into())));
        let b = ScriptedConfirmer::new();
        let mut router = ConfirmRouter::new();
        router.register("A", a.clone()).register("B", b.clone());
        let (coord, _) = coordinator(ScriptedSource::always_online(), MemoryStore::with(vec![]), router);

        let report = coord.sync_all(&names(&["A", "B"])).await.unwrap();
        assert_eq!(report.classification, SyncClassification::Offline);
        assert!(report.outcomes.iter().all(|o| o.offline));
        assert!(b.calls().is_empty());
    }

    #[tokio::test]
    async fn errors_before_going_offline_stay_visible() {
        let store = MemoryStore::with(vec![tx("1", "A"), tx("2", "B"), tx("3", "C")]);
        let a = ScriptedConfirmer::new();
        let b = ScriptedConfirmer::new();
        b.push(Err(ConfirmError::RemoteCallFailed("409".into())));
        let c = ScriptedConfirmer::new();
        c.push(Err(ConfirmError::NetworkUnavailable("reset".into())));
        let mut router = ConfirmRouter::new();
        router.register("A", a.clone()).register("B", b.clone()).register("C", c.clone());
        let (coord, notes) = coordinator(ScriptedSource::always_online(), store, router);

        let report = coord.sync_all(&names(&["A", "B", "C"])).await.unwrap();
        assert_eq!(report.classification, SyncClassification::Partial);
        assert_eq!((report.synced, report.errored, report.deferred), (1, 1, 1));
        assert!(report.outcomes[2].offline);

        let seen = notes.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, NotificationKind::Warning);
        assert_eq!(seen[0].message, "1 of 2 failed to sync; they will be retried; 1 deferred (offline)");
    }

    #[tokio::test]
    async fn reentrant_sync_returns_immediately() {
        let gate = Arc::new(Notify::new());
        let c = ScriptedConfirmer::gated(Arc::clone(&gate));
        let mut router = ConfirmRouter::new();
        router.register("A", c.clone());
        let (coord, _) = coordinator(ScriptedSource::always_online(), MemoryStore::with(vec![tx("1", "A")]), router);
        let coord = Arc::new(coord);

        let first = {
            let coord = Arc::clone(&coord);
            tokio::spawn(async move { coord.sync_all(&names(&["A"])).await })
        };
        while c.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(coord.is_syncing());
        assert!(matches!(coord.sync_all(&names(&["A"])).await, Err(SyncError::AlreadySyncing)));
        assert_eq!(c.calls().len(), 1);

        gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap().classification, SyncClassification::Success);
        assert!(!coord.is_syncing());
    }

    #[tokio::test]
    async fn empty_list_is_rejected() {
        let (coord, _) = coordinator(ScriptedSource::always_online(), MemoryStore::with(vec![]), ConfirmRouter::new());
        assert!(matches!(coord.sync_all(&[]).await, Err(SyncError::EmptyResponsibilities)));
    }

    struct ConfirmInStore(SqliteStore);

    #[async_trait]
    impl ConfirmPrimitive for ConfirmInStore {
        async fn confirm(&self, _resp: &str, pending: &[PendingTransaction]) -> Result<usize, ConfirmError> {
            let ids: Vec<String> = pending.iter().map(|t| t.id.clone()).collect();
            let n = self.0.mark_confirmed(&ids).await.map_err(|e| ConfirmError::Store(e.to_string()))?;
            Ok(n as usize)
        }
    }

    #[tokio::test]
    async fn pending_count_is_requeried_and_published() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.enqueue("A", serde_json::json!({"n": 1})).await.unwrap();
        store.enqueue("A", serde_json::json!({"n": 2})).await.unwrap();
        store.enqueue("B", serde_json::json!({"n": 3})).await.unwrap();
        let mut router = ConfirmRouter::new();
        router.register("A", Arc::new(ConfirmInStore(store.clone())));
        let (coord, _) = coordinator(ScriptedSource::always_online(), Arc::new(store.clone()), router);
        let rx = coord.pending_count();

        let report = coord.sync_all(&names(&["A"])).await.unwrap();
        assert_eq!((report.pending_before, report.pending_after), (3, 1));
        assert_eq!(report.outcomes[0].confirmed, 2);
        assert_eq!(*rx.borrow(), 1);
    }

    #[tokio::test]
    async fn auto_sync_fires_on_reconnect() {
        let src = ScriptedSource::always_online();
        let p = probe(src);
        let c = ScriptedConfirmer::new();
        let mut router = ConfirmRouter::new();
        router.register("A", c.clone());
        let coord = Arc::new(TransactionSyncCoordinator::new(
            p.clone(),
            MemoryStore::with(vec![tx("1", "A")]),
            router,
            Arc::new(CapturingNotifier::default()),
        ));

        let auto = Arc::clone(&coord).spawn_auto_sync(names(&["A"]), CancellationToken::new());
        p.observe(NetworkState::disconnected());
        assert!(c.calls().is_empty());
        p.observe(online());

        let waited = tokio::time::timeout(Duration::from_secs(2), async {
            while c.calls().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok());
        auto.stop().await;
        assert_eq!(p.listener_count(), 0);
    }
}
