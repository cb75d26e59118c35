use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Snapshot reported by the platform network check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkState {
    pub is_connected: bool,
    pub is_internet_reachable: Option<bool>,
    #[serde(rename = "type")]
    pub connection_type: Option<String>,
}

impl NetworkState {
    pub fn disconnected() -> Self {
        Self { is_connected: false, is_internet_reachable: Some(false), connection_type: None }
    }

    /// Unknown reachability counts as offline.
    pub fn is_online(&self) -> bool {
        self.is_connected && self.is_internet_reachable == Some(true)
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connectivity check failed: {0}")]
    Check(String),
}

/// Platform-specific connectivity check.
#[async_trait]
pub trait NetworkStateSource: Send + Sync {
    async fn current_state(&self) -> Result<NetworkState, ProbeError>;
}

type Listener = Arc<dyn Fn(&NetworkState) + Send + Sync>;

struct ProbeInner {
    source: Arc<dyn NetworkStateSource>,
    cached: Mutex<Option<NetworkState>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

/// Cached, subscribable online signal over a [`NetworkStateSource`].
#[derive(Clone)]
pub struct ConnectivityProbe {
    inner: Arc<ProbeInner>,
}

impl ConnectivityProbe {
    pub fn new(source: Arc<dyn NetworkStateSource>) -> Self {
        Self {
            inner: Arc::new(ProbeInner {
                source,
                cached: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Fresh check. Gating decisions must use this, not the cache.
    pub async fn is_online(&self) -> bool {
        self.check().await.is_online()
    }

    pub async fn check(&self) -> NetworkState {
        let state = match self.inner.source.current_state().await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "connectivity check failed; treating as offline");
                NetworkState::disconnected()
            }
        };
        self.observe(state.clone());
        state
    }

    /// Last observed state; display only.
    pub fn cached_state(&self) -> Option<NetworkState> {
        self.inner.cached.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Record a state pushed by the platform. Listeners hear about changes only.
    pub fn observe(&self, state: NetworkState) {
        let changed = {
            let mut cached = self.inner.cached.lock().unwrap_or_else(PoisonError::into_inner);
            let changed = cached.as_ref() != Some(&state);
            *cached = Some(state.clone());
            changed
        };
        if !changed { return; }

        tracing::debug!(online = state.is_online(), connected = state.is_connected, "network state changed");
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for l in listeners {
            l(&state);
        }
    }

    /// Register for state transitions. The caller owns the returned handle and
    /// must call [`Subscription::release`] to unregister.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&NetworkState) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        Subscription { id, inner: Arc::downgrade(&self.inner) }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Poll the source every `every` until `cancel` fires, publishing transitions.
    pub fn spawn_monitor(&self, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let probe = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => { probe.check().await; }
                }
            }
            tracing::debug!("connectivity monitor stopped");
        })
    }
}

/// Handle for one registered listener.
pub struct Subscription {
    id: u64,
    inner: Weak<ProbeInner>,
}

impl Subscription {
    pub fn release(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}
