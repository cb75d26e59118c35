use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::types::ResponsibilitySync;
use crate::store::PendingTransaction;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfirmError {
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("remote call failed: {0}")]
    RemoteCallFailed(String),
    #[error("store error: {0}")]
    Store(String),
}

/// Pushes one responsibility's queued transactions to the backend.
///
/// Implementations own the store bookkeeping: confirmed rows are marked
/// confirmed, rejected rows record their failure.
#[async_trait]
pub trait ConfirmPrimitive: Send + Sync {
    async fn confirm(&self, responsibility: &str, pending: &[PendingTransaction]) -> Result<usize, ConfirmError>;
}

/// Responsibility name to confirm primitive.
#[derive(Clone, Default)]
pub struct ConfirmRouter {
    routes: HashMap<String, Arc<dyn ConfirmPrimitive>>,
}

impl ConfirmRouter {
    pub fn new() -> Self { Self::default() }

    pub fn register(&mut self, responsibility: impl Into<String>, primitive: Arc<dyn ConfirmPrimitive>) -> &mut Self {
        self.routes.insert(responsibility.into(), primitive);
        self
    }

    pub fn is_registered(&self, responsibility: &str) -> bool { self.routes.contains_key(responsibility) }

    pub fn responsibilities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routes.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn route(&self, responsibility: &str, pending: &[PendingTransaction]) -> ResponsibilitySync {
        let Some(primitive) = self.routes.get(responsibility) else {
            tracing::warn!(responsibility, "no confirm route registered");
            return ResponsibilitySync::failed(responsibility, format!("invalid responsibility '{responsibility}'"));
        };
        match primitive.confirm(responsibility, pending).await {
            Ok(n) => ResponsibilitySync::synced(responsibility, n),
            Err(ConfirmError::NetworkUnavailable(msg)) => {
                tracing::warn!(responsibility, error = %msg, "offline during confirm");
                ResponsibilitySync::offline(responsibility)
            }
            Err(e) => ResponsibilitySync::failed(responsibility, e.to_string()),
        }
    }
}
