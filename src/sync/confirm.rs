use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::router::{ConfirmError, ConfirmPrimitive};
use crate::store::{PendingTransaction, SqliteStore};

/// POSTs each queued payload to the responsibility's confirm endpoint and
/// updates the local queue row by row.
pub struct HttpConfirmer {
    http: Client,
    endpoint: Url,
    token: Option<String>,
    store: SqliteStore,
}

impl HttpConfirmer {
    pub fn new(http: Client, endpoint: Url, token: Option<String>, store: SqliteStore) -> Self {
        Self { http, endpoint, token, store }
    }

    async fn post(&self, tx: &PendingTransaction) -> Result<(), ConfirmError> {
        let mut req = self.http.post(self.endpoint.clone()).json(&tx.payload);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(|e| {
            if e.is_connect() { ConfirmError::NetworkUnavailable(e.to_string()) } else { ConfirmError::RemoteCallFailed(e.to_string()) }
        })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(200).collect();
        Err(ConfirmError::RemoteCallFailed(format!("{status}: {snippet}")))
    }
}

#[async_trait]
impl ConfirmPrimitive for HttpConfirmer {
    async fn confirm(&self, responsibility: &str, pending: &[PendingTransaction]) -> Result<usize, ConfirmError> {
        let store_err = |e: crate::store::StoreError| ConfirmError::Store(e.to_string());
        let mut confirmed = 0usize;
        let mut rejected = 0usize;
        let mut first_error: Option<String> = None;

        for tx in pending {
            match self.post(tx).await {
                Ok(()) => {
                    self.store.mark_confirmed(std::slice::from_ref(&tx.id)).await.map_err(store_err)?;
                    confirmed += 1;
                }
                // leave this and later rows untouched; they go out on reconnect
                Err(e @ ConfirmError::NetworkUnavailable(_)) => return Err(e),
                Err(e) => {
                    let msg = e.to_string();
                    tracing::warn!(responsibility, id = %tx.id, error = %msg, "transaction rejected");
                    self.store.record_failure(std::slice::from_ref(&tx.id), &msg).await.map_err(store_err)?;
                    rejected += 1;
                    first_error.get_or_insert(msg);
                }
            }
        }

        match first_error {
            None => Ok(confirmed),
            Some(err) => Err(ConfirmError::RemoteCallFailed(format!(
                "{rejected} of {} rejected: {err}",
                pending.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_queue_confirms_nothing_without_network() {
        let store = SqliteStore::in_memory().await.unwrap();
        // unroutable endpoint: any request would fail
        let c = HttpConfirmer::new(Client::new(), Url::parse("http://127.0.0.1:9/confirm").unwrap(), None, store);
        assert_eq!(c.confirm("SHIP_CONFIRM", &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn refused_connection_is_offline_and_leaves_rows_pending() {
        let store = SqliteStore::in_memory().await.unwrap();
        let tx = store.enqueue("SHIP_CONFIRM", serde_json::json!({"delivery": 7})).await.unwrap();
        let c = HttpConfirmer::new(Client::new(), Url::parse("http://127.0.0.1:9/confirm").unwrap(), None, store.clone());
        let err = c.confirm("SHIP_CONFIRM", &[tx]).await.unwrap_err();
        assert!(matches!(err, ConfirmError::NetworkUnavailable(_)));
        let rows = store.list(None).await.unwrap();
        assert_eq!(rows[0].retry_count, 0);
        assert_eq!(rows[0].status, crate::store::PendingStatus::Pending);
    }
}
