use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use super::{JournalEntry, PendingStatus, PendingTransaction, PendingTransactionStore, StoreError};

/// SQLite-backed offline queue and refresh journal.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct PendingRow {
    id: String,
    responsibility: String,
    payload: String,
    retry_count: i64,
    status: String,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PendingRow> for PendingTransaction {
    type Error = StoreError;

    fn try_from(r: PendingRow) -> Result<Self, Self::Error> {
        Ok(PendingTransaction {
            id: r.id,
            responsibility: r.responsibility,
            payload: serde_json::from_str(&r.payload)?,
            retry_count: u32::try_from(r.retry_count.max(0)).unwrap_or(u32::MAX),
            status: PendingStatus::parse(&r.status)?,
            last_error: r.last_error,
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PassRow {
    pass_id: String,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    cancelled: bool,
    results: String,
    lanes: String,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database, already migrated.
    pub async fn in_memory() -> Result<Self, StoreError> {
        // one long-lived connection: each sqlite memory connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }

    pub async fn enqueue(&self, responsibility: &str, payload: serde_json::Value) -> Result<PendingTransaction, StoreError> {
        let now = Utc::now();
        let tx = PendingTransaction {
            id: Uuid::new_v4().to_string(),
            responsibility: responsibility.to_string(),
            payload,
            retry_count: 0,
            status: PendingStatus::Pending,
            last_error: None,
            created_at: now,
        };
        sqlx::query(
            r#"
            INSERT INTO pending_transaction
                (id, responsibility, payload, retry_count, status, last_error, created_at, updated_at)
            VALUES (?, ?, ?, 0, 'pending', NULL, ?, ?)
            "#,
        )
        .bind(&tx.id)
        .bind(&tx.responsibility)
        .bind(tx.payload.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(tx)
    }

    /// Rows in the given status, or every row when `status` is `None`.
    pub async fn list(&self, status: Option<PendingStatus>) -> Result<Vec<PendingTransaction>, StoreError> {
        let rows: Vec<PendingRow> = sqlx::query_as(
            r#"
            SELECT id, responsibility, payload, retry_count, status, last_error, created_at
            FROM pending_transaction
            WHERE (?1 IS NULL OR status = ?1)
            ORDER BY created_at, id
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PendingTransaction::try_from).collect()
    }

    pub async fn mark_confirmed(&self, ids: &[String]) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut changed = 0u64;
        for id in ids {
            let res = sqlx::query(
                "UPDATE pending_transaction SET status = 'confirmed', last_error = NULL, updated_at = ? WHERE id = ?",
            )
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            changed += res.rows_affected();
        }
        tx.commit().await?;
        Ok(changed)
    }

    pub async fn record_failure(&self, ids: &[String], error: &str) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut changed = 0u64;
        for id in ids {
            let res = sqlx::query(
                r#"
                UPDATE pending_transaction
                SET status = 'failed', retry_count = retry_count + 1, last_error = ?, updated_at = ?
                WHERE id = ? AND status != 'confirmed'
                "#,
            )
            .bind(error)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            changed += res.rows_affected();
        }
        tx.commit().await?;
        Ok(changed)
    }

    pub async fn save_pass(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_pass (pass_id, started_at, completed_at, cancelled, results, lanes)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.pass_id)
        .bind(entry.started_at)
        .bind(entry.completed_at)
        .bind(entry.cancelled)
        .bind(serde_json::to_string(&entry.results)?)
        .bind(serde_json::to_string(&entry.lanes)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn last_pass(&self) -> Result<Option<JournalEntry>, StoreError> {
        let row: Option<PassRow> = sqlx::query_as(
            r#"
            SELECT pass_id, started_at, completed_at, cancelled, results, lanes
            FROM refresh_pass
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        let Some(r) = row else { return Ok(None) };
        Ok(Some(JournalEntry {
            pass_id: r.pass_id,
            started_at: r.started_at,
            completed_at: r.completed_at,
            cancelled: r.cancelled,
            results: serde_json::from_str(&r.results)?,
            lanes: serde_json::from_str(&r.lanes)?,
        }))
    }
}

#[async_trait]
impl PendingTransactionStore for SqliteStore {
    async fn list_pending(&self) -> Result<Vec<PendingTransaction>, StoreError> {
        let mut rows = self.list(None).await?;
        rows.retain(|t| t.status != PendingStatus::Confirmed);
        Ok(rows)
    }
}
