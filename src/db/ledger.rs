use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{queries, DbPool};
use crate::models::dispatch_record::DispatchRecord;

pub const DEFAULT_RETENTION: u32 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Durable record of every message that went out.
///
/// A row is the only thing standing between a restart and a duplicate
/// emergency message, so every write is its own committed statement.
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: DbPool,
}

impl Ledger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// True iff any contact has a record for this alert.
    pub async fn exists(&self, user_id: i64, alert_id: i64) -> Result<bool, LedgerError> {
        let found: i64 = sqlx::query_scalar(queries::EXISTS_FOR_ALERT)
            .bind(user_id)
            .bind(alert_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(found != 0)
    }

    pub async fn exists_for_contact(
        &self,
        user_id: i64,
        alert_id: i64,
        phone_number: &str,
    ) -> Result<bool, LedgerError> {
        let found: i64 = sqlx::query_scalar(queries::EXISTS_FOR_CONTACT)
            .bind(user_id)
            .bind(alert_id)
            .bind(phone_number)
            .fetch_one(&self.pool)
            .await?;
        Ok(found != 0)
    }

    /// Appends a `sent` row and returns its id.
    pub async fn record(
        &self,
        user_id: i64,
        alert_id: i64,
        phone_number: &str,
        message: &str,
    ) -> Result<i64, LedgerError> {
        self.record_at(user_id, alert_id, phone_number, message, Utc::now())
            .await
    }

    async fn record_at(
        &self,
        user_id: i64,
        alert_id: i64,
        phone_number: &str,
        message: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<i64, LedgerError> {
        let result = sqlx::query(queries::INSERT_DISPATCH)
            .bind(user_id)
            .bind(alert_id)
            .bind(phone_number)
            .bind(message)
            .bind(sent_at.timestamp_millis())
            .execute(&self.pool)
            .await?;

        debug!(user_id, alert_id, phone = phone_number, "dispatch recorded");
        Ok(result.last_insert_rowid())
    }

    /// Keeps the `retain` most recent rows by send time, returns rows removed.
    pub async fn trim(&self, retain: u32) -> Result<u64, LedgerError> {
        let result = sqlx::query(queries::TRIM_TO_RECENT)
            .bind(i64::from(retain))
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, retain, "trimmed dispatch ledger");
        }
        Ok(removed)
    }

    pub async fn count_since(&self, since: DateTime<Utc>) -> Result<i64, LedgerError> {
        let count = sqlx::query_scalar(queries::COUNT_SINCE)
            .bind(since.timestamp_millis())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count(&self) -> Result<i64, LedgerError> {
        let count = sqlx::query_scalar(queries::COUNT_ALL)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Newest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<DispatchRecord>, LedgerError> {
        let rows = sqlx::query_as::<_, DispatchRecord>(queries::SELECT_RECENT)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::init_pool;
    use chrono::Duration;
    use tempfile::TempDir;

    pub(crate) async fn temp_ledger() -> (TempDir, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let pool = init_pool(path.to_str().unwrap()).await.unwrap();
        (dir, Ledger::new(pool))
    }

    /// Makes later inserts into the ledger at `dir` fail while reads keep working.
    pub(crate) async fn reject_inserts(dir: &TempDir) {
        let path = dir.path().join("ledger.db");
        let pool = init_pool(path.to_str().unwrap()).await.unwrap();
        sqlx::query(
            "CREATE TRIGGER reject_sms_log_insert BEFORE INSERT ON sms_log \
             BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;
    }

    #[tokio::test]
    async fn test_rejected_insert_is_storage_error() {
        let (dir, ledger) = temp_ledger().await;
        reject_inserts(&dir).await;

        let err = ledger.record(7, 42, "+15551234567", "hello").await.unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));
        assert!(!ledger.exists(7, 42).await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_after_record() {
        let (_dir, ledger) = temp_ledger().await;

        assert!(!ledger.exists(7, 42).await.unwrap());
        ledger.record(7, 42, "+15551234567", "hello").await.unwrap();

        assert!(ledger.exists(7, 42).await.unwrap());
        assert!(!ledger.exists(7, 43).await.unwrap());
        assert!(!ledger.exists(8, 42).await.unwrap());
        assert!(ledger.exists_for_contact(7, 42, "+15551234567").await.unwrap());
        assert!(!ledger.exists_for_contact(7, 42, "+15559999999").await.unwrap());
    }

    #[tokio::test]
    async fn test_record_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let path = path.to_str().unwrap();

        let ledger = Ledger::new(init_pool(path).await.unwrap());
        ledger.record(7, 42, "+15551234567", "hello").await.unwrap();
        ledger.close().await;

        let reopened = Ledger::new(init_pool(path).await.unwrap());
        assert!(reopened.exists(7, 42).await.unwrap());
        assert_eq!(reopened.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_trim_keeps_most_recent() {
        let (_dir, ledger) = temp_ledger().await;
        let base = Utc::now() - Duration::days(1);

        // Insert out of time order so trimming by id would pick the wrong rows.
        for i in 0..1200i64 {
            let offset = (i * 7) % 1200;
            ledger
                .record_at(1, offset, "+15550000000", "m", base + Duration::seconds(offset))
                .await
                .unwrap();
        }
        assert_eq!(ledger.count().await.unwrap(), 1200);

        let removed = ledger.trim(DEFAULT_RETENTION).await.unwrap();
        assert_eq!(removed, 200);
        assert_eq!(ledger.count().await.unwrap(), 1000);

        for alert_id in 0..200 {
            assert!(!ledger.exists(1, alert_id).await.unwrap(), "alert {alert_id} kept");
        }
        assert!(ledger.exists(1, 200).await.unwrap());
        assert!(ledger.exists(1, 1199).await.unwrap());

        assert_eq!(ledger.trim(DEFAULT_RETENTION).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_count_since_and_recent() {
        let (_dir, ledger) = temp_ledger().await;
        let now = Utc::now();

        ledger
            .record_at(1, 1, "+15550000001", "old", now - Duration::days(2))
            .await
            .unwrap();
        ledger
            .record_at(1, 2, "+15550000002", "new", now - Duration::minutes(5))
            .await
            .unwrap();
        ledger.record(1, 3, "+15550000003", "newest").await.unwrap();

        assert_eq!(ledger.count_since(now - Duration::hours(1)).await.unwrap(), 2);

        let recent = ledger.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "newest");
        assert_eq!(recent[1].alert_id, 2);
        assert_eq!(recent[0].status, "sent");
        assert!(recent[0].sent_at_utc().is_some());
    }

    #[tokio::test]
    async fn test_closed_ledger_reports_error() {
        let (_dir, ledger) = temp_ledger().await;
        ledger.close().await;

        assert!(matches!(
            ledger.record(1, 1, "+15550000001", "m").await,
            Err(LedgerError::Storage(_))
        ));
        assert!(ledger.exists(1, 1).await.is_err());
    }
}
