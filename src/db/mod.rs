use anyhow::Result;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};
use std::time::Duration;

pub mod ledger;
pub mod queries;

pub use ledger::{Ledger, LedgerError};

pub type DbPool = Pool<Sqlite>;

/// Opens (creating if needed) the on-disk ledger database.
///
/// WAL with `synchronous = FULL` fsyncs every committed insert, which is what
/// makes a dispatch record survive a crash right after the send.
pub async fn init_pool(path: &str) -> Result<DbPool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    sqlx::query(queries::CREATE_SMS_LOG).execute(&pool).await?;
    sqlx::query(queries::CREATE_SMS_LOG_ALERT_INDEX)
        .execute(&pool)
        .await?;
    Ok(pool)
}
