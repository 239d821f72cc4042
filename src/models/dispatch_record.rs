use chrono::{DateTime, TimeZone, Utc};
use sqlx::FromRow;

/// One row of the dispatch ledger: proof that a message went out to a contact.
#[derive(Debug, Clone, FromRow)]
pub struct DispatchRecord {
    pub id: i64, // autoincrement
    pub user_id: i64,
    pub alert_id: i64,
    pub phone_number: String,
    pub message: String,
    pub sent_at: i64, // epoch millis
    pub status: String,
}

impl DispatchRecord {
    pub fn sent_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.sent_at).single()
    }
}
