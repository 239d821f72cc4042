use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

/// Body of `POST /api/sms-status`.
#[derive(Debug, Clone, Serialize)]
pub struct SmsStatusReport {
    pub user_id: i64,
    pub alert_id: i64,
    pub phone_number: String,
    pub status: DeliveryStatus,
    pub timestamp: i64, // epoch millis
}
