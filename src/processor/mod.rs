use serde::Deserialize;

pub mod alert_processor;
pub mod format;

pub use alert_processor::{AlertProcessor, DispatchSummary, ProcessOutcome};

/// How the ledger decides an alert was already handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Any record for `(user, alert)` marks the whole alert handled. A contact
    /// whose send failed is not retried once another contact succeeded.
    #[default]
    PerAlert,
    /// Only contacts without a record for the alert are (re)attempted.
    PerContact,
}

impl DedupPolicy {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "per_contact" | "contact" => Self::PerContact,
            _ => Self::PerAlert,
        }
    }
}
