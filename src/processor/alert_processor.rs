use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::format::format_emergency_message;
use super::DedupPolicy;
use crate::api::StatusReporter;
use crate::db::{Ledger, LedgerError};
use crate::location::{LocationProvider, LOCATION_UNAVAILABLE};
use crate::models::alert::CriticalAlert;
use crate::transport::{SmsTransport, TransportError};

/// Upper bound for one location lookup or one transport send.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    /// Sends that went out but could not be recorded; these may repeat.
    pub ledger_failures: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    AlreadyHandled,
    Dispatched(DispatchSummary),
}

/// Turns one critical alert into at most one SMS per contact.
pub struct AlertProcessor {
    ledger: Ledger,
    transport: Arc<dyn SmsTransport>,
    locator: Arc<dyn LocationProvider>,
    reporter: Option<Arc<dyn StatusReporter>>,
    policy: DedupPolicy,
    call_timeout: Duration,
}

impl AlertProcessor {
    pub fn new(
        ledger: Ledger,
        transport: Arc<dyn SmsTransport>,
        locator: Arc<dyn LocationProvider>,
    ) -> Self {
        Self {
            ledger,
            transport,
            locator,
            reporter: None,
            policy: DedupPolicy::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_policy(mut self, policy: DedupPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Errors only when the ledger cannot be read; transport failures are
    /// counted in the summary instead.
    pub async fn process(&self, alert: &CriticalAlert) -> Result<ProcessOutcome, LedgerError> {
        let (user_id, alert_id) = (alert.user_id, alert.alert_id);
        info!(user_id, alert_id, name = %alert.name, "processing critical user");
        debug!(
            user_id,
            alert_id,
            email = %alert.email,
            created_at = %alert.created_at,
            server_message = %alert.alert_message,
            "alert details"
        );

        let Some(pending) = self.pending_contacts(alert).await? else {
            info!(user_id, alert_id, "SMS already sent for alert");
            return Ok(ProcessOutcome::AlreadyHandled);
        };

        let location = match timeout(self.call_timeout, self.locator.current_location()).await {
            Ok(Some(loc)) if !loc.trim().is_empty() => loc,
            Ok(_) => LOCATION_UNAVAILABLE.to_string(),
            Err(_) => {
                warn!(user_id, alert_id, "location lookup timed out");
                LOCATION_UNAVAILABLE.to_string()
            }
        };
        let message = format_emergency_message(alert, &location);

        let mut summary = DispatchSummary::default();
        for (slot, phone) in pending {
            summary.attempted += 1;

            let send = self.transport.send(phone, &message);
            let delivery = match timeout(self.call_timeout, send).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Delivery(format!(
                    "send timed out after {}ms",
                    self.call_timeout.as_millis()
                ))),
            };
            if let Err(e) = delivery {
                summary.failed += 1;
                error!(user_id, alert_id, slot, phone, error = %e, "failed to send SMS to contact");
                self.report(alert, phone, false);
                continue;
            }

            // Record before touching the next contact so a crash mid fan-out
            // leaves exactly the delivered contacts in the ledger.
            match self.ledger.record(user_id, alert_id, phone, &message).await {
                Ok(_) => {
                    summary.sent += 1;
                    let contact = alert.contacts[slot - 1].name.as_deref().unwrap_or("-");
                    info!(user_id, alert_id, slot, phone, contact, "sent alert to contact");
                }
                Err(e) => {
                    summary.sent += 1;
                    summary.ledger_failures += 1;
                    error!(
                        user_id,
                        alert_id,
                        slot,
                        phone,
                        error = %e,
                        ledger_health = "write_failed",
                        "SMS sent but not recorded; it may be sent again"
                    );
                }
            }
            self.report(alert, phone, true);
        }

        if summary.attempted == 0 {
            warn!(user_id, alert_id, "critical user has no emergency phone numbers");
        }
        info!(
            user_id,
            alert_id,
            sent = summary.sent,
            failed = summary.failed,
            "alert dispatched to registered contacts"
        );
        Ok(ProcessOutcome::Dispatched(summary))
    }

    /// Contacts still owed a message, or `None` if the alert counts as handled.
    async fn pending_contacts<'a>(
        &self,
        alert: &'a CriticalAlert,
    ) -> Result<Option<Vec<(usize, &'a str)>>, LedgerError> {
        match self.policy {
            DedupPolicy::PerAlert => {
                if self.ledger.exists(alert.user_id, alert.alert_id).await? {
                    return Ok(None);
                }
                Ok(Some(alert.contact_phones().collect()))
            }
            DedupPolicy::PerContact => {
                let mut pending = Vec::new();
                let mut handled = 0;
                for (slot, phone) in alert.contact_phones() {
                    if self
                        .ledger
                        .exists_for_contact(alert.user_id, alert.alert_id, phone)
                        .await?
                    {
                        handled += 1;
                    } else {
                        pending.push((slot, phone));
                    }
                }
                if pending.is_empty() && handled > 0 {
                    return Ok(None);
                }
                Ok(Some(pending))
            }
        }
    }

    fn report(&self, alert: &CriticalAlert, phone: &str, success: bool) {
        let Some(reporter) = self.reporter.clone() else {
            return;
        };
        let (user_id, alert_id) = (alert.user_id, alert.alert_id);
        let phone = phone.to_string();
        tokio::spawn(async move {
            reporter
                .report_status(user_id, alert_id, &phone, success)
                .await;
        });
    }
}
