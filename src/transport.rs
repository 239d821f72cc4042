//! Outbound SMS seam.
//!
//! The real modem lives outside this service; anything that can deliver a text
//! to a phone number implements [`SmsTransport`]. Long bodies are segmented
//! here so every transport sees the same ordered parts.

use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Single-part SMS limit (GSM-7).
pub const MAX_SMS_LENGTH: usize = 160;

/// Payload per part of a concatenated SMS once the UDH is accounted for.
pub const MULTIPART_SEGMENT_LENGTH: usize = 153;

pub const TEST_MESSAGE: &str = "WRISTBUD TEST: Emergency monitoring system is active and working properly. This is a test message.";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid destination number: {0:?}")]
    InvalidDestination(String),
    #[error("refusing to send an empty message")]
    EmptyMessage,
    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait SmsTransport: Send + Sync {
    /// Delivers `body` to `destination` as one logical message.
    async fn send(&self, destination: &str, body: &str) -> Result<(), TransportError>;
}

/// Strips everything but digits and a single leading `+`.
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if trimmed.starts_with('+') {
        format!("+{digits}")
    } else {
        digits
    }
}

pub fn is_valid_phone(raw: &str) -> bool {
    normalize_phone(raw)
        .chars()
        .filter(|c| c.is_ascii_digit())
        .count()
        >= 10
}

/// Validates the pair and returns the normalised destination.
pub fn prepare(destination: &str, body: &str) -> Result<String, TransportError> {
    if !is_valid_phone(destination) {
        return Err(TransportError::InvalidDestination(destination.to_string()));
    }
    if body.trim().is_empty() {
        return Err(TransportError::EmptyMessage);
    }
    Ok(normalize_phone(destination))
}

/// Splits `body` into the ordered parts of a multi-part message.
///
/// Bodies that fit a single SMS come back as one part. Splits happen on char
/// boundaries only.
pub fn segment_message(body: &str) -> Vec<String> {
    if body.chars().count() <= MAX_SMS_LENGTH {
        return vec![body.to_string()];
    }

    let chars: Vec<char> = body.chars().collect();
    chars
        .chunks(MULTIPART_SEGMENT_LENGTH)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Transport for hosts without a modem: logs each part and reports success.
#[derive(Debug, Default, Clone)]
pub struct LogTransport;

#[async_trait]
impl SmsTransport for LogTransport {
    async fn send(&self, destination: &str, body: &str) -> Result<(), TransportError> {
        let destination = prepare(destination, body)?;
        let parts = segment_message(body);
        for (idx, part) in parts.iter().enumerate() {
            debug!(phone = %destination, part = idx + 1, total = parts.len(), "{}", part);
        }
        info!(phone = %destination, parts = parts.len(), "SMS handed to log transport");
        Ok(())
    }
}

pub async fn send_test_message(
    transport: &dyn SmsTransport,
    phone: &str,
) -> Result<(), TransportError> {
    match transport.send(phone, TEST_MESSAGE).await {
        Ok(()) => {
            info!(phone, "test SMS sent");
            Ok(())
        }
        Err(e) => {
            warn!(phone, error = %e, "test SMS failed");
            Err(e)
        }
    }
}
