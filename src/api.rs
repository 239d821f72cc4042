use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::models::alert::{CriticalAlert, CriticalUsersResponse};
use crate::models::status::{DeliveryStatus, SmsStatusReport};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Where candidate alerts come from each cycle.
#[async_trait]
pub trait AlertSource: Send + Sync {
    /// Current critical alerts; empty on any failure.
    async fn fetch_critical_alerts(&self) -> Vec<CriticalAlert>;
}

/// Delivery telemetry back to the server. Outcome is never observed.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report_status(&self, user_id: i64, alert_id: i64, phone_number: &str, success: bool);
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn try_fetch(&self) -> Result<Vec<CriticalAlert>, FetchError> {
        let url = format!("{}/api/critical-users", self.base_url);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        let parsed: CriticalUsersResponse = serde_json::from_slice(&body)?;
        debug!(
            users = parsed.users.len(),
            server_count = ?parsed.count,
            server_time = ?parsed.timestamp,
            "critical users response parsed"
        );
        Ok(parsed.into_alerts())
    }

    /// `GET /health`; any 2xx counts as up.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(base_url = %self.base_url, "server connection test successful");
                true
            }
            Ok(resp) => {
                error!(status = resp.status().as_u16(), "server connection test failed");
                false
            }
            Err(e) => {
                error!(error = %e, "server connection test failed");
                false
            }
        }
    }

    async fn try_report(&self, report: &SmsStatusReport) -> Result<(), FetchError> {
        let url = format!("{}/api/sms-status", self.base_url);
        let response = self.client.post(&url).json(report).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl AlertSource for ApiClient {
    async fn fetch_critical_alerts(&self) -> Vec<CriticalAlert> {
        match self.try_fetch().await {
            Ok(alerts) => alerts,
            Err(e) => {
                // Network trouble is never fatal; next cycle retries.
                warn!(error = %e, "failed to fetch critical users");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl StatusReporter for ApiClient {
    async fn report_status(&self, user_id: i64, alert_id: i64, phone_number: &str, success: bool) {
        let report = SmsStatusReport {
            user_id,
            alert_id,
            phone_number: phone_number.to_string(),
            status: if success {
                DeliveryStatus::Sent
            } else {
                DeliveryStatus::Failed
            },
            timestamp: Utc::now().timestamp_millis(),
        };

        match self.try_report(&report).await {
            Ok(()) => debug!(user_id, alert_id, "SMS status reported"),
            Err(e) => warn!(user_id, alert_id, error = %e, "failed to report SMS status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(&server.uri(), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_critical_users() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/critical-users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "users": [
                    {"user_id": 7, "alert_id": 42, "name": "Jane", "email": "j@x.io",
                     "emergency_phone": "+15551234567", "heart_rate": 130},
                    {"user_id": 8, "alert_id": 43, "name": "Bob", "email": "b@x.io"}
                ],
                "count": 2,
                "timestamp": "2025-11-29T06:15:16.000Z"
            })))
            .mount(&server)
            .await;

        let alerts = client_for(&server).fetch_critical_alerts().await;
        assert_eq!(alerts.len(), 2);
        assert_eq!((alerts[0].user_id, alerts[0].alert_id), (7, 42));
        assert_eq!(alerts[0].heart_rate, Some(130));
        assert_eq!(alerts[1].user_id, 8);
    }

    #[tokio::test]
    async fn test_fetch_keeps_good_users_beside_bad_ones() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/critical-users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "users": [
                    {"user_id": 7, "alert_id": 42, "emergency_phone": "+15551234567"},
                    {"user_id": 8, "alert_id": 43, "heart_rate": "N/A"},
                    {"user_id": null, "alert_id": 44}
                ],
                "count": 3
            })))
            .mount(&server)
            .await;

        let alerts = client_for(&server).fetch_critical_alerts().await;
        let keys: Vec<_> = alerts.iter().map(|a| (a.user_id, a.alert_id)).collect();
        assert_eq!(keys, vec![(7, 42), (8, 43)]);
        assert_eq!(alerts[1].heart_rate, None);
    }

    #[tokio::test]
    async fn test_fetch_server_error_yields_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/critical-users"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.fetch_critical_alerts().await.is_empty());
        assert!(matches!(client.try_fetch().await, Err(FetchError::Status(500))));
    }

    #[tokio::test]
    async fn test_fetch_malformed_body_yields_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/critical-users"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.fetch_critical_alerts().await.is_empty());
        assert!(matches!(client.try_fetch().await, Err(FetchError::Decode(_))));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_server_yields_empty() {
        let client = ApiClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        assert!(client.fetch_critical_alerts().await.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/critical-users"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"users": []}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri(), Duration::from_millis(200)).unwrap();
        assert!(matches!(client.try_fetch().await, Err(FetchError::Http(_))));
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        assert!(client_for(&server).health_check().await);

        let down = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&down)
            .await;
        assert!(!client_for(&down).health_check().await);
    }

    #[tokio::test]
    async fn test_report_status_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sms-status"))
            .and(body_partial_json(serde_json::json!({
                "user_id": 7,
                "alert_id": 42,
                "phone_number": "+15551234567",
                "status": "sent"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .report_status(7, 42, "+15551234567", true)
            .await;
    }

    #[tokio::test]
    async fn test_report_status_failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sms-status"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .report_status(7, 42, "+15551234567", false)
            .await;
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ApiClient::new("http://10.0.0.2:5000/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://10.0.0.2:5000");
    }
}
