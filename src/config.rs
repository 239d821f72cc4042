use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::processor::DedupPolicy;

pub const DEFAULT_API_BASE_URL: &str = "http://192.168.1.100:5000";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub api_base_url: String,
    pub check_interval_ms: u64,
    pub http_timeout_secs: u64,
    pub ledger_path: String,
    pub ledger_retention: u32,
    pub trim_every_cycles: u64,
    pub dedup_policy: DedupPolicy,
    pub location_lat: Option<f64>,
    pub location_lon: Option<f64>,
    pub location_label: Option<String>,
    pub health_check_on_start: bool,
    pub test_sms_phone: Option<String>,
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        // Read once at startup; a new base URL needs a restart of the monitor.
        let api_base_url = env::var("API_BASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let check_interval_ms = env::var("CHECK_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .unwrap_or(1000);
        let http_timeout_secs = env::var("HTTP_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let ledger_path = env::var("LEDGER_PATH").unwrap_or_else(|_| "wristbud_sms.db".to_string());
        let ledger_retention = env::var("LEDGER_RETENTION")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .unwrap_or(1000);
        let trim_every_cycles = env::var("TRIM_EVERY_CYCLES")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60);
        let dedup_policy = env::var("DEDUP_GRANULARITY")
            .map(|v| DedupPolicy::parse(&v))
            .unwrap_or_default();

        let location_lat = env::var("LOCATION_LAT").ok().and_then(|v| v.parse().ok());
        let location_lon = env::var("LOCATION_LON").ok().and_then(|v| v.parse().ok());
        let location_label = env::var("LOCATION_LABEL").ok().filter(|v| !v.is_empty());

        let health_check_on_start = env::var("HEALTH_CHECK_ON_START")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);
        let test_sms_phone = env::var("TEST_SMS_PHONE").ok().filter(|v| !v.trim().is_empty());

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            api_base_url,
            check_interval_ms,
            http_timeout_secs,
            ledger_path,
            ledger_retention,
            trim_every_cycles,
            dedup_policy,
            location_lat,
            location_lon,
            location_label,
            health_check_on_start,
            test_sms_phone,
            log_level,
        })
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }
}
