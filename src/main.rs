mod activity;
mod api;
mod config;
mod db;
mod location;
mod models;
mod monitor;
mod processor;
mod transport;

use std::sync::Arc;

use activity::ActivityLog;
use api::ApiClient;
use config::AppConfig;
use db::Ledger;
use location::{FallbackLocator, FixedPosition};
use monitor::{Monitor, MonitorSettings};
use processor::AlertProcessor;
use transport::{send_test_message, LogTransport, SmsTransport};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting WristBud SMS critical monitor...");

    // Init ledger
    let pool = db::init_pool(&config.ledger_path).await?;
    let ledger = Ledger::new(pool);
    info!(path = %config.ledger_path, records = ledger.count().await?, "Opened dispatch ledger");
    if let Some(last) = ledger.recent(1).await?.first() {
        info!(
            user_id = last.user_id,
            alert_id = last.alert_id,
            sent_at = ?last.sent_at_utc(),
            "Last recorded dispatch"
        );
    }

    let api = Arc::new(ApiClient::new(&config.api_base_url, config.http_timeout())?);
    info!(base_url = %api.base_url(), "Using alert server");
    if config.health_check_on_start && !api.health_check().await {
        warn!("Alert server is not reachable yet; monitoring will keep retrying");
    }

    let transport: Arc<dyn SmsTransport> = Arc::new(LogTransport);
    if let Some(phone) = &config.test_sms_phone {
        if send_test_message(transport.as_ref(), phone).await.is_err() {
            error!("Test send failed");
        }
    }

    let mut locator = FallbackLocator::new();
    if let (Some(lat), Some(lon)) = (config.location_lat, config.location_lon) {
        let fixed = Arc::new(FixedPosition::new(lat, lon, config.location_label.clone()));
        locator = locator.with_source(fixed.clone()).with_geocoder(fixed);
    }

    let processor = AlertProcessor::new(ledger.clone(), transport, Arc::new(locator))
        .with_reporter(api.clone())
        .with_policy(config.dedup_policy)
        .with_call_timeout(config.http_timeout());

    let settings = MonitorSettings {
        interval: config.check_interval(),
        retention: config.ledger_retention,
        trim_every_cycles: config.trim_every_cycles,
    };
    let monitor = Monitor::new(api, processor, ledger, settings, ActivityLog::default());

    if !monitor.start() {
        anyhow::bail!("service failed to start");
    }
    match monitor.sent_today().await {
        Ok(count) => info!(sent_today = count, "Monitoring for critical health alerts"),
        Err(e) => error!(error = %e, "Failed to read today's SMS count"),
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    monitor.shutdown().await;

    match monitor.sent_today().await {
        Ok(count) => info!(sent_today = count, running = monitor.is_running(), "Monitor stopped"),
        Err(e) => error!(error = %e, "Failed to read today's SMS count"),
    }
    for entry in monitor.activity().recent(5) {
        info!(at = %entry.timestamp, "{}", entry.message);
    }
    Ok(())
}
