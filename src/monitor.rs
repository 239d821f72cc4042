//! Periodic poll of the server for critical users.
//!
//! A ticker task dispatches one cycle every `interval` (measured from dispatch,
//! not completion) to a single worker task. The worker runs cycles one at a
//! time and alerts within a cycle strictly in fetch order. At most one cycle
//! waits behind the one in flight; extra ticks are dropped. Cycles never
//! overlap, even across a stop/start that leaves the old worker finishing.

use chrono::{Local, NaiveTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::activity::ActivityLog;
use crate::api::AlertSource;
use crate::db::{Ledger, LedgerError};
use crate::processor::{AlertProcessor, ProcessOutcome};

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub retention: u32,
    /// Trim the ledger every N cycles; 0 disables.
    pub trim_every_cycles: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            retention: crate::db::ledger::DEFAULT_RETENTION,
            trim_every_cycles: 60,
        }
    }
}

struct RunHandle {
    cancel: CancellationToken,
    ticker: JoinHandle<()>,
    worker: JoinHandle<()>,
}

struct Inner {
    source: Arc<dyn AlertSource>,
    processor: AlertProcessor,
    ledger: Ledger,
    settings: MonitorSettings,
    activity: ActivityLog,
    cycles: AtomicU64,
    /// `Some` while running. Start and stop decide under this lock.
    run: Mutex<Option<RunHandle>>,
    /// Held for the whole of a cycle.
    in_flight: tokio::sync::Mutex<()>,
}

/// Owns the polling schedule. Cheap to clone; clones share one schedule.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

impl Monitor {
    pub fn new(
        source: Arc<dyn AlertSource>,
        processor: AlertProcessor,
        ledger: Ledger,
        settings: MonitorSettings,
        activity: ActivityLog,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                processor,
                ledger,
                settings,
                activity,
                cycles: AtomicU64::new(0),
                run: Mutex::new(None),
                in_flight: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Begins polling. Returns `false` if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut run = self.inner.run.lock();
        if run.is_some() {
            debug!("monitor already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel::<()>(1);

        let ticker = tokio::spawn(run_ticker(
            Arc::clone(&self.inner),
            tx,
            cancel.clone(),
        ));
        let worker = tokio::spawn(run_worker(Arc::clone(&self.inner), rx, cancel.clone()));

        *run = Some(RunHandle {
            cancel,
            ticker,
            worker,
        });
        drop(run);

        info!(
            interval_ms = self.inner.settings.interval.as_millis() as u64,
            "critical monitor started"
        );
        self.inner.activity.push("Monitoring started");
        true
    }

    /// Cancels future cycles. A cycle already in flight runs to completion.
    pub fn stop(&self) {
        let handle = self.take_run();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            info!("critical monitor stopped");
            self.inner.activity.push("Monitoring stopped");
        }
    }

    /// Like [`Monitor::stop`], then waits for the in-flight cycle to finish.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.take_run() {
            handle.cancel.cancel();
            if let Err(e) = handle.ticker.await {
                warn!(error = %e, "ticker task ended abnormally");
            }
            if let Err(e) = handle.worker.await {
                warn!(error = %e, "worker task ended abnormally");
            }
            info!("critical monitor shut down");
            self.inner.activity.push("Monitoring stopped");
        }
    }

    fn take_run(&self) -> Option<RunHandle> {
        self.inner.run.lock().take()
    }

    pub fn is_running(&self) -> bool {
        self.inner.run.lock().is_some()
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.inner.activity
    }

    /// Messages recorded since local midnight.
    pub async fn sent_today(&self) -> Result<i64, LedgerError> {
        let midnight = Local::now()
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_local_timezone(Local)
            .earliest()
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        self.inner.ledger.count_since(midnight).await
    }

    /// Runs one fetch-and-process cycle inline.
    pub async fn run_cycle(&self) {
        let cycle = self.inner.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.cycle(cycle).await;
    }
}

async fn run_ticker(inner: Arc<Inner>, tx: mpsc::Sender<()>, cancel: CancellationToken) {
    loop {
        match tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => debug!("previous cycle still pending, skipping tick"),
            Err(TrySendError::Closed(())) => break,
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(inner.settings.interval) => {}
        }
    }
    debug!("monitor ticker exited");
}

async fn run_worker(inner: Arc<Inner>, mut rx: mpsc::Receiver<()>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => if next.is_none() { break },
        }
        let cycle = inner.cycles.fetch_add(1, Ordering::SeqCst) + 1;

        // A panic inside a cycle must not take the schedule down with it.
        let task_inner = Arc::clone(&inner);
        let handle = tokio::spawn(async move { task_inner.cycle(cycle).await });
        if let Err(e) = handle.await {
            if e.is_panic() {
                error!(cycle, "monitor cycle panicked - recovering");
                inner.activity.push("Error checking critical users: cycle panicked");
            } else {
                warn!(cycle, "monitor cycle was cancelled");
            }
        }
    }
    debug!("monitor worker exited");
}

impl Inner {
    async fn cycle(&self, cycle: u64) {
        // A worker from before a stop/start may still be mid-cycle.
        let _in_flight = self.in_flight.lock().await;
        debug!(cycle, "checking for critical users");
        let alerts = self.source.fetch_critical_alerts().await;

        if alerts.is_empty() {
            debug!(cycle, "no critical users found");
            self.activity.push("No critical users found");
        } else {
            let ids = alerts
                .iter()
                .map(|a| a.user_id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            warn!(cycle, count = alerts.len(), user_ids = %ids, "critical data found");
            self.activity.push(format!(
                "Critical data found: {} - time checked: {}",
                alerts.len(),
                Local::now().format("%Y-%m-%d %H:%M:%S")
            ));
            self.activity.push(format!("Critical Users: [{ids}]"));

            for alert in &alerts {
                let (user_id, alert_id) = (alert.user_id, alert.alert_id);
                match self.processor.process(alert).await {
                    Ok(ProcessOutcome::AlreadyHandled) => {
                        self.activity.push(format!(
                            "SMS already sent for user {user_id} alert {alert_id}"
                        ));
                    }
                    Ok(ProcessOutcome::Dispatched(summary)) => {
                        self.activity.push(format!(
                            "Alert for user {user_id} ({}) sent to {} of {} contacts",
                            alert.name, summary.sent, summary.attempted
                        ));
                        if summary.ledger_failures > 0 {
                            self.activity.push(format!(
                                "LEDGER WRITE FAILED for user {user_id} alert {alert_id}: \
                                 {} send(s) unrecorded",
                                summary.ledger_failures
                            ));
                        }
                    }
                    Err(e) => {
                        error!(user_id, alert_id, error = %e, "error processing critical user");
                        self.activity.push(format!(
                            "Error processing user {user_id} alert {alert_id}: {e}"
                        ));
                    }
                }
            }
        }

        let every = self.settings.trim_every_cycles;
        if every > 0 && cycle % every == 0 {
            if let Err(e) = self.ledger.trim(self.settings.retention).await {
                error!(error = %e, ledger_health = "trim_failed", "failed to trim dispatch ledger");
            }
        }
    }
}
