//! Extruder poller - the single background ingestion task.
//!
//! Every tick: reload runtime config (throttled, fingerprint-compared),
//! check the enable gates, fetch new rows (cold start or incremental),
//! absorb them into the rolling window, advance the high-water mark, and
//! hand the window to the tick handler. Failures back off exponentially to
//! a 300 s ceiling; misconfiguration parks the poller in a
//! "configured but disabled" state without retry acceleration.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::defaults::{
    CONFIG_RELOAD_SECS, MAX_BACKOFF_SECS, POLLER_STOP_TIMEOUT_SECS, SETTING_HISTORIAN_CONNECTION,
};
use crate::config::HistorianConfig;
use crate::features::{self, WindowFeatures};
use crate::storage::Store;
use crate::types::HistorianRow;

use super::source::{FetchMode, HistorianSource, SqlHistorian};
use super::window::RollingWindow;

// ============================================================================
// Tick handler port
// ============================================================================

/// Everything downstream components need for one tick.
pub struct TickContext<'a> {
    pub machine_id: Uuid,
    pub sensor_id: Uuid,
    /// Rolling window in chronological order; never empty.
    pub window: &'a [HistorianRow],
    pub features: WindowFeatures,
}

/// Consumer of poll ticks. The pipeline implements this; the poller only
/// knows the port.
#[async_trait]
pub trait TickHandler: Send + Sync {
    async fn handle_tick(&self, ctx: TickContext<'_>) -> anyhow::Result<()>;
}

// ============================================================================
// Status view
// ============================================================================

/// Read-only poller status published via `ArcSwap` for the API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollerStatus {
    pub configured: bool,
    pub master_enabled: bool,
    pub effective_enabled: bool,
    pub running: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub window_size: usize,
    pub window_minutes: i64,
    pub poll_interval_seconds: u64,
    pub high_water_mark: Option<DateTime<Utc>>,
    pub machine_id: Option<Uuid>,
    pub sensor_id: Option<Uuid>,
}

// ============================================================================
// Poller
// ============================================================================

/// Owns the background ingestion task. `start` is idempotent; `stop` is
/// cooperative with a bounded wait.
pub struct ExtruderPoller {
    store: Store,
    handler: Arc<dyn TickHandler>,
    bootstrap: HistorianConfig,
    status: Arc<ArcSwap<PollerStatus>>,
    cancel: std::sync::Mutex<Option<CancellationToken>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ExtruderPoller {
    pub fn new(store: Store, handler: Arc<dyn TickHandler>, bootstrap: HistorianConfig) -> Self {
        let status = PollerStatus {
            configured: bootstrap.is_configured(),
            master_enabled: bootstrap.enabled,
            window_minutes: bootstrap.window_minutes,
            poll_interval_seconds: bootstrap.poll_interval_seconds,
            ..PollerStatus::default()
        };
        Self {
            store,
            handler,
            bootstrap,
            status: Arc::new(ArcSwap::from_pointee(status)),
            cancel: std::sync::Mutex::new(None),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> PollerStatus {
        self.status.load().as_ref().clone()
    }

    /// Begin the background task. Master-disabled pollers never start;
    /// calling start on a running poller is a no-op.
    pub async fn start(&self) {
        if !self.bootstrap.enabled {
            warn!("Extruder poller master-disabled (MSSQL_ENABLED=false); not starting");
            return;
        }

        let mut task_slot = self.task.lock().await;
        if task_slot.as_ref().is_some_and(|t| !t.is_finished()) {
            info!("Extruder poller already running");
            return;
        }

        let cancel = CancellationToken::new();
        if let Ok(mut slot) = self.cancel.lock() {
            *slot = Some(cancel.clone());
        }

        let mut worker = PollerWorker::new(
            self.store.clone(),
            Arc::clone(&self.handler),
            self.bootstrap.clone(),
            Arc::clone(&self.status),
        );

        *task_slot = Some(tokio::spawn(async move {
            worker.run(cancel).await;
        }));

        info!(
            host = %self.bootstrap.host,
            database = %self.bootstrap.database,
            table = %self.bootstrap.table,
            poll_interval = self.bootstrap.poll_interval_seconds,
            "Extruder poller started"
        );
    }

    /// Cooperative stop with a bounded wait.
    pub async fn stop(&self) {
        if let Ok(slot) = self.cancel.lock() {
            if let Some(cancel) = slot.as_ref() {
                cancel.cancel();
            }
        }
        let mut task_slot = self.task.lock().await;
        if let Some(task) = task_slot.take() {
            let wait = std::time::Duration::from_secs(POLLER_STOP_TIMEOUT_SECS);
            if tokio::time::timeout(wait, task).await.is_err() {
                warn!("Extruder poller did not stop within {}s", POLLER_STOP_TIMEOUT_SECS);
            }
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

/// How long to sleep before the next tick.
enum NextPoll {
    Interval,
    DisabledProbe,
    MissingConfigProbe,
    BackoffProbe,
}

struct PollerWorker {
    store: Store,
    handler: Arc<dyn TickHandler>,
    bootstrap: HistorianConfig,
    current: HistorianConfig,
    status: Arc<ArcSwap<PollerStatus>>,

    window: RollingWindow,
    high_water: Option<DateTime<Utc>>,
    source: Option<SqlHistorian>,

    fingerprint: Option<String>,
    config_loaded_at: Option<DateTime<Utc>>,
    effective_enabled: bool,

    machine_id: Option<Uuid>,
    sensor_id: Option<Uuid>,

    consecutive_failures: u32,
    next_retry_at: Option<DateTime<Utc>>,
    last_attempt_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    last_error_at: Option<DateTime<Utc>>,
    last_error: Option<String>,

    last_disabled_log: Option<DateTime<Utc>>,
    last_missing_config_log: Option<DateTime<Utc>>,
}

impl PollerWorker {
    fn new(
        store: Store,
        handler: Arc<dyn TickHandler>,
        bootstrap: HistorianConfig,
        status: Arc<ArcSwap<PollerStatus>>,
    ) -> Self {
        let window = RollingWindow::new(bootstrap.window_minutes);
        Self {
            store,
            handler,
            current: bootstrap.clone(),
            bootstrap,
            status,
            window,
            high_water: None,
            source: None,
            fingerprint: None,
            config_loaded_at: None,
            effective_enabled: false,
            machine_id: None,
            sensor_id: None,
            consecutive_failures: 0,
            next_retry_at: None,
            last_attempt_at: None,
            last_success_at: None,
            last_error_at: None,
            last_error: None,
            last_disabled_log: None,
            last_missing_config_log: None,
        }
    }

    async fn run(&mut self, cancel: CancellationToken) {
        info!("Extruder poller loop entered");
        self.publish_status(true);

        loop {
            let next = self.tick().await;
            self.publish_status(true);

            let sleep = match next {
                NextPoll::Interval => {
                    std::time::Duration::from_secs(self.current.poll_interval_seconds.max(1))
                }
                NextPoll::DisabledProbe => std::time::Duration::from_secs(2),
                NextPoll::MissingConfigProbe => std::time::Duration::from_secs(5),
                NextPoll::BackoffProbe => std::time::Duration::from_secs(1),
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Extruder poller shutdown signal received");
                    break;
                }
                _ = tokio::time::sleep(sleep) => {}
            }
        }

        self.publish_status(false);
        info!("Extruder poller stopped");
    }

    async fn tick(&mut self) -> NextPoll {
        let now = Utc::now();

        self.reload_runtime_config(now).await;

        if !self.effective_enabled {
            if log_throttle_elapsed(self.last_disabled_log, now) {
                self.last_disabled_log = Some(now);
                warn!(
                    "Extruder poller disabled via settings (connections.mssql.enabled=false); \
                     enable it in Settings to start data collection"
                );
            }
            return NextPoll::DisabledProbe;
        }

        if !self.current.is_configured() {
            if log_throttle_elapsed(self.last_missing_config_log, now) {
                self.last_missing_config_log = Some(now);
                error!(
                    host_set = !self.current.host.is_empty(),
                    username_set = !self.current.username.is_empty(),
                    password_set = !self.current.password.is_empty(),
                    "Extruder poller enabled but missing connection settings"
                );
            }
            return NextPoll::MissingConfigProbe;
        }

        if let Some(retry_at) = self.next_retry_at {
            if now < retry_at {
                return NextPoll::BackoffProbe;
            }
        }

        self.last_attempt_at = Some(now);
        match self.poll_once().await {
            Ok(appended) => {
                if appended > 0 {
                    debug!(appended, window = self.window.len(), "Extruder poller tick complete");
                } else {
                    debug!(window = self.window.len(), "Extruder poller: no new rows");
                }
                self.consecutive_failures = 0;
                self.next_retry_at = None;
                self.last_success_at = Some(Utc::now());
                self.last_error = None;
                self.last_error_at = None;
                NextPoll::Interval
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.last_error_at = Some(Utc::now());
                if Self::is_config_failure(&e) {
                    // Misconfiguration: no retry acceleration, keep cadence.
                    error!(error = %e, "Extruder poller misconfigured");
                } else {
                    self.consecutive_failures += 1;
                    let backoff = 2u64
                        .saturating_pow(self.consecutive_failures.min(8))
                        .min(MAX_BACKOFF_SECS);
                    self.next_retry_at = Some(Utc::now() + ChronoDuration::seconds(backoff as i64));
                    error!(
                        attempt = self.consecutive_failures,
                        backoff_s = backoff,
                        error = %e,
                        "Extruder poller error"
                    );
                }
                NextPoll::Interval
            }
        }
    }

    async fn poll_once(&mut self) -> anyhow::Result<usize> {
        self.ensure_machine_and_sensor().await?;

        if self.source.is_none() {
            self.source = Some(SqlHistorian::connect(&self.current).await?);
        }
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("historian source unavailable"))?;

        let mode = match self.high_water {
            None => FetchMode::ColdStart {
                window_minutes: self.current.window_minutes,
            },
            Some(high_water) => FetchMode::Incremental { high_water },
        };

        let rows = source.fetch_rows(mode, self.current.max_rows_per_poll).await?;
        if rows.is_empty() {
            return Ok(0);
        }

        info!(fetched = rows.len(), "Extruder poller fetched new rows");
        let appended = self.window.extend(rows);
        self.high_water = self.window.newest_timestamp();

        if appended > 0 {
            let window_rows = self.window.rows();
            let features = features::compute(&window_rows);
            let (machine_id, sensor_id) = match (self.machine_id, self.sensor_id) {
                (Some(m), Some(s)) => (m, s),
                _ => anyhow::bail!("machine/sensor not ensured before tick"),
            };
            self.handler
                .handle_tick(TickContext {
                    machine_id,
                    sensor_id,
                    window: &window_rows,
                    features,
                })
                .await?;
        }
        Ok(appended)
    }

    /// Reload runtime configuration from the settings store, throttled to
    /// once per 30 s. A fingerprint change resets the window and the
    /// high-water mark; this is the single mutation point for live poller
    /// state.
    async fn reload_runtime_config(&mut self, now: DateTime<Utc>) {
        if let Some(loaded_at) = self.config_loaded_at {
            if (now - loaded_at).num_seconds() < CONFIG_RELOAD_SECS {
                return;
            }
        }
        self.config_loaded_at = Some(now);

        let blob = match self.store.get_setting_json(SETTING_HISTORIAN_CONNECTION).await {
            Ok(Some(value)) => value,
            Ok(None) => serde_json::json!({}),
            Err(e) => {
                debug!(error = %e, "Settings store unavailable; keeping current poller config");
                return;
            }
        };

        let merged = self.bootstrap.merged_with(&blob);
        self.effective_enabled = merged.enabled;

        let fingerprint = merged.fingerprint();
        if self.fingerprint.as_deref() != Some(fingerprint.as_str()) {
            self.window.reset(merged.window_minutes);
            self.high_water = None;
            self.source = None;
            self.fingerprint = Some(fingerprint);
            self.current = merged;
            info!("Extruder poller config reloaded from settings store");
        }
    }

    async fn ensure_machine_and_sensor(&mut self) -> anyhow::Result<()> {
        if self.machine_id.is_some() && self.sensor_id.is_some() {
            return Ok(());
        }
        let (machine_id, sensor_id) = self
            .store
            .ensure_extruder_machine(&self.current)
            .await?;
        info!(%machine_id, %sensor_id, "Extruder machine and sensor ensured");
        self.machine_id = Some(machine_id);
        self.sensor_id = Some(sensor_id);
        Ok(())
    }

    fn is_config_failure(e: &anyhow::Error) -> bool {
        e.downcast_ref::<super::HistorianError>()
            .is_some_and(super::HistorianError::is_config_error)
    }

    fn publish_status(&self, running: bool) {
        self.status.store(Arc::new(PollerStatus {
            configured: self.current.is_configured(),
            master_enabled: self.bootstrap.enabled,
            effective_enabled: self.effective_enabled,
            running,
            last_attempt_at: self.last_attempt_at,
            last_success_at: self.last_success_at,
            last_error_at: self.last_error_at,
            last_error: self.last_error.clone(),
            consecutive_failures: self.consecutive_failures,
            window_size: self.window.len(),
            window_minutes: self.window.window_minutes(),
            poll_interval_seconds: self.current.poll_interval_seconds,
            high_water_mark: self.high_water,
            machine_id: self.machine_id,
            sensor_id: self.sensor_id,
        }));
    }
}

/// One log line per minute for the disabled/missing-config conditions.
fn log_throttle_elapsed(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last {
        Some(t) => (now - t).num_seconds() > 60,
        None => true,
    }
}

