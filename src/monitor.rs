//! Background health monitoring with optional self-healing.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::container::ServiceContainer;
use crate::health::HealthReport;
use crate::status::ServiceStatus;

/// Shortest interval between passes; smaller values are raised to it.
pub const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(100);

/// Settings for [`HealthMonitor`].
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between two health passes, at least [`MIN_MONITOR_INTERVAL`].
    pub interval: Duration,
    /// Restart failed optional services on each pass.
    pub auto_restart: bool,
    /// Restarts attempted per service before giving up. Zero means no limit.
    pub max_restarts: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            auto_restart: false,
            max_restarts: 3,
        }
    }
}

/// Periodically aggregates container health.
///
/// Each pass runs `get_service_health`, logs status changes since the
/// previous pass and, with `auto_restart`, calls `restart_service` for every
/// failed optional service.
///
/// ```no_run
/// use ferrous_lifecycle::{HealthMonitor, MonitorConfig, ServiceContainer};
/// use std::time::Duration;
///
/// # async fn run(container: ServiceContainer) {
/// let monitor = HealthMonitor::start(container, MonitorConfig {
///     interval: Duration::from_secs(10),
///     auto_restart: true,
///     ..MonitorConfig::default()
/// });
///
/// // ... serve traffic ...
///
/// monitor.stop().await;
/// # }
/// ```
pub struct HealthMonitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    latest: Arc<Mutex<Option<HealthReport>>>,
}

impl HealthMonitor {
    /// Spawns the monitoring task on the current tokio runtime.
    pub fn start(container: ServiceContainer, mut config: MonitorConfig) -> Self {
        if config.interval < MIN_MONITOR_INTERVAL {
            warn!(
                interval_ms = config.interval.as_millis() as u64,
                min_ms = MIN_MONITOR_INTERVAL.as_millis() as u64,
                "monitor interval too short, using the minimum"
            );
            config.interval = MIN_MONITOR_INTERVAL;
        }
        let cancel = CancellationToken::new();
        let latest = Arc::new(Mutex::new(None));
        let handle = tokio::spawn(monitor_loop(container, config, cancel.clone(), latest.clone()));
        info!("health monitor started");
        Self {
            cancel,
            handle,
            latest,
        }
    }

    /// Report produced by the most recent pass.
    pub fn latest(&self) -> Option<HealthReport> {
        self.latest.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Token that stops the monitor when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops the monitor and waits for the current pass to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "health monitor task ended abnormally");
        }
        info!("health monitor stopped");
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("running", &self.is_running())
            .finish()
    }
}

async fn monitor_loop(
    container: ServiceContainer,
    config: MonitorConfig,
    cancel: CancellationToken,
    latest: Arc<Mutex<Option<HealthReport>>>,
) {
    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut previous: HashMap<String, ServiceStatus> = HashMap::new();
    let mut restarts: HashMap<String, u32> = HashMap::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let report = container.get_service_health().await;
        for (name, service) in &report.services {
            match previous.insert(name.clone(), service.status) {
                Some(before) if before != service.status => {
                    info!(service = %name, from = %before, to = %service.status, "service status changed");
                }
                _ => {}
            }
        }
        debug!(
            ready = report.container.ready_services,
            failed = report.container.failed_services,
            degraded = report.container.degraded_services,
            "health pass complete"
        );

        let failed: Vec<String> = report.failed_optional().into_iter().map(str::to_string).collect();
        *latest.lock() = Some(report);

        if !config.auto_restart {
            continue;
        }
        for name in failed {
            if cancel.is_cancelled() {
                break;
            }
            let count = restarts.entry(name.clone()).or_insert(0);
            if config.max_restarts > 0 && *count >= config.max_restarts {
                continue;
            }
            *count += 1;
            match container.restart_service(&name).await {
                Ok(ServiceStatus::Ready) => {
                    info!(service = %name, "optional service recovered");
                    restarts.remove(&name);
                }
                Ok(status) => debug!(service = %name, %status, "restart did not recover service"),
                Err(e) => warn!(service = %name, error = %e, "restart rejected"),
            }
        }
    }
}
