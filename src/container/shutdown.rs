//! Graceful and emergency teardown.

use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use super::init::panic_message;
use super::ServiceContainer;
use crate::definition::ServiceDefinition;
use crate::error::{LifecycleError, LifecycleResult};
use crate::traits::ServiceInstance;

/// What a shutdown pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownSummary {
    /// Services torn down, in the order they finished.
    pub stopped: Vec<String>,
    /// Per-service hook failures. Those services are still stopped.
    pub errors: BTreeMap<String, String>,
    /// The overall deadline passed before every service was stopped.
    pub timed_out: bool,
    /// Another shutdown had already started; nothing was done.
    pub skipped: bool,
    pub duration: Duration,
}

impl ShutdownSummary {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.timed_out
    }
}

impl ServiceContainer {
    /// Stops every live service in reverse initialization order.
    ///
    /// Each service's shutdown handler runs first, then the instance's own
    /// `shutdown` hook. Errors are logged and recorded, and the walk
    /// continues. The whole pass is bounded by the configured shutdown
    /// timeout; on expiry the remaining services are left as they are.
    ///
    /// Only the first call does anything; later calls return a skipped
    /// summary.
    pub async fn shutdown(&self) -> ShutdownSummary {
        if self.inner.shutdown_started.swap(true, Ordering::SeqCst) {
            debug!("shutdown already started");
            return ShutdownSummary::skipped();
        }
        self.inner.shutdown_signal.lock().cancel();

        let started = Instant::now();
        let order = self.shutdown_order();
        info!(services = order.len(), "shutting down services");

        let mut summary = ShutdownSummary::default();
        let limit = self.inner.config.shutdown_timeout;
        if timeout(limit, self.stop_sequential(&order, &mut summary))
            .await
            .is_err()
        {
            warn!(timeout_ms = limit.as_millis() as u64, "graceful shutdown timed out");
            summary.timed_out = true;
        }

        self.inner.initialized.store(false, Ordering::SeqCst);
        summary.duration = started.elapsed();
        info!(
            stopped = summary.stopped.len(),
            errors = summary.errors.len(),
            duration_ms = summary.duration.as_millis() as u64,
            "shutdown complete"
        );
        summary
    }

    /// Stops every live service concurrently, each bounded by the emergency
    /// per-service timeout.
    ///
    /// Individual failures are recorded and ignored. A service whose hooks
    /// hang is marked stopped with an error when its budget runs out.
    ///
    /// # Errors
    ///
    /// `Unrecoverable` if the overall emergency deadline passes. The caller
    /// is expected to exit the process.
    pub async fn emergency_shutdown(&self) -> LifecycleResult<ShutdownSummary> {
        if self.inner.emergency_started.swap(true, Ordering::SeqCst) {
            debug!("emergency shutdown already started");
            return Ok(ShutdownSummary::skipped());
        }
        self.inner.shutdown_started.store(true, Ordering::SeqCst);
        self.inner.shutdown_signal.lock().cancel();

        let started = Instant::now();
        let live: Vec<String> = {
            let registry = self.inner.registry.read();
            registry
                .order
                .iter()
                .filter(|name| {
                    registry
                        .entries
                        .get(*name)
                        .map(|e| e.state.status.is_live() && !e.state.stopping)
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };
        warn!(services = live.len(), "emergency shutdown");

        let per_service = self.inner.config.emergency_service_timeout;
        let mut tasks = JoinSet::new();
        for name in live {
            let container = self.clone();
            tasks.spawn(async move {
                let outcome = timeout(per_service, container.stop_service(&name)).await;
                (name, outcome)
            });
        }

        let mut summary = ShutdownSummary::default();
        let collect = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((name, Ok(Some(Ok(()))))) => summary.stopped.push(name),
                    Ok((name, Ok(Some(Err(e))))) => {
                        summary.stopped.push(name.clone());
                        summary.errors.insert(name, e);
                    }
                    Ok((_, Ok(None))) => {}
                    Ok((name, Err(_))) => {
                        let message = format!("shutdown timed out after {}ms", per_service.as_millis());
                        self.force_stopped(&name, &message);
                        summary.stopped.push(name.clone());
                        summary.errors.insert(name, message);
                    }
                    Err(join_error) => warn!(error = %join_error, "emergency stop task failed"),
                }
            }
        };
        let limit = self.inner.config.emergency_timeout;
        let finished = timeout(limit, collect).await.is_ok();

        self.inner.initialized.store(false, Ordering::SeqCst);
        summary.duration = started.elapsed();

        if !finished {
            tasks.abort_all();
            summary.timed_out = true;
            error!(timeout_ms = limit.as_millis() as u64, "emergency shutdown exceeded its deadline");
            return Err(LifecycleError::Unrecoverable(format!(
                "emergency shutdown exceeded {}ms",
                limit.as_millis()
            )));
        }

        info!(
            stopped = summary.stopped.len(),
            errors = summary.errors.len(),
            "emergency shutdown complete"
        );
        Ok(summary)
    }

    /// Reverse of the resolved order, or of registration order when
    /// initialization never resolved one.
    fn shutdown_order(&self) -> Vec<String> {
        let mut order = self
            .inner
            .resolved_order
            .read()
            .clone()
            .unwrap_or_else(|| self.inner.registry.read().order.clone());
        order.reverse();
        order
    }

    pub(crate) async fn stop_sequential(&self, names: &[String], summary: &mut ShutdownSummary) {
        for name in names {
            match self.stop_service(name).await {
                Some(Ok(())) => summary.stopped.push(name.clone()),
                Some(Err(e)) => {
                    summary.stopped.push(name.clone());
                    summary.errors.insert(name.clone(), e);
                }
                None => {}
            }
        }
    }

    /// Runs the teardown hooks of one live service exactly once.
    ///
    /// Returns `None` when the service is not live or another path already
    /// claimed it.
    async fn stop_service(&self, name: &str) -> Option<Result<(), String>> {
        let (definition, instance) = self.with_entry(name, |entry| entry.claim_for_stop()).flatten()?;
        debug!(service = %name, "stopping service");
        let error = self.run_teardown(&definition, instance).await;
        self.with_entry(name, |entry| entry.mark_stopped(error.clone()));
        self.observers().service_stopped(name, error.as_deref());
        Some(error.map_or(Ok(()), Err))
    }

    /// Tears down an instance that finished initializing after shutdown
    /// began. It is never published; the service ends `Stopped`.
    pub(crate) async fn discard_late_instance(&self, definition: &ServiceDefinition, instance: ServiceInstance) {
        let name = definition.name.as_str();
        warn!(service = %name, "service finished initializing during shutdown, stopping it");
        let error = self.run_teardown(definition, instance).await;
        self.with_entry(name, |entry| entry.mark_stopped(error.clone()));
        self.observers().service_stopped(name, error.as_deref());
    }

    /// Shutdown handler, then the instance hook. Returns the joined errors.
    async fn run_teardown(&self, definition: &ServiceDefinition, instance: ServiceInstance) -> Option<String> {
        let name = definition.name.as_str();
        let mut errors = Vec::new();
        if let Some(handler) = &definition.shutdown_handler {
            match AssertUnwindSafe(handler(instance.clone())).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(format!("shutdown handler failed: {}", e)),
                Err(panic) => errors.push(format!("shutdown handler panicked: {}", panic_message(&*panic))),
            }
        }
        match AssertUnwindSafe(instance.shutdown()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => errors.push(format!("shutdown failed: {}", e)),
            Err(panic) => errors.push(format!("shutdown panicked: {}", panic_message(&*panic))),
        }

        if errors.is_empty() {
            info!(service = %name, "service stopped");
            None
        } else {
            let joined = errors.join("; ");
            warn!(service = %name, error = %joined, "service stopped with errors");
            Some(joined)
        }
    }

    fn force_stopped(&self, name: &str, message: &str) {
        let marked = self
            .with_entry(name, |entry| {
                if entry.state.status.is_live() {
                    entry.mark_stopped(Some(message.to_string()));
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if marked {
            warn!(service = %name, error = %message, "service forced to stopped");
            self.observers().service_stopped(name, Some(message));
        }
    }
}
