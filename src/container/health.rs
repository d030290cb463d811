//! Health aggregation.

use futures::future::join_all;
use futures::FutureExt;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, info};

use super::init::panic_message;
use super::ServiceContainer;
use crate::factory::ErasedHealthCheck;
use crate::health::{ContainerHealth, HealthInfo, HealthReport, ServiceHealth};
use crate::status::ServiceStatus;
use crate::traits::ServiceInstance;

impl ServiceContainer {
    /// Aggregates the state of every registered service.
    ///
    /// Health checks of live services run concurrently, each bounded by the
    /// configured health-check timeout. A check that errors, panics or times
    /// out is reported as unhealthy. A live service whose check is not fully
    /// healthy moves to `Degraded`; a healthy one moves back to `Ready`.
    pub async fn get_service_health(&self) -> HealthReport {
        let checks: Vec<(String, ErasedHealthCheck, ServiceInstance)> = {
            let registry = self.inner.registry.read();
            registry
                .order
                .iter()
                .filter_map(|name| {
                    let entry = registry.entries.get(name)?;
                    if !entry.state.status.is_live() || entry.state.stopping {
                        return None;
                    }
                    let check = entry.definition.health_check.clone()?;
                    let instance = entry.state.instance.clone()?;
                    Some((name.clone(), check, instance))
                })
                .collect()
        };

        let limit = self.inner.config.health_check_timeout;
        let results: HashMap<String, HealthInfo> = join_all(
            checks
                .into_iter()
                .map(|(name, check, instance)| async move {
                    let info = run_check(check, instance, limit).await;
                    (name, info)
                }),
        )
        .await
        .into_iter()
        .collect();

        for (name, info) in &results {
            self.apply_health(name, info);
        }
        self.build_report()
    }

    fn apply_health(&self, name: &str, info: &HealthInfo) {
        let target = if info.healthy && !info.degraded {
            ServiceStatus::Ready
        } else {
            ServiceStatus::Degraded
        };
        let change = self
            .with_entry(name, |entry| {
                entry.state.last_health = Some(info.clone());
                let current = entry.state.status;
                if current.is_live() && !entry.state.stopping && current != target {
                    entry.set_status(target);
                    Some(current)
                } else {
                    None
                }
            })
            .flatten();

        if let Some(from) = change {
            info!(service = %name, %from, to = %target, error = ?info.error, "service health changed");
            self.observers().health_changed(name, from, target);
        }
    }

    fn build_report(&self) -> HealthReport {
        let registry = self.inner.registry.read();
        let mut container = ContainerHealth {
            initialized: self.is_initialized(),
            total_services: registry.len(),
            ..ContainerHealth::default()
        };
        let mut services = BTreeMap::new();

        for name in &registry.order {
            let Some(entry) = registry.entries.get(name) else {
                continue;
            };
            let state = &entry.state;
            match state.status {
                ServiceStatus::Ready => container.ready_services += 1,
                ServiceStatus::Degraded => container.degraded_services += 1,
                ServiceStatus::Failed => container.failed_services += 1,
                ServiceStatus::Stopped => container.stopped_services += 1,
                ServiceStatus::Pending | ServiceStatus::Initializing => {
                    container.pending_services += 1
                }
            }
            if state.status == ServiceStatus::Failed && state.optional {
                container.optional_failures += 1;
            }
            if !state.optional && !state.status.is_live() {
                container.critical_failures += 1;
            }

            services.insert(
                name.clone(),
                ServiceHealth {
                    status: state.status,
                    optional: state.optional,
                    error: state.error.clone(),
                    dependencies: state.dependencies.clone(),
                    start_time: state.start_time,
                    initialized_at: state.initialized_at,
                    failed_at: state.failed_at,
                    stopped_at: state.stopped_at,
                    attempts: state.attempts,
                    health: state.last_health.clone(),
                },
            );
        }

        debug!(
            ready = container.ready_services,
            failed = container.failed_services,
            degraded = container.degraded_services,
            "health report built"
        );
        HealthReport { container, services }
    }
}

async fn run_check(check: ErasedHealthCheck, instance: ServiceInstance, limit: Duration) -> HealthInfo {
    let guarded = AssertUnwindSafe(async move { check(instance).await }).catch_unwind();
    match tokio::time::timeout(limit, guarded).await {
        Ok(Ok(Ok(info))) => info,
        Ok(Ok(Err(e))) => HealthInfo::unhealthy(e.to_string()),
        Ok(Err(panic)) => HealthInfo::unhealthy(format!("health check panicked: {}", panic_message(&*panic))),
        Err(_) => HealthInfo::unhealthy(format!("health check timed out after {}ms", limit.as_millis())),
    }
}
