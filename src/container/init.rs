//! Initialization engine: dependency waits, retries, timeouts and rollback.

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ServiceContainer;
use crate::context::{Dependencies, ServiceContext};
use crate::definition::ServiceDefinition;
use crate::error::{LifecycleError, LifecycleResult};
use crate::status::ServiceStatus;
use crate::traits::ServiceInstance;

/// Outcome of a successful `initialize` call.
#[derive(Debug, Clone, Serialize)]
pub struct InitSummary {
    pub success: bool,
    pub duration: Duration,
    pub services_ready: usize,
    pub services_failed: usize,
    /// Resolved initialization order.
    pub order: Vec<String>,
}

impl ServiceContainer {
    /// Initializes every registered service.
    ///
    /// Services start concurrently, each one as soon as all of its
    /// dependencies have reached a terminal state. Registration is closed as
    /// soon as this is first called.
    ///
    /// Concurrent and repeated calls share one run: every factory executes
    /// at most once and every caller sees the same outcome. Call
    /// [`reset`](Self::reset) to start over.
    ///
    /// # Errors
    ///
    /// `CircularDependency` if the registry contains a cycle;
    /// `ServiceFailed` naming the first required service that exhausted its
    /// attempts. Services that came up before the failure are shut down
    /// again in reverse order.
    pub async fn initialize(&self, config: Value) -> LifecycleResult<InitSummary> {
        let run = {
            let mut slot = self.inner.init_future.lock();
            match slot.as_ref() {
                Some(existing) => {
                    debug!("initialization already started, joining");
                    existing.clone()
                }
                None => {
                    self.inner.registration_closed.store(true, Ordering::SeqCst);
                    let container = self.clone();
                    let run = async move { container.run_initialization(config).await }
                        .boxed()
                        .shared();
                    *slot = Some(run.clone());
                    run
                }
            }
        };
        run.await
    }

    async fn run_initialization(self, config: Value) -> LifecycleResult<InitSummary> {
        let started = Instant::now();
        *self.inner.config_snapshot.write() = Some(Arc::new(config));

        let nodes = self.inner.registry.read().nodes();
        let order = match self.inner.resolver.resolve_initialization_order(&nodes) {
            Ok(order) => order,
            Err(e) => {
                error!(error = %e, "dependency resolution failed");
                return Err(e);
            }
        };
        *self.inner.resolved_order.write() = Some(order.clone());
        info!(services = order.len(), order = ?order, "initializing services");

        let abort = self.abort_token();
        let mut tasks = JoinSet::new();
        for name in &order {
            let container = self.clone();
            let name = name.clone();
            let abort = abort.clone();
            tasks.spawn(async move {
                let outcome = container.start_when_ready(&name, &abort).await;
                (name, outcome)
            });
        }

        let mut fatal = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(e))) => {
                    error!(service = %name, error = %e, "required service failed, aborting initialization");
                    fatal = Some(e);
                    break;
                }
                Err(join_error) if join_error.is_panic() => {
                    error!(error = %join_error, "initialization task panicked");
                    fatal = Some(LifecycleError::InitializationFailed(format!(
                        "initialization task panicked: {}",
                        join_error
                    )));
                    break;
                }
                Err(_) => {}
            }
        }

        if let Some(error) = fatal {
            abort.cancel();
            tasks.shutdown().await;
            self.abort_unfinished();
            self.rollback(&order).await;
            return Err(error);
        }

        if self.is_shutting_down() {
            warn!("shutdown began during initialization");
            return Err(LifecycleError::ShuttingDown);
        }

        let (ready, failed) = {
            let registry = self.inner.registry.read();
            registry.entries.values().fold((0, 0), |(ready, failed), entry| {
                match entry.state.status {
                    s if s.is_live() => (ready + 1, failed),
                    ServiceStatus::Failed => (ready, failed + 1),
                    _ => (ready, failed),
                }
            })
        };
        self.inner.initialized.store(true, Ordering::SeqCst);

        let duration = started.elapsed();
        info!(
            ready,
            failed,
            duration_ms = duration.as_millis() as u64,
            "service initialization complete"
        );
        Ok(InitSummary {
            success: true,
            duration,
            services_ready: ready,
            services_failed: failed,
            order,
        })
    }

    /// Waits for the service's dependencies, then runs its attempts.
    /// Only a required failure is an error.
    async fn start_when_ready(&self, name: &str, abort: &CancellationToken) -> LifecycleResult<()> {
        let Some(definition) = self.definition(name) else {
            return Ok(());
        };

        if let Err(reason) = self.wait_for_dependencies(&definition, abort).await {
            return self.fail_service(&definition, reason).map(|_| ());
        }

        self.with_entry(name, |entry| entry.mark_initializing());
        self.observers().service_initializing(name);
        self.run_attempts(&definition, abort).await.map(|_| ())
    }

    /// Blocks until every registered dependency is terminal, bounded by the
    /// container's dependency wait timeout. Unregistered dependencies are
    /// left for `resolve_dependencies` to reject.
    async fn wait_for_dependencies(
        &self,
        definition: &ServiceDefinition,
        abort: &CancellationToken,
    ) -> Result<(), String> {
        let receivers: Vec<_> = {
            let registry = self.inner.registry.read();
            definition
                .dependencies
                .iter()
                .filter_map(|dep| registry.entries.get(dep).map(|e| (dep.clone(), e.subscribe())))
                .collect()
        };
        if receivers.is_empty() {
            return Ok(());
        }

        let wait = self.inner.config.dependency_wait_timeout;
        let deadline = deadline_after(wait);
        debug!(service = %definition.name, dependencies = receivers.len(), "waiting for dependencies");

        for (dep, mut rx) in receivers {
            let terminal = async move { rx.wait_for(|status| status.is_terminal()).await.map(|_| ()) };
            let waited = tokio::select! {
                _ = abort.cancelled() => return Err("initialization aborted".to_string()),
                waited = timeout_at(deadline, terminal) => waited,
            };
            match waited {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(format!("dependency '{}' was removed", dep)),
                Err(_) => {
                    return Err(format!(
                        "timed out after {}ms waiting for dependency '{}'",
                        wait.as_millis(),
                        dep
                    ))
                }
            }
        }
        Ok(())
    }

    /// Retry loop for one service. The entry must already be `Initializing`.
    async fn run_attempts(
        &self,
        definition: &ServiceDefinition,
        abort: &CancellationToken,
    ) -> LifecycleResult<Option<ServiceInstance>> {
        let name = definition.name.as_str();
        let started = Instant::now();
        let mut last_error = String::new();

        for attempt in 1..=definition.retry_attempts {
            match self.attempt(definition, attempt, abort).await {
                Ok(instance) => {
                    let published = self
                        .with_entry(name, |entry| {
                            if self.is_shutting_down() {
                                return false;
                            }
                            entry.mark_ready(instance.clone(), attempt);
                            true
                        })
                        .unwrap_or(false);
                    if !published {
                        self.discard_late_instance(definition, instance).await;
                        return Ok(None);
                    }
                    let elapsed = started.elapsed();
                    info!(
                        service = %name,
                        attempts = attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "service ready"
                    );
                    self.observers().service_ready(name, attempt, elapsed);
                    return Ok(Some(instance));
                }
                Err(error) => {
                    let will_retry = attempt < definition.retry_attempts && !abort.is_cancelled();
                    self.with_entry(name, |entry| entry.state.attempts = attempt);
                    warn!(
                        service = %name,
                        attempt,
                        max_attempts = definition.retry_attempts,
                        error = %error,
                        "initialization attempt failed"
                    );
                    self.observers().attempt_failed(name, attempt, &error, will_retry);
                    last_error = error;

                    if !will_retry {
                        break;
                    }
                    let backoff = definition.retry_delay.saturating_mul(attempt);
                    tokio::select! {
                        _ = abort.cancelled() => break,
                        _ = sleep(backoff) => {}
                    }
                }
            }
        }

        self.fail_service(definition, last_error)
    }

    /// One attempt: wire dependencies, run the factory, then the instance's
    /// own `initialize` hook, all under a single deadline.
    async fn attempt(
        &self,
        definition: &ServiceDefinition,
        attempt: u32,
        abort: &CancellationToken,
    ) -> Result<ServiceInstance, String> {
        let name = definition.name.as_str();
        let dependencies = self.resolve_dependencies(name).map_err(|e| e.to_string())?;
        let token = abort.child_token();
        let context = ServiceContext::new(
            name,
            attempt,
            dependencies,
            self.config_slice(definition),
            token.clone(),
        );
        let deadline = deadline_after(definition.timeout);
        let timed_out = || {
            token.cancel();
            LifecycleError::Timeout {
                service: name.to_string(),
                timeout: definition.timeout,
            }
            .to_string()
        };

        debug!(service = %name, attempt, "calling factory");
        let factory = AssertUnwindSafe(async { (definition.factory)(context).await }).catch_unwind();
        let instance = match timeout_at(deadline, factory).await {
            Err(_) => return Err(timed_out()),
            Ok(Err(panic)) => return Err(format!("factory panicked: {}", panic_message(&*panic))),
            Ok(Ok(Err(e))) => return Err(e.to_string()),
            Ok(Ok(Ok(instance))) => instance,
        };

        let hook = AssertUnwindSafe(async { instance.initialize().await }).catch_unwind();
        match timeout_at(deadline, hook).await {
            Err(_) => Err(timed_out()),
            Ok(Err(panic)) => Err(format!("initialize panicked: {}", panic_message(&*panic))),
            Ok(Ok(Err(e))) => Err(format!("initialize failed: {}", e)),
            Ok(Ok(Ok(()))) => Ok(instance),
        }
    }

    /// Records a terminal failure. Optional services are absorbed.
    fn fail_service(
        &self,
        definition: &ServiceDefinition,
        error: String,
    ) -> LifecycleResult<Option<ServiceInstance>> {
        let name = definition.name.as_str();
        self.with_entry(name, |entry| entry.mark_failed(error.clone()));
        self.observers().service_failed(name, definition.optional, &error);

        if definition.optional {
            warn!(service = %name, error = %error, "optional service failed, continuing without it");
            Ok(None)
        } else {
            error!(service = %name, error = %error, "required service failed");
            Err(LifecycleError::ServiceFailed {
                service: name.to_string(),
                error,
            })
        }
    }

    /// Resolves the declared dependencies of `service` into instances.
    ///
    /// Live dependencies are passed through and failed optional ones become
    /// `None`. Anything else is an error.
    pub fn resolve_dependencies(&self, service: &str) -> LifecycleResult<Dependencies> {
        let registry = self.inner.registry.read();
        let entry = registry
            .entries
            .get(service)
            .ok_or_else(|| LifecycleError::NotFound(service.to_string()))?;

        let mut dependencies = Dependencies::new(service);
        for dep in &entry.definition.dependencies {
            let unavailable = |reason: String| LifecycleError::DependencyUnavailable {
                service: service.to_string(),
                dependency: dep.clone(),
                reason,
            };
            let dep_entry = registry
                .entries
                .get(dep)
                .ok_or_else(|| unavailable("not registered".to_string()))?;

            let status = dep_entry.state.status;
            if status.is_live() {
                dependencies.insert(dep.clone(), dep_entry.state.instance.clone());
            } else if status == ServiceStatus::Failed && dep_entry.definition.optional {
                dependencies.insert(dep.clone(), None);
            } else {
                return Err(unavailable(format!("status is {}", status)));
            }
        }
        Ok(dependencies)
    }

    /// Re-runs initialization of a failed optional service with the config
    /// snapshot from `initialize`. Returns the resulting status.
    pub async fn restart_service(&self, name: &str) -> LifecycleResult<ServiceStatus> {
        if self.is_shutting_down() {
            return Err(LifecycleError::ShuttingDown);
        }
        if self.config_snapshot().is_none() {
            return Err(LifecycleError::NotInitialized);
        }

        let definition = {
            let mut registry = self.inner.registry.write();
            let entry = registry
                .entries
                .get_mut(name)
                .ok_or_else(|| LifecycleError::NotFound(name.to_string()))?;
            let not_allowed = |reason: String| LifecycleError::RestartNotAllowed {
                service: name.to_string(),
                reason,
            };
            if !entry.definition.optional {
                return Err(not_allowed("service is required".to_string()));
            }
            if entry.state.status != ServiceStatus::Failed {
                return Err(not_allowed(format!("status is {}", entry.state.status)));
            }
            entry.mark_initializing();
            entry.definition.clone()
        };

        info!(service = %name, "restarting service");
        self.observers().service_initializing(name);
        let abort = self.abort_token();
        self.run_attempts(&definition, &abort).await?;
        Ok(self.service_status(name).unwrap_or(ServiceStatus::Failed))
    }

    /// Marks every service that never reached a terminal state as failed.
    fn abort_unfinished(&self) {
        let mut registry = self.inner.registry.write();
        for entry in registry.entries.values_mut() {
            if !entry.state.status.is_terminal() {
                entry.mark_failed("initialization aborted".to_string());
            }
        }
    }

    /// Stops services that came up before a required failure.
    async fn rollback(&self, order: &[String]) {
        let live: Vec<String> = order
            .iter()
            .rev()
            .filter(|name| self.has_service(name))
            .cloned()
            .collect();
        if live.is_empty() {
            return;
        }
        warn!(services = ?live, "rolling back initialized services");
        let mut summary = super::ShutdownSummary::default();
        let bounded = tokio::time::timeout(
            self.inner.config.shutdown_timeout,
            self.stop_sequential(&live, &mut summary),
        );
        if bounded.await.is_err() {
            warn!("rollback timed out");
        }
    }
}

/// Far enough ahead to never fire; used when `now + limit` overflows.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + limit`, saturating for effectively unbounded limits such as
/// `Duration::MAX`.
fn deadline_after(limit: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(limit).unwrap_or_else(|| now + FAR_FUTURE)
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
