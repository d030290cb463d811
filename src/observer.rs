//! Observers for service lifecycle transitions.
//!
//! Observers receive a callback for every state change the container makes,
//! which is enough to drive structured logs, metrics or test assertions
//! without the container knowing about any of them.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::status::ServiceStatus;

/// Observer trait for service lifecycle events.
///
/// Calls are made synchronously from the initialization and shutdown paths;
/// keep implementations lightweight.
///
/// # Examples
///
/// ```
/// use ferrous_lifecycle::{LifecycleObserver, ServiceContainer};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct ReadyCounter(AtomicUsize);
///
/// impl LifecycleObserver for ReadyCounter {
///     fn service_ready(&self, _name: &str, _attempts: u32, _elapsed: std::time::Duration) {
///         self.0.fetch_add(1, Ordering::SeqCst);
///     }
/// }
///
/// let container = ServiceContainer::new();
/// container.add_observer(Arc::new(ReadyCounter::default()));
/// ```
pub trait LifecycleObserver: Send + Sync {
    /// A service entered `Initializing` (first attempt or restart).
    fn service_initializing(&self, _name: &str) {}

    /// A single attempt failed; `will_retry` is false on the last one.
    fn attempt_failed(&self, _name: &str, _attempt: u32, _error: &str, _will_retry: bool) {}

    /// A service reached `Ready`.
    fn service_ready(&self, _name: &str, _attempts: u32, _elapsed: Duration) {}

    /// A service exhausted its attempts.
    fn service_failed(&self, _name: &str, _optional: bool, _error: &str) {}

    /// A service was torn down; `error` is set if its shutdown hooks failed.
    fn service_stopped(&self, _name: &str, _error: Option<&str>) {}

    /// A health check moved a live service between `Ready` and `Degraded`.
    fn health_changed(&self, _name: &str, _from: ServiceStatus, _to: ServiceStatus) {}
}

/// Container for registered observers.
#[derive(Default, Clone)]
pub(crate) struct Observers {
    observers: Vec<Arc<dyn LifecycleObserver>>,
}

impl Observers {
    pub(crate) fn add(&mut self, observer: Arc<dyn LifecycleObserver>) {
        self.observers.push(observer);
    }

    pub(crate) fn service_initializing(&self, name: &str) {
        for observer in &self.observers {
            observer.service_initializing(name);
        }
    }

    pub(crate) fn attempt_failed(&self, name: &str, attempt: u32, error: &str, will_retry: bool) {
        for observer in &self.observers {
            observer.attempt_failed(name, attempt, error, will_retry);
        }
    }

    pub(crate) fn service_ready(&self, name: &str, attempts: u32, elapsed: Duration) {
        for observer in &self.observers {
            observer.service_ready(name, attempts, elapsed);
        }
    }

    pub(crate) fn service_failed(&self, name: &str, optional: bool, error: &str) {
        for observer in &self.observers {
            observer.service_failed(name, optional, error);
        }
    }

    pub(crate) fn service_stopped(&self, name: &str, error: Option<&str>) {
        for observer in &self.observers {
            observer.service_stopped(name, error);
        }
    }

    pub(crate) fn health_changed(&self, name: &str, from: ServiceStatus, to: ServiceStatus) {
        for observer in &self.observers {
            observer.health_changed(name, from, to);
        }
    }
}

/// Built-in observer that logs through `tracing`.
///
/// The container already logs its own decisions; this observer adds one
/// event per transition under the `ferrous_lifecycle::events` target so they
/// can be filtered separately.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl LifecycleObserver for TracingObserver {
    fn service_initializing(&self, name: &str) {
        tracing::debug!(target: "ferrous_lifecycle::events", service = %name, "initializing");
    }

    fn attempt_failed(&self, name: &str, attempt: u32, error: &str, will_retry: bool) {
        tracing::warn!(
            target: "ferrous_lifecycle::events",
            service = %name, attempt, will_retry, error = %error,
            "attempt failed"
        );
    }

    fn service_ready(&self, name: &str, attempts: u32, elapsed: Duration) {
        tracing::info!(
            target: "ferrous_lifecycle::events",
            service = %name, attempts, elapsed_ms = elapsed.as_millis() as u64,
            "ready"
        );
    }

    fn service_failed(&self, name: &str, optional: bool, error: &str) {
        if optional {
            tracing::warn!(target: "ferrous_lifecycle::events", service = %name, error = %error, "optional service failed");
        } else {
            tracing::error!(target: "ferrous_lifecycle::events", service = %name, error = %error, "required service failed");
        }
    }

    fn service_stopped(&self, name: &str, error: Option<&str>) {
        match error {
            Some(error) => {
                tracing::warn!(target: "ferrous_lifecycle::events", service = %name, error = %error, "stopped with errors")
            }
            None => tracing::debug!(target: "ferrous_lifecycle::events", service = %name, "stopped"),
        }
    }

    fn health_changed(&self, name: &str, from: ServiceStatus, to: ServiceStatus) {
        tracing::info!(target: "ferrous_lifecycle::events", service = %name, %from, %to, "health changed");
    }
}

/// A recorded lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Initializing(String),
    AttemptFailed { name: String, attempt: u32, will_retry: bool },
    Ready { name: String, attempts: u32 },
    Failed { name: String, optional: bool },
    Stopped { name: String, clean: bool },
    HealthChanged { name: String, from: ServiceStatus, to: ServiceStatus },
}

/// Observer that keeps every event in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    /// Names of services in the order they were stopped.
    pub fn stop_order(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                LifecycleEvent::Stopped { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn push(&self, event: LifecycleEvent) {
        self.events.lock().push(event);
    }
}

impl LifecycleObserver for RecordingObserver {
    fn service_initializing(&self, name: &str) {
        self.push(LifecycleEvent::Initializing(name.to_string()));
    }

    fn attempt_failed(&self, name: &str, attempt: u32, _error: &str, will_retry: bool) {
        self.push(LifecycleEvent::AttemptFailed {
            name: name.to_string(),
            attempt,
            will_retry,
        });
    }

    fn service_ready(&self, name: &str, attempts: u32, _elapsed: Duration) {
        self.push(LifecycleEvent::Ready {
            name: name.to_string(),
            attempts,
        });
    }

    fn service_failed(&self, name: &str, optional: bool, _error: &str) {
        self.push(LifecycleEvent::Failed {
            name: name.to_string(),
            optional,
        });
    }

    fn service_stopped(&self, name: &str, error: Option<&str>) {
        self.push(LifecycleEvent::Stopped {
            name: name.to_string(),
            clean: error.is_none(),
        });
    }

    fn health_changed(&self, name: &str, from: ServiceStatus, to: ServiceStatus) {
        self.push(LifecycleEvent::HealthChanged {
            name: name.to_string(),
            from,
            to,
        });
    }
}
