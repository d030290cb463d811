//! Per-service mutable state.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::definition::ServiceDefinition;
use crate::health::HealthInfo;
use crate::resolver::ServiceNode;
use crate::status::ServiceStatus;
use crate::traits::ServiceInstance;

/// Snapshot of one service's lifecycle state.
///
/// The instance, when present, is shared with every caller of
/// `get_service`; nobody owns it exclusively.
#[derive(Clone)]
pub struct ServiceState {
    pub(crate) status: ServiceStatus,
    pub(crate) instance: Option<ServiceInstance>,
    pub(crate) error: Option<String>,
    pub(crate) dependencies: Vec<String>,
    pub(crate) optional: bool,
    pub(crate) attempts: u32,
    pub(crate) start_time: Option<DateTime<Utc>>,
    pub(crate) initialized_at: Option<DateTime<Utc>>,
    pub(crate) failed_at: Option<DateTime<Utc>>,
    pub(crate) stopped_at: Option<DateTime<Utc>>,
    pub(crate) last_health: Option<HealthInfo>,
    pub(crate) stopping: bool,
}

impl ServiceState {
    fn new(definition: &ServiceDefinition) -> Self {
        Self {
            status: ServiceStatus::Pending,
            instance: None,
            error: None,
            dependencies: definition.dependencies.clone(),
            optional: definition.optional,
            attempts: 0,
            start_time: None,
            initialized_at: None,
            failed_at: None,
            stopped_at: None,
            last_health: None,
            stopping: false,
        }
    }

    pub fn status(&self) -> ServiceStatus {
        self.status
    }

    pub fn instance(&self) -> Option<&ServiceInstance> {
        self.instance.as_ref()
    }

    /// Last failure message.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Attempts made in the latest initialization run.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn initialized_at(&self) -> Option<DateTime<Utc>> {
        self.initialized_at
    }

    pub fn failed_at(&self) -> Option<DateTime<Utc>> {
        self.failed_at
    }

    pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
        self.stopped_at
    }

    pub fn last_health(&self) -> Option<&HealthInfo> {
        self.last_health.as_ref()
    }
}

impl std::fmt::Debug for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceState")
            .field("status", &self.status)
            .field("instance", &self.instance.is_some())
            .field("error", &self.error)
            .field("attempts", &self.attempts)
            .field("optional", &self.optional)
            .finish()
    }
}

/// Definition, state and status broadcast for one registered service.
pub(crate) struct ServiceEntry {
    pub(crate) definition: Arc<ServiceDefinition>,
    pub(crate) state: ServiceState,
    status_tx: watch::Sender<ServiceStatus>,
}

impl ServiceEntry {
    pub(crate) fn new(definition: ServiceDefinition) -> Self {
        let state = ServiceState::new(&definition);
        let (status_tx, _) = watch::channel(ServiceStatus::Pending);
        Self {
            definition: Arc::new(definition),
            state,
            status_tx,
        }
    }

    /// Moves to `status` and wakes every waiter.
    pub(crate) fn set_status(&mut self, status: ServiceStatus) {
        debug_assert!(
            self.state.status == status || self.state.status.can_transition_to(status),
            "invalid transition {} -> {} for {}",
            self.state.status,
            status,
            self.definition.name
        );
        self.state.status = status;
        self.status_tx.send_replace(status);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ServiceStatus> {
        self.status_tx.subscribe()
    }

    pub(crate) fn mark_initializing(&mut self) {
        self.set_status(ServiceStatus::Initializing);
        self.state.instance = None;
        self.state.error = None;
        self.state.attempts = 0;
        self.state.start_time = Some(Utc::now());
        self.state.failed_at = None;
        self.state.initialized_at = None;
    }

    pub(crate) fn mark_ready(&mut self, instance: ServiceInstance, attempts: u32) {
        self.state.instance = Some(instance);
        self.state.attempts = attempts;
        self.state.error = None;
        self.state.initialized_at = Some(Utc::now());
        self.set_status(ServiceStatus::Ready);
    }

    pub(crate) fn mark_failed(&mut self, error: String) {
        self.state.instance = None;
        self.state.error = Some(error);
        self.state.failed_at = Some(Utc::now());
        self.set_status(ServiceStatus::Failed);
    }

    pub(crate) fn mark_stopped(&mut self, error: Option<String>) {
        if error.is_some() {
            self.state.error = error;
        }
        self.state.stopping = false;
        self.state.stopped_at = Some(Utc::now());
        self.set_status(ServiceStatus::Stopped);
    }

    /// Claims a live service for teardown. Returns `None` if it is not live
    /// or another shutdown path already claimed it.
    pub(crate) fn claim_for_stop(&mut self) -> Option<(Arc<ServiceDefinition>, ServiceInstance)> {
        if !self.state.status.is_live() || self.state.stopping {
            return None;
        }
        let instance = self.state.instance.clone()?;
        self.state.stopping = true;
        Some((self.definition.clone(), instance))
    }
}

/// Registered services, keyed by name, plus registration order.
#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) entries: HashMap<String, ServiceEntry>,
    pub(crate) order: Vec<String>,
}

impl Registry {
    pub(crate) fn insert(&mut self, entry: ServiceEntry) {
        let name = entry.definition.name.clone();
        self.order.push(name.clone());
        self.entries.insert(name, entry);
    }

    /// Resolver nodes in registration order.
    pub(crate) fn nodes(&self) -> Vec<ServiceNode> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|entry| entry.definition.node())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}
