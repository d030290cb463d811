//! Health reporting types.
//!
//! The report returned by `ServiceContainer::get_service_health` serializes
//! directly to the JSON body of a status endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::status::ServiceStatus;

/// Result of a service-specific health check.
///
/// # Examples
///
/// ```
/// use ferrous_lifecycle::HealthInfo;
///
/// let ok = HealthInfo::healthy().with_details(serde_json::json!({ "pool": 8 }));
/// assert!(ok.healthy);
///
/// let partial = HealthInfo::degraded("read replica offline");
/// assert!(partial.healthy && partial.degraded);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthInfo {
    pub healthy: bool,
    /// Usable, with reduced capability
    #[serde(default)]
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl HealthInfo {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            degraded: false,
            error: None,
            details: Value::Null,
        }
    }

    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            healthy: true,
            degraded: true,
            error: Some(reason.into()),
            details: Value::Null,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            degraded: false,
            error: Some(error.into()),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Per-service entry of a [`HealthReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: ServiceStatus,
    pub optional: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initialized_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthInfo>,
}

/// Container-wide counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerHealth {
    pub initialized: bool,
    pub total_services: usize,
    pub ready_services: usize,
    pub failed_services: usize,
    pub degraded_services: usize,
    pub pending_services: usize,
    pub stopped_services: usize,
    pub optional_failures: usize,
    /// Required services that are not live
    pub critical_failures: usize,
}

/// Aggregate health of every registered service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub container: ContainerHealth,
    pub services: BTreeMap<String, ServiceHealth>,
}

impl HealthReport {
    /// True when the container is initialized and every required service is live.
    pub fn is_operational(&self) -> bool {
        self.container.initialized && self.container.critical_failures == 0
    }

    /// Names of failed optional services.
    pub fn failed_optional(&self) -> Vec<&str> {
        self.services
            .iter()
            .filter(|(_, s)| s.optional && s.status == ServiceStatus::Failed)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
