//! Service status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a registered service
///
/// A service moves forward along a single path with one recovery edge:
///
/// ```text
/// Pending -> Initializing -> Ready -> Stopped
///                 |            ^  \
///                 v            |   Degraded -> Stopped
///              Failed ---------+ (optional services, via restart)
/// ```
///
/// `Failed` is terminal for required services. For optional services it can
/// re-enter `Initializing` through an explicit restart.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::ServiceStatus;
///
/// assert!(ServiceStatus::Pending.can_transition_to(ServiceStatus::Initializing));
/// assert!(!ServiceStatus::Stopped.can_transition_to(ServiceStatus::Ready));
/// assert!(ServiceStatus::Failed.is_terminal());
/// assert!(ServiceStatus::Degraded.is_live());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Registered, not yet started
    Pending,
    /// Factory or self-initialize in flight (across retries)
    Initializing,
    /// Instance published and usable
    Ready,
    /// Ready, but its health check reports partial capability
    Degraded,
    /// Attempts exhausted
    Failed,
    /// Torn down during shutdown
    Stopped,
}

impl ServiceStatus {
    /// Terminal for the current initialization attempt: dependents may proceed.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ServiceStatus::Ready | ServiceStatus::Degraded | ServiceStatus::Failed | ServiceStatus::Stopped
        )
    }

    /// The instance is published and can be handed out.
    pub fn is_live(self) -> bool {
        matches!(self, ServiceStatus::Ready | ServiceStatus::Degraded)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// `Failed -> Initializing` is allowed here; the container additionally
    /// restricts it to optional services. `Initializing -> Stopped` covers an
    /// instance that finished building after shutdown began.
    pub fn can_transition_to(self, next: ServiceStatus) -> bool {
        use ServiceStatus::*;
        matches!(
            (self, next),
            (Pending, Initializing)
                | (Pending, Failed)
                | (Initializing, Ready)
                | (Initializing, Failed)
                | (Initializing, Stopped)
                | (Ready, Degraded)
                | (Degraded, Ready)
                | (Ready, Stopped)
                | (Degraded, Stopped)
                | (Failed, Initializing)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceStatus::Pending => "pending",
            ServiceStatus::Initializing => "initializing",
            ServiceStatus::Ready => "ready",
            ServiceStatus::Degraded => "degraded",
            ServiceStatus::Failed => "failed",
            ServiceStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
