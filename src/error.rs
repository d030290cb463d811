//! Error types for the service lifecycle container.

use std::fmt;
use std::time::Duration;

/// Boxed error returned by factories, lifecycle hooks and health checks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Lifecycle errors
///
/// Represents the conditions that can occur during service registration,
/// dependency resolution, initialization, lookup or shutdown.
///
/// The optional/required flag of a service is the only thing that decides
/// whether an initialization failure ends up here as a fatal error or is
/// absorbed as a degraded service.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::LifecycleError;
///
/// let circular = LifecycleError::CircularDependency(vec![
///     "a".to_string(),
///     "b".to_string(),
///     "a".to_string(),
/// ]);
/// assert_eq!(circular.to_string(), "Circular dependency detected: a -> b -> a");
///
/// let failed = LifecycleError::ServiceFailed {
///     service: "payments".to_string(),
///     error: "connection refused".to_string(),
/// };
/// assert!(failed.to_string().contains("payments"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleError {
    /// Registration attempted after `initialize()` began
    RegistrationClosed(String),
    /// A service with this name is already registered
    DuplicateService(String),
    /// A service lists itself as a dependency
    SelfDependency(String),
    /// Dependency chain deeper than the configured maximum
    DepthExceeded {
        service: String,
        depth: usize,
        max: usize,
    },
    /// Circular dependency detected (includes path)
    CircularDependency(Vec<String>),
    /// Container has not completed `initialize()`
    NotInitialized,
    /// No service registered under this name
    NotFound(String),
    /// Required service is registered but not live
    ServiceUnavailable {
        service: String,
        status: String,
    },
    /// A dependency could not be handed to a factory
    DependencyUnavailable {
        service: String,
        dependency: String,
        reason: String,
    },
    /// Instance is not of the requested concrete type
    TypeMismatch {
        service: String,
        expected: &'static str,
    },
    /// An attempt exceeded its deadline
    Timeout {
        service: String,
        timeout: Duration,
    },
    /// Service exhausted its attempts
    ServiceFailed {
        service: String,
        error: String,
    },
    /// Initialization of the container was aborted
    InitializationFailed(String),
    /// `restart_service` called on a service that is not a failed optional one
    RestartNotAllowed {
        service: String,
        reason: String,
    },
    /// Container is stopping or stopped
    ShuttingDown,
    /// Teardown could not complete; the process should exit
    Unrecoverable(String),
    /// Configuration could not be loaded or parsed
    Config(String),
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleError::RegistrationClosed(name) => write!(
                f,
                "Cannot register service '{}' after container initialization",
                name
            ),
            LifecycleError::DuplicateService(name) => {
                write!(f, "Service '{}' is already registered", name)
            }
            LifecycleError::SelfDependency(name) => {
                write!(f, "Service '{}' cannot depend on itself", name)
            }
            LifecycleError::DepthExceeded { service, depth, max } => write!(
                f,
                "Dependency chain for '{}' is {} levels deep (max {})",
                service, depth, max
            ),
            LifecycleError::CircularDependency(path) => {
                write!(f, "Circular dependency detected: {}", path.join(" -> "))
            }
            LifecycleError::NotInitialized => write!(f, "Service container not initialized"),
            LifecycleError::NotFound(name) => write!(f, "Service '{}' is not registered", name),
            LifecycleError::ServiceUnavailable { service, status } => write!(
                f,
                "Required service '{}' is not available (status: {})",
                service, status
            ),
            LifecycleError::DependencyUnavailable {
                service,
                dependency,
                reason,
            } => write!(
                f,
                "Dependency '{}' of '{}' is unavailable: {}",
                dependency, service, reason
            ),
            LifecycleError::TypeMismatch { service, expected } => {
                write!(f, "Service '{}' is not a {}", service, expected)
            }
            LifecycleError::Timeout { service, timeout } => write!(
                f,
                "Service '{}' initialization timeout after {}ms",
                service,
                timeout.as_millis()
            ),
            LifecycleError::ServiceFailed { service, error } => {
                write!(f, "Required service '{}' failed: {}", service, error)
            }
            LifecycleError::InitializationFailed(msg) => {
                write!(f, "Container initialization failed: {}", msg)
            }
            LifecycleError::RestartNotAllowed { service, reason } => {
                write!(f, "Cannot restart service '{}': {}", service, reason)
            }
            LifecycleError::ShuttingDown => write!(f, "Service container is shutting down"),
            LifecycleError::Unrecoverable(msg) => write!(f, "Unrecoverable shutdown: {}", msg),
            LifecycleError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for LifecycleError {}

impl LifecycleError {
    /// Returns true for errors raised while building the registry.
    pub fn is_registration_error(&self) -> bool {
        matches!(
            self,
            LifecycleError::RegistrationClosed(_)
                | LifecycleError::DuplicateService(_)
                | LifecycleError::SelfDependency(_)
                | LifecycleError::DepthExceeded { .. }
        )
    }
}

/// Result type for lifecycle operations
pub type LifecycleResult<T> = Result<T, LifecycleError>;
