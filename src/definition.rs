//! Service definitions and registration options.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ContainerConfig;
use crate::error::BoxError;
use crate::factory::{
    erase_health_check, erase_shutdown_handler, ErasedFactory, ErasedHealthCheck,
    ErasedShutdownHandler,
};
use crate::health::HealthInfo;
use crate::resolver::ServiceNode;
use crate::traits::Service;

/// Default initialization priority; lower numbers are attempted first.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Options for `ServiceContainer::register_service`.
///
/// Every field has a default, so `ServiceOptions::new()` registers a required
/// service with no dependencies. Defaults for timeout and retry delay come
/// from the container's [`ContainerConfig`]; retry attempts default to 1, or
/// 3 for optional services.
///
/// # Examples
///
/// ```
/// use ferrous_lifecycle::{ServiceOptions, HealthInfo, Service};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// struct Whatsapp;
/// impl Service for Whatsapp {}
///
/// let options = ServiceOptions::<Whatsapp>::new()
///     .depends_on(["database", "permits"])
///     .optional()
///     .timeout(Duration::from_secs(10))
///     .retry_delay(Duration::from_millis(500))
///     .config_key("whatsapp")
///     .health_check(|_bot: Arc<Whatsapp>| async { Ok(HealthInfo::healthy()) });
/// ```
pub struct ServiceOptions<T> {
    dependencies: Vec<String>,
    optional: bool,
    timeout: Option<Duration>,
    retry_attempts: Option<u32>,
    retry_delay: Option<Duration>,
    priority: Option<i32>,
    config_key: Option<String>,
    health_check: Option<ErasedHealthCheck>,
    shutdown_handler: Option<ErasedShutdownHandler>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Service> ServiceOptions<T> {
    pub fn new() -> Self {
        Self {
            dependencies: Vec::new(),
            optional: false,
            timeout: None,
            retry_attempts: None,
            retry_delay: None,
            priority: None,
            config_key: None,
            health_check: None,
            shutdown_handler: None,
            _marker: PhantomData,
        }
    }

    /// Declares dependencies by service name.
    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Marks the service optional: failures degrade instead of aborting startup.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Budget for the factory plus the instance's own `initialize` hook.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Total attempts, including the first. Zero is treated as one.
    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    /// Base backoff; attempt `n` waits `retry_delay * n` before the next try.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Tie-break among independent services; lower runs first.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Dotted path of this service's slice in the config snapshot.
    pub fn config_key(mut self, key: impl Into<String>) -> Self {
        self.config_key = Some(key.into());
        self
    }

    pub fn health_check<F, Fut>(mut self, check: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HealthInfo, BoxError>> + Send + 'static,
    {
        self.health_check = Some(erase_health_check(check));
        self
    }

    /// Runs before the instance's own `shutdown` hook during teardown.
    pub fn shutdown_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.shutdown_handler = Some(erase_shutdown_handler(handler));
        self
    }

    pub(crate) fn into_definition(
        self,
        name: String,
        factory: ErasedFactory,
        config: &ContainerConfig,
    ) -> ServiceDefinition {
        let default_attempts = if self.optional { 3 } else { 1 };
        ServiceDefinition {
            name,
            factory,
            dependencies: self.dependencies,
            optional: self.optional,
            timeout: self.timeout.unwrap_or(config.default_timeout),
            retry_attempts: self.retry_attempts.unwrap_or(default_attempts).max(1),
            retry_delay: self.retry_delay.unwrap_or(config.default_retry_delay),
            priority: self.priority.unwrap_or(config.default_priority),
            config_key: self.config_key,
            health_check: self.health_check,
            shutdown_handler: self.shutdown_handler,
            type_name: std::any::type_name::<T>(),
        }
    }
}

impl<T: Service> Default for ServiceOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable description of a registered service.
pub struct ServiceDefinition {
    pub(crate) name: String,
    pub(crate) factory: ErasedFactory,
    pub(crate) dependencies: Vec<String>,
    pub(crate) optional: bool,
    pub(crate) timeout: Duration,
    pub(crate) retry_attempts: u32,
    pub(crate) retry_delay: Duration,
    pub(crate) priority: i32,
    pub(crate) config_key: Option<String>,
    pub(crate) health_check: Option<ErasedHealthCheck>,
    pub(crate) shutdown_handler: Option<ErasedShutdownHandler>,
    pub(crate) type_name: &'static str,
}

impl ServiceDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn config_key(&self) -> Option<&str> {
        self.config_key.as_deref()
    }

    pub fn has_health_check(&self) -> bool {
        self.health_check.is_some()
    }

    pub fn has_shutdown_handler(&self) -> bool {
        self.shutdown_handler.is_some()
    }

    /// Concrete type produced by the factory.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn node(&self) -> ServiceNode {
        ServiceNode {
            name: self.name.clone(),
            dependencies: self.dependencies.clone(),
            priority: self.priority,
        }
    }
}

impl std::fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("dependencies", &self.dependencies)
            .field("optional", &self.optional)
            .field("timeout", &self.timeout)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("priority", &self.priority)
            .field("config_key", &self.config_key)
            .field("health_check", &self.health_check.is_some())
            .field("shutdown_handler", &self.shutdown_handler.is_some())
            .finish()
    }
}
