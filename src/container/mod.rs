//! The service container.
//!
//! `ServiceContainer` owns the registry of named service definitions and
//! drives their lifecycle: dependency-ordered concurrent initialization with
//! retries and timeouts, graceful degradation of optional services, health
//! aggregation, and graceful or emergency shutdown.
//!
//! The container is a cheap, cloneable handle. Construct one at the top of the
//! process and pass it to whatever needs services (HTTP router, job runners);
//! every clone sees the same registry.

mod health;
mod init;
mod shutdown;
mod state;

pub use init::InitSummary;
pub use shutdown::ShutdownSummary;
pub use state::ServiceState;

use futures::future::{BoxFuture, Shared};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{lookup, ContainerConfig};
use crate::context::ServiceContext;
use crate::definition::{ServiceDefinition, ServiceOptions};
use crate::error::{BoxError, LifecycleError, LifecycleResult};
use crate::factory::erase_factory;
use crate::graph::DependencyGraph;
use crate::module::ServiceModule;
use crate::observer::{LifecycleObserver, Observers};
use crate::resolver::DependencyResolver;
use crate::status::ServiceStatus;
use crate::traits::{Service, ServiceInstance};
use state::{Registry, ServiceEntry};

type InitFuture = Shared<BoxFuture<'static, LifecycleResult<InitSummary>>>;

pub(crate) struct Inner {
    config: ContainerConfig,
    resolver: DependencyResolver,
    registry: RwLock<Registry>,
    observers: RwLock<Observers>,
    init_future: Mutex<Option<InitFuture>>,
    config_snapshot: RwLock<Option<Arc<Value>>>,
    resolved_order: RwLock<Option<Vec<String>>>,
    registration_closed: AtomicBool,
    initialized: AtomicBool,
    shutdown_started: AtomicBool,
    emergency_started: AtomicBool,
    /// Parent of every initialization and restart abort token; cancelled
    /// when either shutdown path begins.
    shutdown_signal: Mutex<CancellationToken>,
}

/// Dependency-injection container with an explicit lifecycle.
///
/// # Examples
///
/// ```
/// use ferrous_lifecycle::{ServiceContainer, ServiceContext, ServiceOptions, Service, BoxError};
/// use std::sync::Arc;
///
/// struct Database;
/// impl Service for Database {}
///
/// struct Cache;
/// impl Service for Cache {}
///
/// struct Api {
///     db: Arc<Database>,
///     cache: Option<Arc<Cache>>,
/// }
/// impl Service for Api {}
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let container = ServiceContainer::new();
///
/// container.register_service("db", |_ctx: ServiceContext| async {
///     Ok::<_, BoxError>(Database)
/// }, ServiceOptions::new())?;
///
/// container.register_service("cache", |_ctx: ServiceContext| async {
///     Err::<Cache, BoxError>("redis unreachable".into())
/// }, ServiceOptions::new().optional().retry_attempts(1))?;
///
/// container.register_service("api", |ctx: ServiceContext| async move {
///     Ok::<_, BoxError>(Api {
///         db: ctx.required("db")?,
///         cache: ctx.optional("cache"),
///     })
/// }, ServiceOptions::new().depends_on(["db", "cache"]))?;
///
/// let summary = container.initialize(serde_json::json!({})).await?;
/// assert_eq!(summary.services_ready, 2);
/// assert_eq!(summary.services_failed, 1);
///
/// assert!(container.get_service::<Cache>("cache")?.is_none());
/// let api = container.get_required::<Api>("api")?;
/// assert!(api.cache.is_none());
///
/// container.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ServiceContainer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("services", &self.inner.registry.read().len())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl Default for ServiceContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    pub fn with_config(config: ContainerConfig) -> Self {
        let resolver = DependencyResolver::with_max_depth(config.max_dependency_depth);
        Self {
            inner: Arc::new(Inner {
                config,
                resolver,
                registry: RwLock::new(Registry::default()),
                observers: RwLock::new(Observers::default()),
                init_future: Mutex::new(None),
                config_snapshot: RwLock::new(None),
                resolved_order: RwLock::new(None),
                registration_closed: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                shutdown_started: AtomicBool::new(false),
                emergency_started: AtomicBool::new(false),
                shutdown_signal: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.inner.config
    }

    /// Registers a named service.
    ///
    /// The factory receives a [`ServiceContext`] with the resolved
    /// dependencies and the service's config slice, and produces the
    /// instance.
    ///
    /// # Errors
    ///
    /// `RegistrationClosed` once `initialize` has been called,
    /// `DuplicateService` for a name already in use, `SelfDependency` and
    /// `DepthExceeded` from dependency validation.
    pub fn register_service<T, F, Fut>(
        &self,
        name: impl Into<String>,
        factory: F,
        options: ServiceOptions<T>,
    ) -> LifecycleResult<()>
    where
        T: Service,
        F: Fn(ServiceContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        let name = name.into();
        if self.inner.registration_closed.load(Ordering::SeqCst) {
            return Err(LifecycleError::RegistrationClosed(name));
        }

        let mut registry = self.inner.registry.write();
        if registry.entries.contains_key(&name) {
            return Err(LifecycleError::DuplicateService(name));
        }

        let definition = options.into_definition(
            name.clone(),
            erase_factory(factory),
            &self.inner.config,
        );
        self.inner
            .resolver
            .validate_dependencies(&name, &definition.dependencies, &registry.nodes())?;

        debug!(
            service = %name,
            dependencies = ?definition.dependencies,
            optional = definition.optional,
            "registered service"
        );
        registry.insert(ServiceEntry::new(definition));
        Ok(())
    }

    /// Registers every service of a module.
    pub fn add_module<M: ServiceModule>(&self, module: M) -> LifecycleResult<&Self> {
        module.register_services(self)?;
        Ok(self)
    }

    pub fn add_observer(&self, observer: Arc<dyn LifecycleObserver>) {
        self.inner.observers.write().add(observer);
    }

    pub(crate) fn observers(&self) -> Observers {
        self.inner.observers.read().clone()
    }

    /// True once `initialize` has completed successfully and until shutdown.
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Gets a service instance.
    ///
    /// Returns `Ok(None)` for an optional service that is not live.
    ///
    /// # Errors
    ///
    /// `NotInitialized` before `initialize` completes, `NotFound` for an
    /// unknown name, `ServiceUnavailable` for a required service that is not
    /// live, `TypeMismatch` if the instance is not a `T`.
    pub fn get_service<T: Service>(&self, name: &str) -> LifecycleResult<Option<Arc<T>>> {
        match self.get_service_dyn(name)? {
            Some(instance) => instance
                .downcast_arc::<T>()
                .map(Some)
                .map_err(|_| LifecycleError::TypeMismatch {
                    service: name.to_string(),
                    expected: std::any::type_name::<T>(),
                }),
            None => Ok(None),
        }
    }

    /// Like [`get_service`](Self::get_service), treating an absent optional
    /// service as an error.
    pub fn get_required<T: Service>(&self, name: &str) -> LifecycleResult<Arc<T>> {
        self.get_service::<T>(name)?.ok_or_else(|| LifecycleError::ServiceUnavailable {
            service: name.to_string(),
            status: self
                .service_status(name)
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    /// Type-erased lookup with the same contract as `get_service`.
    pub fn get_service_dyn(&self, name: &str) -> LifecycleResult<Option<ServiceInstance>> {
        if !self.is_initialized() {
            return Err(LifecycleError::NotInitialized);
        }
        let registry = self.inner.registry.read();
        let entry = registry
            .entries
            .get(name)
            .ok_or_else(|| LifecycleError::NotFound(name.to_string()))?;

        if entry.state.status.is_live() {
            return Ok(entry.state.instance.clone());
        }
        if entry.definition.optional {
            return Ok(None);
        }
        Err(LifecycleError::ServiceUnavailable {
            service: name.to_string(),
            status: entry.state.status.to_string(),
        })
    }

    /// True if `name` is registered and currently live.
    pub fn has_service(&self, name: &str) -> bool {
        self.inner
            .registry
            .read()
            .entries
            .get(name)
            .map(|e| e.state.status.is_live())
            .unwrap_or(false)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.registry.read().entries.contains_key(name)
    }

    /// Registered names in registration order.
    pub fn service_names(&self) -> Vec<String> {
        self.inner.registry.read().order.clone()
    }

    pub fn service_status(&self, name: &str) -> Option<ServiceStatus> {
        self.inner.registry.read().entries.get(name).map(|e| e.state.status)
    }

    pub fn service_state(&self, name: &str) -> Option<ServiceState> {
        self.inner.registry.read().entries.get(name).map(|e| e.state.clone())
    }

    pub fn definition(&self, name: &str) -> Option<Arc<ServiceDefinition>> {
        self.inner
            .registry
            .read()
            .entries
            .get(name)
            .map(|e| e.definition.clone())
    }

    /// Order `initialize` uses (or used) for the current registry.
    pub fn initialization_order(&self) -> LifecycleResult<Vec<String>> {
        if let Some(order) = self.inner.resolved_order.read().clone() {
            return Ok(order);
        }
        let nodes = self.inner.registry.read().nodes();
        self.inner.resolver.resolve_initialization_order(&nodes)
    }

    /// Adjacency and reverse-adjacency of the registered services.
    pub fn dependency_graph(&self) -> DependencyGraph {
        let nodes = self.inner.registry.read().nodes();
        self.inner.resolver.dependency_graph(&nodes)
    }

    /// Configuration passed to the last `initialize` call.
    pub fn config_snapshot(&self) -> Option<Arc<Value>> {
        self.inner.config_snapshot.read().clone()
    }

    /// The slice of the config snapshot a service's factory receives.
    pub(crate) fn config_slice(&self, definition: &ServiceDefinition) -> Value {
        let Some(snapshot) = self.config_snapshot() else {
            return Value::Null;
        };
        definition
            .config_key
            .as_deref()
            .and_then(|key| lookup(&snapshot, key))
            .cloned()
            .unwrap_or_else(|| (*snapshot).clone())
    }

    /// Discards every definition and all state.
    ///
    /// Intended for tests; does not run any shutdown hooks.
    pub fn reset(&self) {
        let mut registry = self.inner.registry.write();
        *registry = Registry::default();
        *self.inner.init_future.lock() = None;
        *self.inner.config_snapshot.write() = None;
        *self.inner.resolved_order.write() = None;
        self.inner.registration_closed.store(false, Ordering::SeqCst);
        self.inner.initialized.store(false, Ordering::SeqCst);
        self.inner.shutdown_started.store(false, Ordering::SeqCst);
        self.inner.emergency_started.store(false, Ordering::SeqCst);
        *self.inner.shutdown_signal.lock() = CancellationToken::new();
    }

    /// Abort token for one initialization run or restart.
    pub(crate) fn abort_token(&self) -> CancellationToken {
        self.inner.shutdown_signal.lock().child_token()
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.inner.shutdown_started.load(Ordering::SeqCst)
    }

    /// Runs `f` against a registered entry under the write lock.
    pub(crate) fn with_entry<R>(&self, name: &str, f: impl FnOnce(&mut ServiceEntry) -> R) -> Option<R> {
        self.inner.registry.write().entries.get_mut(name).map(f)
    }
}
