//! Factory context for building service instances.
//!
//! A `ServiceContext` is handed to every factory invocation. It carries the
//! resolved dependencies, the service's configuration slice and a
//! cancellation token that fires when the attempt's deadline passes.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{LifecycleError, LifecycleResult};
use crate::traits::{Service, ServiceInstance};

/// Resolved dependencies of a service.
///
/// A dependency that is an optional service which failed to start is present
/// as `None`. Factories choose how to treat that through [`required`] and
/// [`optional`].
///
/// [`required`]: Dependencies::required
/// [`optional`]: Dependencies::optional
#[derive(Clone, Default)]
pub struct Dependencies {
    owner: String,
    entries: HashMap<String, Option<ServiceInstance>>,
}

impl Dependencies {
    pub(crate) fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            entries: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, instance: Option<ServiceInstance>) {
        self.entries.insert(name.into(), instance);
    }

    /// Gets a dependency that must be present.
    ///
    /// # Errors
    ///
    /// Returns `DependencyUnavailable` if the dependency was not declared or
    /// is a failed optional service, and `TypeMismatch` if the instance is not
    /// a `T`.
    pub fn required<T: Service>(&self, name: &str) -> LifecycleResult<Arc<T>> {
        match self.entries.get(name) {
            Some(Some(instance)) => {
                instance
                    .clone()
                    .downcast_arc::<T>()
                    .map_err(|_| LifecycleError::TypeMismatch {
                        service: name.to_string(),
                        expected: std::any::type_name::<T>(),
                    })
            }
            Some(None) => Err(LifecycleError::DependencyUnavailable {
                service: self.owner.clone(),
                dependency: name.to_string(),
                reason: "optional dependency failed to initialize".to_string(),
            }),
            None => Err(LifecycleError::DependencyUnavailable {
                service: self.owner.clone(),
                dependency: name.to_string(),
                reason: "not declared as a dependency".to_string(),
            }),
        }
    }

    /// Gets a dependency that may be absent.
    ///
    /// Returns `None` for failed optional services, undeclared names and
    /// instances of a different type.
    pub fn optional<T: Service>(&self, name: &str) -> Option<Arc<T>> {
        self.entries
            .get(name)?
            .clone()?
            .downcast_arc::<T>()
            .ok()
    }

    /// Gets the type-erased instance, if available.
    pub fn get_dyn(&self, name: &str) -> Option<ServiceInstance> {
        self.entries.get(name).cloned().flatten()
    }

    /// True when the dependency was resolved to a live instance.
    pub fn is_available(&self, name: &str) -> bool {
        matches!(self.entries.get(name), Some(Some(_)))
    }

    /// Names of all declared dependencies, available or not.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (name, instance) in &self.entries {
            map.entry(name, &if instance.is_some() { "available" } else { "unavailable" });
        }
        map.finish()
    }
}

/// Context passed to factory functions.
///
/// # Examples
///
/// ```
/// use ferrous_lifecycle::{
///     ServiceContainer, ServiceContext, ServiceOptions, Service, BoxError,
/// };
/// use std::sync::Arc;
///
/// struct Database { url: String }
/// impl Service for Database {}
///
/// struct Api { db: Arc<Database>, cache: Option<Arc<Cache>> }
/// impl Service for Api {}
///
/// struct Cache;
/// impl Service for Cache {}
///
/// let container = ServiceContainer::new();
/// container.register_service("db", |ctx: ServiceContext| async move {
///     let url = ctx.config()["url"].as_str().unwrap_or("postgres://localhost").to_string();
///     Ok::<_, BoxError>(Database { url })
/// }, ServiceOptions::new().config_key("database")).unwrap();
///
/// container.register_service("api", |ctx: ServiceContext| async move {
///     Ok::<_, BoxError>(Api {
///         db: ctx.required::<Database>("db")?,
///         cache: ctx.optional::<Cache>("cache"),
///     })
/// }, ServiceOptions::new().depends_on(["db", "cache"])).unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct ServiceContext {
    name: String,
    attempt: u32,
    dependencies: Dependencies,
    config: Value,
    cancel: CancellationToken,
}

impl ServiceContext {
    pub(crate) fn new(
        name: impl Into<String>,
        attempt: u32,
        dependencies: Dependencies,
        config: Value,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            attempt,
            dependencies,
            config,
            cancel,
        }
    }

    /// Context with no dependencies and a null config, for exercising a
    /// factory outside a container.
    pub fn detached(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            dependencies: Dependencies::new(name.clone()),
            name,
            attempt: 1,
            config: Value::Null,
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the configuration slice.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    /// Shorthand for `dependencies().required(name)`.
    pub fn required<T: Service>(&self, name: &str) -> LifecycleResult<Arc<T>> {
        self.dependencies.required(name)
    }

    /// Shorthand for `dependencies().optional(name)`.
    pub fn optional<T: Service>(&self, name: &str) -> Option<Arc<T>> {
        self.dependencies.optional(name)
    }

    /// The configuration slice for this service.
    pub fn config(&self) -> &Value {
        &self.config
    }

    /// Deserializes the configuration slice.
    pub fn config_as<T: DeserializeOwned>(&self) -> LifecycleResult<T> {
        serde_json::from_value(self.config.clone())
            .map_err(|e| LifecycleError::Config(format!("{}: {}", self.name, e)))
    }

    /// Token cancelled when the attempt times out or initialization aborts.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
