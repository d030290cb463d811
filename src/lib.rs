//! # ferrous-lifecycle
//!
//! Named-service lifecycle orchestration for async Rust applications.
//!
//! ## Features
//!
//! - **Dependency-ordered startup**: services start concurrently, each as soon as its dependencies are terminal
//! - **Retries and timeouts**: per-service attempt budget with linear backoff and a deadline per attempt
//! - **Graceful degradation**: optional services may fail; dependents receive `None` instead
//! - **Health aggregation**: per-service health checks rolled up into one JSON-serializable report
//! - **Deadline-bounded shutdown**: graceful reverse-order teardown, or parallel emergency teardown
//! - **Cycle detection**: circular dependencies are reported with the full path
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrous_lifecycle::{BoxError, Service, ServiceContainer, ServiceContext, ServiceOptions};
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//! impl Service for Database {}
//!
//! struct PermitService {
//!     db: Arc<Database>,
//! }
//! impl Service for PermitService {}
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let container = ServiceContainer::new();
//!
//! container.register_service("database", |ctx: ServiceContext| async move {
//!     let url = ctx.config()["url"].as_str().unwrap_or("postgres://localhost").to_string();
//!     Ok::<_, BoxError>(Database { url })
//! }, ServiceOptions::new().config_key("database"))?;
//!
//! container.register_service("permits", |ctx: ServiceContext| async move {
//!     Ok::<_, BoxError>(PermitService { db: ctx.required("database")? })
//! }, ServiceOptions::new().depends_on(["database"]))?;
//!
//! container
//!     .initialize(serde_json::json!({ "database": { "url": "postgres://db" } }))
//!     .await?;
//!
//! let permits = container.get_required::<PermitService>("permits")?;
//! assert_eq!(permits.db.url, "postgres://db");
//!
//! container.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Required and Optional Services
//!
//! A required service that exhausts its attempts makes `initialize` fail, and
//! whatever had already started is shut down again. An optional service that
//! fails is recorded as `Failed`; dependents receive `None` for it through
//! [`Dependencies::optional`], and `get_service` returns `Ok(None)`.
//!
//! ## Lifecycle Hooks
//!
//! Instances implement [`Service`]. Its async `initialize` hook runs after
//! the factory, under the same deadline, and `shutdown` runs during teardown
//! after any registered shutdown handler.
//!
//! ```rust
//! use ferrous_lifecycle::{BoxError, Service};
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! struct Pool {
//!     open: AtomicBool,
//! }
//!
//! #[async_trait::async_trait]
//! impl Service for Pool {
//!     async fn initialize(&self) -> Result<(), BoxError> {
//!         self.open.store(true, Ordering::SeqCst);
//!         Ok(())
//!     }
//!
//!     async fn shutdown(&self) -> Result<(), BoxError> {
//!         self.open.store(false, Ordering::SeqCst);
//!         Ok(())
//!     }
//! }
//! ```

pub mod config;
pub mod container;
pub mod context;
pub mod definition;
pub mod error;
pub mod graph;
pub mod health;
pub mod module;
pub mod monitor;
pub mod observer;
pub mod resolver;
pub mod startup;
pub mod status;
pub mod traits;

#[cfg(feature = "axum-integration")]
pub mod axum_integration;

mod factory;

pub use config::{
    ConfigProvider, ConfigSource, ContainerConfig, EnvironmentConfigSource, JsonConfigSource,
    MemoryConfigSource, YamlConfigSource,
};
pub use container::{InitSummary, ServiceContainer, ServiceState, ShutdownSummary};
pub use context::{Dependencies, ServiceContext};
pub use definition::{ServiceDefinition, ServiceOptions, DEFAULT_PRIORITY};
pub use error::{BoxError, LifecycleError, LifecycleResult};
pub use graph::DependencyGraph;
pub use health::{ContainerHealth, HealthInfo, HealthReport, ServiceHealth};
pub use module::ServiceModule;
pub use monitor::{HealthMonitor, MonitorConfig, MIN_MONITOR_INTERVAL};
pub use observer::{LifecycleEvent, LifecycleObserver, RecordingObserver, TracingObserver};
pub use resolver::{DependencyResolver, ServiceNode, DEFAULT_MAX_DEPTH};
pub use startup::{PhaseTiming, StartupContext, StartupError, StartupOrchestrator, StartupReport};
pub use status::ServiceStatus;
pub use traits::{Service, ServiceInstance};
