//! Ordered application startup.
//!
//! `StartupOrchestrator` runs named async phases in sequence (load
//! configuration, initialize the container, attach the health monitor, start
//! listeners) and times each one. If a phase fails, the container is torn
//! down with `emergency_shutdown` and the failure is returned to the caller,
//! which decides the process exit code.

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info};

use crate::config::ConfigProvider;
use crate::container::{InitSummary, ServiceContainer};
use crate::error::BoxError;
use crate::monitor::{HealthMonitor, MonitorConfig};

/// State shared between startup phases.
#[derive(Clone)]
pub struct StartupContext {
    container: ServiceContainer,
    config: Arc<RwLock<Value>>,
    monitor: Arc<Mutex<Option<HealthMonitor>>>,
    init_summary: Arc<Mutex<Option<InitSummary>>>,
}

impl StartupContext {
    fn new(container: ServiceContainer) -> Self {
        Self {
            container,
            config: Arc::new(RwLock::new(Value::Object(Default::default()))),
            monitor: Arc::new(Mutex::new(None)),
            init_summary: Arc::new(Mutex::new(None)),
        }
    }

    pub fn container(&self) -> &ServiceContainer {
        &self.container
    }

    /// Configuration handed to `initialize`; empty object until a phase sets it.
    pub fn config(&self) -> Value {
        self.config.read().clone()
    }

    pub fn set_config(&self, config: Value) {
        *self.config.write() = config;
    }
}

impl fmt::Debug for StartupContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartupContext")
            .field("container", &self.container)
            .finish()
    }
}

type PhaseFn = Box<dyn FnOnce(StartupContext) -> BoxFuture<'static, Result<(), BoxError>> + Send>;

struct Phase {
    name: String,
    run: PhaseFn,
}

/// Timing of one completed phase.
#[derive(Debug, Clone)]
pub struct PhaseTiming {
    pub name: String,
    pub duration: Duration,
}

/// Result of a successful startup.
#[derive(Debug)]
pub struct StartupReport {
    pub phases: Vec<PhaseTiming>,
    pub duration: Duration,
    pub init_summary: Option<InitSummary>,
    /// Running monitor, if a health-monitor phase was configured.
    pub monitor: Option<HealthMonitor>,
}

/// A startup phase failed.
#[derive(Debug, Clone)]
pub struct StartupError {
    pub phase: String,
    pub error: String,
    /// Emergency shutdown could not finish within its deadline.
    pub unrecoverable: bool,
}

impl StartupError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        if self.unrecoverable {
            2
        } else {
            1
        }
    }
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Startup failed in phase '{}': {}", self.phase, self.error)?;
        if self.unrecoverable {
            write!(f, " (emergency shutdown did not complete)")?;
        }
        Ok(())
    }
}

impl std::error::Error for StartupError {}

/// Runs startup phases in order.
///
/// ```no_run
/// use ferrous_lifecycle::{ConfigProvider, MonitorConfig, ServiceContainer, StartupOrchestrator};
///
/// # async fn run() {
/// let container = ServiceContainer::new();
/// // ... register services ...
///
/// let outcome = StartupOrchestrator::new(container.clone())
///     .load_config(ConfigProvider::default())
///     .initialize_container()
///     .attach_health_monitor(MonitorConfig::default())
///     .phase("http", |ctx| async move {
///         // bind the listener, serve with ctx.container().clone()
///         Ok(())
///     })
///     .run()
///     .await;
///
/// if let Err(e) = outcome {
///     eprintln!("{}", e);
///     std::process::exit(e.exit_code());
/// }
/// # }
/// ```
pub struct StartupOrchestrator {
    context: StartupContext,
    phases: Vec<Phase>,
    phase_timeout: Option<Duration>,
}

impl StartupOrchestrator {
    pub fn new(container: ServiceContainer) -> Self {
        Self {
            context: StartupContext::new(container),
            phases: Vec::new(),
            phase_timeout: None,
        }
    }

    /// Bounds every phase. A phase that exceeds it fails.
    pub fn phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = Some(timeout);
        self
    }

    /// Appends a custom phase.
    pub fn phase<F, Fut>(mut self, name: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(StartupContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.phases.push(Phase {
            name: name.into(),
            run: Box::new(move |ctx| Box::pin(run(ctx))),
        });
        self
    }

    /// Phase `config`: loads the provider's sources into the snapshot handed
    /// to the container.
    pub fn load_config(self, provider: ConfigProvider) -> Self {
        self.phase("config", move |ctx| async move {
            let config = provider.reload()?;
            ctx.set_config(config);
            Ok::<(), BoxError>(())
        })
    }

    /// Phase `container`: initializes every registered service.
    pub fn initialize_container(self) -> Self {
        self.phase("container", |ctx| async move {
            let summary = ctx.container.initialize(ctx.config()).await?;
            *ctx.init_summary.lock() = Some(summary);
            Ok::<(), BoxError>(())
        })
    }

    /// Phase `health-monitor`: starts a [`HealthMonitor`] on the container.
    pub fn attach_health_monitor(self, config: MonitorConfig) -> Self {
        self.phase("health-monitor", move |ctx| async move {
            let monitor = HealthMonitor::start(ctx.container.clone(), config);
            *ctx.monitor.lock() = Some(monitor);
            Ok(())
        })
    }

    pub async fn run(self) -> Result<StartupReport, StartupError> {
        let started = Instant::now();
        let context = self.context;
        let mut timings = Vec::with_capacity(self.phases.len());

        for phase in self.phases {
            let phase_started = Instant::now();
            info!(phase = %phase.name, "starting phase");

            let running = (phase.run)(context.clone());
            let outcome = match self.phase_timeout {
                Some(limit) => match tokio::time::timeout(limit, running).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(format!("phase timed out after {}ms", limit.as_millis()).into()),
                },
                None => running.await,
            };

            if let Err(e) = outcome {
                error!(phase = %phase.name, error = %e, "startup phase failed");
                return Err(abort(&context, phase.name, e.to_string()).await);
            }

            let duration = phase_started.elapsed();
            info!(phase = %phase.name, duration_ms = duration.as_millis() as u64, "phase complete");
            timings.push(PhaseTiming {
                name: phase.name,
                duration,
            });
        }

        let duration = started.elapsed();
        info!(duration_ms = duration.as_millis() as u64, "startup complete");
        let init_summary = context.init_summary.lock().take();
        let monitor = context.monitor.lock().take();
        Ok(StartupReport {
            phases: timings,
            duration,
            init_summary,
            monitor,
        })
    }
}

impl fmt::Debug for StartupOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartupOrchestrator")
            .field("phases", &self.phases.iter().map(|p| p.name.as_str()).collect::<Vec<_>>())
            .field("phase_timeout", &self.phase_timeout)
            .finish()
    }
}

async fn abort(context: &StartupContext, phase: String, error: String) -> StartupError {
    let monitor = context.monitor.lock().take();
    if let Some(monitor) = monitor {
        monitor.stop().await;
    }

    let unrecoverable = match context.container.emergency_shutdown().await {
        Ok(summary) => {
            info!(stopped = summary.stopped.len(), "emergency shutdown after failed startup");
            false
        }
        Err(e) => {
            error!(error = %e, "emergency shutdown failed");
            true
        }
    };
    StartupError {
        phase,
        error,
        unrecoverable,
    }
}
