//! Permit issuance app wiring: the service registry, startup phases and
//! teardown of a small web application.
//!
//! Run with `cargo run --example permit_app --features axum-integration`.
//! Set `PERMITS_CACHE__URL` to bring the cache up; without it the cache fails
//! and the app runs degraded. Set `PERMITS_PAYMENTS__API_KEY` or startup
//! aborts with a non-zero exit code.
//!
//! Try: `curl -i http://127.0.0.1:3000/status/services`

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use ferrous_lifecycle::{
    axum_integration::status_router, BoxError, ConfigProvider, ContainerConfig,
    EnvironmentConfigSource, HealthInfo, LifecycleResult, MemoryConfigSource, MonitorConfig,
    Service, ServiceContainer, ServiceContext, ServiceModule, ServiceOptions, StartupOrchestrator,
    TracingObserver,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Deserialize)]
struct DatabaseConfig {
    url: String,
    #[serde(default = "default_pool")]
    pool: u32,
}

fn default_pool() -> u32 {
    4
}

struct Database {
    url: String,
    pool: u32,
}

#[async_trait::async_trait]
impl Service for Database {
    async fn initialize(&self) -> Result<(), BoxError> {
        info!(url = %self.url, pool = self.pool, "database pool opened");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BoxError> {
        info!("database pool closed");
        Ok(())
    }
}

struct Cache {
    url: String,
}
impl Service for Cache {}

struct Payments {
    db: Arc<Database>,
}
impl Service for Payments {}

struct PdfRenderer;
impl Service for PdfRenderer {}

impl PdfRenderer {
    fn document_name(&self, number: u64) -> String {
        format!("permit-{:06}.pdf", number)
    }
}

struct Mailer {
    sent: AtomicU64,
}
impl Service for Mailer {}

struct WhatsappBot {
    mailer: Option<Arc<Mailer>>,
}
impl Service for WhatsappBot {}

struct PermitApi {
    db: Arc<Database>,
    cache: Option<Arc<Cache>>,
    payments: Arc<Payments>,
    pdf: Arc<PdfRenderer>,
    issued: AtomicU64,
}
impl Service for PermitApi {}

/// Every service of the app.
struct PermitAppModule;

impl ServiceModule for PermitAppModule {
    fn register_services(self, container: &ServiceContainer) -> LifecycleResult<()> {
        container.register_service(
            "database",
            |ctx: ServiceContext| async move {
                let config: DatabaseConfig = ctx.config_as()?;
                Ok::<_, BoxError>(Database {
                    url: config.url,
                    pool: config.pool,
                })
            },
            ServiceOptions::new()
                .config_key("database")
                .priority(10)
                .health_check(|db: Arc<Database>| async move {
                    Ok(HealthInfo::healthy().with_details(json!({ "pool": db.pool })))
                }),
        )?;

        container.register_service(
            "cache",
            |ctx: ServiceContext| async move {
                match ctx.config()["url"].as_str() {
                    Some(url) => Ok(Cache { url: url.to_string() }),
                    None => Err::<Cache, BoxError>("cache.url is not configured".into()),
                }
            },
            ServiceOptions::new()
                .optional()
                .config_key("cache")
                .retry_delay(Duration::from_millis(200)),
        )?;

        container.register_service(
            "payments",
            |ctx: ServiceContext| async move {
                if ctx.config()["api_key"].as_str().is_none() {
                    return Err::<Payments, BoxError>("payments.api_key is not configured".into());
                }
                Ok(Payments {
                    db: ctx.required("database")?,
                })
            },
            ServiceOptions::new()
                .depends_on(["database"])
                .config_key("payments")
                .retry_attempts(2)
                .retry_delay(Duration::from_millis(500)),
        )?;

        container.register_service(
            "pdf",
            |_ctx: ServiceContext| async { Ok::<_, BoxError>(PdfRenderer) },
            ServiceOptions::new(),
        )?;

        container.register_service(
            "email",
            |_ctx: ServiceContext| async {
                Ok::<_, BoxError>(Mailer {
                    sent: AtomicU64::new(0),
                })
            },
            ServiceOptions::new()
                .optional()
                .shutdown_handler(|mailer: Arc<Mailer>| async move {
                    info!(sent = mailer.sent.load(Ordering::Relaxed), "mail queue flushed");
                    Ok(())
                }),
        )?;

        container.register_service(
            "whatsapp",
            |ctx: ServiceContext| async move {
                Ok::<_, BoxError>(WhatsappBot {
                    mailer: ctx.optional("email"),
                })
            },
            ServiceOptions::new()
                .optional()
                .depends_on(["email"])
                .timeout(Duration::from_secs(10))
                .health_check(|bot: Arc<WhatsappBot>| async move {
                    Ok(match bot.mailer {
                        Some(_) => HealthInfo::healthy(),
                        None => HealthInfo::degraded("email fallback unavailable"),
                    })
                }),
        )?;

        container.register_service(
            "api",
            |ctx: ServiceContext| async move {
                Ok::<_, BoxError>(PermitApi {
                    db: ctx.required("database")?,
                    cache: ctx.optional("cache"),
                    payments: ctx.required("payments")?,
                    pdf: ctx.required("pdf")?,
                    issued: AtomicU64::new(0),
                })
            },
            ServiceOptions::new().depends_on(["database", "cache", "payments", "pdf"]),
        )?;

        Ok(())
    }
}

async fn issue_permit(State(container): State<ServiceContainer>) -> Result<Json<serde_json::Value>, StatusCode> {
    let api = container
        .get_required::<PermitApi>("api")
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    let number = api.issued.fetch_add(1, Ordering::SeqCst) + 1;
    Ok(Json(json!({
        "permit": number,
        "document": api.pdf.document_name(number),
        "database": api.db.url,
        "payments_database": api.payments.db.url,
        "cached": api.cache.as_ref().map(|c| c.url.clone()),
    })))
}

fn config_provider() -> ConfigProvider {
    let mut provider = ConfigProvider::new();
    provider.add_source(Box::new(EnvironmentConfigSource::with_prefix("PERMITS")));
    provider.add_source(Box::new(MemoryConfigSource::new(json!({
        "database": { "url": "postgres://localhost/permits" },
        "container": { "shutdown_timeout_ms": 10000 }
    }))));
    provider
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let provider = config_provider();
    if let Err(e) = provider.reload() {
        eprintln!("configuration error: {}", e);
        std::process::exit(1);
    }
    let container = ServiceContainer::with_config(ContainerConfig::load(&provider));
    container.add_observer(Arc::new(TracingObserver));
    if let Err(e) = container.add_module(PermitAppModule) {
        eprintln!("registration error: {}", e);
        std::process::exit(1);
    }

    let stop = CancellationToken::new();
    let server_stop = stop.clone();
    let outcome = StartupOrchestrator::new(container.clone())
        .phase_timeout(Duration::from_secs(120))
        .load_config(provider)
        .initialize_container()
        .attach_health_monitor(MonitorConfig {
            interval: Duration::from_secs(15),
            auto_restart: true,
            ..MonitorConfig::default()
        })
        .phase("http", move |ctx| async move {
            let app = Router::new()
                .route("/permits", get(issue_permit))
                .with_state(ctx.container().clone())
                .merge(status_router(ctx.container().clone()));
            let listener = TcpListener::bind("127.0.0.1:3000").await?;
            info!(addr = %listener.local_addr()?, "listening");
            tokio::spawn(async move {
                let served = axum::serve(listener, app)
                    .with_graceful_shutdown(async move { server_stop.cancelled().await })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "server error");
                }
            });
            Ok::<(), BoxError>(())
        })
        .run()
        .await;

    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(e.exit_code());
        }
    };
    for phase in &report.phases {
        info!(phase = %phase.name, duration_ms = phase.duration.as_millis() as u64, "startup phase");
    }

    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
    stop.cancel();
    if let Some(monitor) = report.monitor {
        monitor.stop().await;
    }
    let summary = container.shutdown().await;
    if !summary.is_clean() {
        std::process::exit(1);
    }
}
