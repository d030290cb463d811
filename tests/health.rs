use ferrous_lifecycle::{
    BoxError, HealthInfo, HealthMonitor, LifecycleError, LifecycleEvent, MonitorConfig,
    MIN_MONITOR_INTERVAL,
    RecordingObserver, Service, ServiceContainer, ServiceContext, ServiceOptions, ServiceStatus,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Database {
    pool: u32,
}
impl Service for Database {}

struct Cache;
impl Service for Cache {}

struct Bot;
impl Service for Bot {}

/// `cache` fails until `available` is set.
fn register_cache(container: &ServiceContainer, available: Arc<AtomicBool>) {
    container
        .register_service(
            "cache",
            move |_ctx: ServiceContext| {
                let up = available.load(Ordering::SeqCst);
                async move {
                    if up {
                        Ok(Cache)
                    } else {
                        Err::<Cache, BoxError>("redis unreachable".into())
                    }
                }
            },
            ServiceOptions::new().optional().retry_attempts(1),
        )
        .unwrap();
}

fn register_db(container: &ServiceContainer) {
    container
        .register_service(
            "db",
            |_ctx: ServiceContext| async { Ok::<_, BoxError>(Database { pool: 8 }) },
            ServiceOptions::new().health_check(|db: Arc<Database>| async move {
                Ok(HealthInfo::healthy().with_details(json!({ "pool": db.pool })))
            }),
        )
        .unwrap();
}

#[tokio::test]
async fn test_health_report_aggregates_services() {
    let container = ServiceContainer::new();
    register_db(&container);
    register_cache(&container, Arc::new(AtomicBool::new(false)));
    container.initialize(json!({})).await.unwrap();

    let report = container.get_service_health().await;
    assert!(report.is_operational());
    assert!(report.container.initialized);
    assert_eq!(report.container.total_services, 2);
    assert_eq!(report.container.ready_services, 1);
    assert_eq!(report.container.failed_services, 1);
    assert_eq!(report.container.optional_failures, 1);
    assert_eq!(report.container.critical_failures, 0);
    assert_eq!(report.failed_optional(), vec!["cache"]);

    let db = &report.services["db"];
    assert_eq!(db.status, ServiceStatus::Ready);
    assert_eq!(db.attempts, 1);
    assert!(db.initialized_at.is_some());
    assert_eq!(db.health.as_ref().unwrap().details, json!({ "pool": 8 }));

    let cache = &report.services["cache"];
    assert!(cache.optional);
    assert_eq!(cache.error.as_deref(), Some("redis unreachable"));
    assert!(cache.health.is_none());

    let body = serde_json::to_value(&report).unwrap();
    assert_eq!(body["services"]["db"]["status"], "ready");
    assert_eq!(body["services"]["cache"]["status"], "failed");
    assert_eq!(body["container"]["ready_services"], 1);
}

#[tokio::test]
async fn test_report_before_initialize() {
    let container = ServiceContainer::new();
    register_db(&container);

    let report = container.get_service_health().await;
    assert!(!report.container.initialized);
    assert_eq!(report.container.pending_services, 1);
    assert_eq!(report.container.critical_failures, 1);
    assert!(!report.is_operational());
}

#[tokio::test]
async fn test_failing_check_degrades_and_recovers() {
    let container = ServiceContainer::new();
    let recorder = Arc::new(RecordingObserver::new());
    container.add_observer(recorder.clone());

    // 0 = healthy, 1 = error, 2 = degraded
    let mode = Arc::new(AtomicU8::new(1));
    let check_mode = mode.clone();
    container
        .register_service(
            "whatsapp",
            |_ctx: ServiceContext| async { Ok::<_, BoxError>(Bot) },
            ServiceOptions::new().optional().health_check(move |_bot: Arc<Bot>| {
                let mode = check_mode.load(Ordering::SeqCst);
                async move {
                    match mode {
                        0 => Ok(HealthInfo::healthy()),
                        1 => Err::<HealthInfo, BoxError>("session expired".into()),
                        _ => Ok(HealthInfo::degraded("rate limited")),
                    }
                }
            }),
        )
        .unwrap();
    container.initialize(json!({})).await.unwrap();

    let report = container.get_service_health().await;
    let bot = &report.services["whatsapp"];
    assert_eq!(bot.status, ServiceStatus::Degraded);
    let info = bot.health.as_ref().unwrap();
    assert!(!info.healthy);
    assert_eq!(info.error.as_deref(), Some("session expired"));
    assert_eq!(report.container.degraded_services, 1);
    // degraded services stay usable
    assert!(container.has_service("whatsapp"));
    assert!(container.get_service::<Bot>("whatsapp").unwrap().is_some());

    mode.store(0, Ordering::SeqCst);
    let report = container.get_service_health().await;
    assert_eq!(report.services["whatsapp"].status, ServiceStatus::Ready);

    mode.store(2, Ordering::SeqCst);
    let report = container.get_service_health().await;
    assert_eq!(report.services["whatsapp"].status, ServiceStatus::Degraded);
    assert!(report.services["whatsapp"].health.as_ref().unwrap().healthy);

    let changes: Vec<_> = recorder
        .events()
        .into_iter()
        .filter(|e| matches!(e, LifecycleEvent::HealthChanged { .. }))
        .collect();
    assert_eq!(
        changes,
        vec![
            LifecycleEvent::HealthChanged {
                name: "whatsapp".to_string(),
                from: ServiceStatus::Ready,
                to: ServiceStatus::Degraded,
            },
            LifecycleEvent::HealthChanged {
                name: "whatsapp".to_string(),
                from: ServiceStatus::Degraded,
                to: ServiceStatus::Ready,
            },
            LifecycleEvent::HealthChanged {
                name: "whatsapp".to_string(),
                from: ServiceStatus::Ready,
                to: ServiceStatus::Degraded,
            },
        ]
    );

    // degraded services are still stopped on shutdown
    let summary = container.shutdown().await;
    assert_eq!(summary.stopped, vec!["whatsapp"]);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_and_hanging_checks() {
    let container = ServiceContainer::new();
    container
        .register_service(
            "panics",
            |_ctx: ServiceContext| async { Ok::<_, BoxError>(Bot) },
            ServiceOptions::new().health_check(|_bot: Arc<Bot>| async {
                if true {
                    panic!("probe crashed");
                }
                Ok(HealthInfo::healthy())
            }),
        )
        .unwrap();
    container
        .register_service(
            "hangs",
            |_ctx: ServiceContext| async { Ok::<_, BoxError>(Bot) },
            ServiceOptions::new().health_check(|_bot: Arc<Bot>| async {
                std::future::pending::<()>().await;
                Ok(HealthInfo::healthy())
            }),
        )
        .unwrap();
    container.initialize(json!({})).await.unwrap();

    let report = container.get_service_health().await;
    let panics = report.services["panics"].health.as_ref().unwrap();
    assert_eq!(panics.error.as_deref(), Some("health check panicked: probe crashed"));
    let hangs = report.services["hangs"].health.as_ref().unwrap();
    assert_eq!(hangs.error.as_deref(), Some("health check timed out after 5000ms"));
    assert_eq!(report.container.degraded_services, 2);
    assert!(report.is_operational());
}

#[tokio::test]
async fn test_critical_failures_after_shutdown() {
    let container = ServiceContainer::new();
    register_db(&container);
    container.initialize(json!({})).await.unwrap();
    container.shutdown().await;

    let report = container.get_service_health().await;
    assert_eq!(report.container.stopped_services, 1);
    assert_eq!(report.container.critical_failures, 1);
    assert!(!report.is_operational());
    assert!(report.services["db"].stopped_at.is_some());
}

#[tokio::test]
async fn test_restart_failed_optional_service() {
    let container = ServiceContainer::new();
    let available = Arc::new(AtomicBool::new(false));
    register_db(&container);
    register_cache(&container, available.clone());

    assert_eq!(
        container.restart_service("cache").await.unwrap_err(),
        LifecycleError::NotInitialized
    );

    container.initialize(json!({})).await.unwrap();
    assert_eq!(container.service_status("cache"), Some(ServiceStatus::Failed));

    // still failing
    assert_eq!(container.restart_service("cache").await.unwrap(), ServiceStatus::Failed);

    available.store(true, Ordering::SeqCst);
    assert_eq!(container.restart_service("cache").await.unwrap(), ServiceStatus::Ready);
    assert!(container.get_service::<Cache>("cache").unwrap().is_some());
    assert_eq!(container.service_state("cache").unwrap().attempts(), 1);

    assert!(matches!(
        container.restart_service("cache").await.unwrap_err(),
        LifecycleError::RestartNotAllowed { .. }
    ));
    assert!(matches!(
        container.restart_service("db").await.unwrap_err(),
        LifecycleError::RestartNotAllowed { ref reason, .. } if reason == "service is required"
    ));
    assert_eq!(
        container.restart_service("ghost").await.unwrap_err(),
        LifecycleError::NotFound("ghost".to_string())
    );

    container.shutdown().await;
    assert_eq!(
        container.restart_service("cache").await.unwrap_err(),
        LifecycleError::ShuttingDown
    );
}

#[tokio::test(start_paused = true)]
async fn test_monitor_restarts_failed_optional_services() {
    let container = ServiceContainer::new();
    let available = Arc::new(AtomicBool::new(false));
    register_db(&container);
    register_cache(&container, available.clone());
    container.initialize(json!({})).await.unwrap();

    available.store(true, Ordering::SeqCst);
    let monitor = HealthMonitor::start(
        container.clone(),
        MonitorConfig {
            interval: Duration::from_secs(10),
            auto_restart: true,
            max_restarts: 2,
        },
    );
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(monitor.is_running());
    assert_eq!(container.service_status("cache"), Some(ServiceStatus::Ready));
    let latest = monitor.latest().unwrap();
    assert_eq!(latest.failed_optional(), vec!["cache"]);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(monitor.latest().unwrap().failed_optional().is_empty());

    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_monitor_respects_restart_limit() {
    let container = ServiceContainer::new();
    let available = Arc::new(AtomicBool::new(false));
    register_cache(&container, available.clone());
    container.initialize(json!({})).await.unwrap();

    let monitor = HealthMonitor::start(
        container.clone(),
        MonitorConfig {
            interval: Duration::from_secs(10),
            auto_restart: true,
            max_restarts: 1,
        },
    );
    // passes at 0s and 10s; only the first may restart
    tokio::time::sleep(Duration::from_secs(15)).await;
    available.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(container.service_status("cache"), Some(ServiceStatus::Failed));
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_restart_racing_shutdown_ends_stopped() {
    let container = ServiceContainer::new();
    let available = Arc::new(AtomicBool::new(false));
    let stops = Arc::new(AtomicUsize::new(0));
    let factory_available = available.clone();
    let handler_stops = stops.clone();
    container
        .register_service(
            "cache",
            move |_ctx: ServiceContext| {
                let up = factory_available.load(Ordering::SeqCst);
                async move {
                    if !up {
                        return Err::<Cache, BoxError>("redis unreachable".into());
                    }
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(Cache)
                }
            },
            ServiceOptions::new()
                .optional()
                .retry_attempts(1)
                .shutdown_handler(move |_cache: Arc<Cache>| {
                    let stops = handler_stops.clone();
                    async move {
                        stops.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
        )
        .unwrap();
    container.initialize(json!({})).await.unwrap();
    assert_eq!(container.service_status("cache"), Some(ServiceStatus::Failed));

    available.store(true, Ordering::SeqCst);
    let restarting = tokio::spawn({
        let container = container.clone();
        async move { container.restart_service("cache").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // still initializing, so the sweep has nothing to stop
    let summary = container.shutdown().await;
    assert!(summary.stopped.is_empty());

    let status = restarting.await.unwrap().unwrap();
    assert_eq!(status, ServiceStatus::Stopped);
    assert!(!container.has_service("cache"));
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_with_zero_interval_uses_minimum() {
    let container = ServiceContainer::new();
    register_db(&container);
    container.initialize(json!({})).await.unwrap();

    let monitor = HealthMonitor::start(
        container,
        MonitorConfig {
            interval: Duration::ZERO,
            ..MonitorConfig::default()
        },
    );
    tokio::time::sleep(MIN_MONITOR_INTERVAL * 3).await;

    assert!(monitor.is_running());
    assert!(monitor.latest().unwrap().is_operational());
    monitor.stop().await;
}
