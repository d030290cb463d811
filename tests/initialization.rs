use async_trait::async_trait;
use ferrous_lifecycle::{
    BoxError, ContainerConfig, LifecycleError, LifecycleEvent, RecordingObserver, Service,
    ServiceContainer, ServiceContext, ServiceOptions, ServiceStatus,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Database {
    url: String,
}
impl Service for Database {}

struct Cache;
impl Service for Cache {}

struct Api {
    db: Arc<Database>,
    cache: Option<Arc<Cache>>,
}
impl Service for Api {}

#[derive(Debug)]
struct Noop;
impl Service for Noop {}

fn ok_service(container: &ServiceContainer, name: &str, options: ServiceOptions<Noop>) {
    container
        .register_service(name, |_ctx: ServiceContext| async { Ok::<_, BoxError>(Noop) }, options)
        .unwrap();
}

fn failing_service(container: &ServiceContainer, name: &str, options: ServiceOptions<Noop>, calls: Arc<AtomicU32>) {
    container
        .register_service(
            name,
            move |_ctx: ServiceContext| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<Noop, BoxError>("connection refused".into())
                }
            },
            options,
        )
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_optional_failure_degrades_gracefully() {
    let container = ServiceContainer::new();
    container
        .register_service(
            "db",
            |_ctx: ServiceContext| async {
                Ok::<_, BoxError>(Database {
                    url: "postgres://db".to_string(),
                })
            },
            ServiceOptions::new(),
        )
        .unwrap();
    container
        .register_service(
            "cache",
            |_ctx: ServiceContext| async { Err::<Cache, BoxError>("redis unreachable".into()) },
            ServiceOptions::new().optional(),
        )
        .unwrap();
    container
        .register_service(
            "api",
            |ctx: ServiceContext| async move {
                Ok::<_, BoxError>(Api {
                    db: ctx.required("db")?,
                    cache: ctx.optional("cache"),
                })
            },
            ServiceOptions::new().depends_on(["db", "cache"]),
        )
        .unwrap();

    let summary = container.initialize(json!({})).await.unwrap();
    assert!(summary.success);
    assert_eq!(summary.services_ready, 2);
    assert_eq!(summary.services_failed, 1);
    assert!(container.is_initialized());

    assert!(container.get_service::<Cache>("cache").unwrap().is_none());
    assert!(!container.has_service("cache"));

    let api = container.get_required::<Api>("api").unwrap();
    assert_eq!(api.db.url, "postgres://db");
    assert!(api.cache.is_none());

    let cache = container.service_state("cache").unwrap();
    assert_eq!(cache.status(), ServiceStatus::Failed);
    assert_eq!(cache.attempts(), 3);
    assert_eq!(cache.error(), Some("redis unreachable"));
    assert!(cache.failed_at().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_required_failure_aborts_initialization() {
    let container = ServiceContainer::new();
    let stopped = Arc::new(AtomicBool::new(false));
    let stopped_flag = stopped.clone();
    ok_service(
        &container,
        "db",
        ServiceOptions::new().shutdown_handler(move |_db: Arc<Noop>| {
            let stopped = stopped_flag.clone();
            async move {
                stopped.store(true, Ordering::SeqCst);
                Ok(())
            }
        }),
    );
    let calls = Arc::new(AtomicU32::new(0));
    failing_service(
        &container,
        "paymentGateway",
        ServiceOptions::new()
            .depends_on(["db"])
            .retry_attempts(2)
            .retry_delay(Duration::from_secs(1)),
        calls.clone(),
    );

    let started = Instant::now();
    let err = container.initialize(json!({})).await.unwrap_err();
    let elapsed = started.elapsed();

    match &err {
        LifecycleError::ServiceFailed { service, error } => {
            assert_eq!(service, "paymentGateway");
            assert_eq!(error, "connection refused");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(elapsed >= Duration::from_secs(1), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "elapsed {elapsed:?}");

    assert!(!container.is_initialized());
    assert_eq!(container.service_status("paymentGateway"), Some(ServiceStatus::Failed));
    assert_eq!(container.service_status("db"), Some(ServiceStatus::Stopped));
    assert!(stopped.load(Ordering::SeqCst));
    assert!(container
        .service_names()
        .iter()
        .all(|name| container.service_status(name) != Some(ServiceStatus::Ready)));
}

#[tokio::test(start_paused = true)]
async fn test_required_failure_aborts_in_flight_services() {
    let container = ServiceContainer::new();
    container
        .register_service(
            "slow",
            |_ctx: ServiceContext| async {
                tokio::time::sleep(Duration::from_secs(20)).await;
                Ok::<_, BoxError>(Noop)
            },
            ServiceOptions::new(),
        )
        .unwrap();
    failing_service(&container, "bad", ServiceOptions::new(), Arc::new(AtomicU32::new(0)));

    let started = Instant::now();
    assert!(container.initialize(json!({})).await.is_err());
    assert!(started.elapsed() < Duration::from_secs(20));

    let slow = container.service_state("slow").unwrap();
    assert_eq!(slow.status(), ServiceStatus::Failed);
    assert_eq!(slow.error(), Some("initialization aborted"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_until_success_counts_attempts() {
    let container = ServiceContainer::new();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    container
        .register_service(
            "flaky",
            move |ctx: ServiceContext| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    assert_eq!(ctx.attempt(), n);
                    if n < 3 {
                        Err::<Noop, BoxError>(format!("attempt {n} failed").into())
                    } else {
                        Ok(Noop)
                    }
                }
            },
            ServiceOptions::new()
                .retry_attempts(3)
                .retry_delay(Duration::from_millis(100)),
        )
        .unwrap();

    let started = Instant::now();
    container.initialize(json!({})).await.unwrap();

    let state = container.service_state("flaky").unwrap();
    assert_eq!(state.status(), ServiceStatus::Ready);
    assert_eq!(state.attempts(), 3);
    assert!(state.error().is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // 100ms after the first attempt, 200ms after the second
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_factory_timeout_counts_as_attempt() {
    let container = ServiceContainer::new();
    let (cancelled_tx, cancelled_rx) = tokio::sync::oneshot::channel::<()>();
    let cancelled_tx = Arc::new(Mutex::new(Some(cancelled_tx)));
    container
        .register_service(
            "hung",
            move |ctx: ServiceContext| {
                let cancelled_tx = cancelled_tx.clone();
                async move {
                    let token = ctx.cancellation_token().clone();
                    tokio::spawn(async move {
                        token.cancelled().await;
                        if let Some(tx) = cancelled_tx.lock().take() {
                            let _ = tx.send(());
                        }
                    });
                    std::future::pending::<()>().await;
                    Ok::<_, BoxError>(Noop)
                }
            },
            ServiceOptions::new()
                .optional()
                .retry_attempts(1)
                .timeout(Duration::from_millis(100)),
        )
        .unwrap();

    let started = Instant::now();
    container.initialize(json!({})).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(100));

    let state = container.service_state("hung").unwrap();
    assert_eq!(state.status(), ServiceStatus::Failed);
    assert_eq!(state.attempts(), 1);
    assert_eq!(
        state.error(),
        Some("Service 'hung' initialization timeout after 100ms")
    );

    tokio::time::timeout(Duration::from_secs(1), cancelled_rx)
        .await
        .expect("factory token was not cancelled")
        .unwrap();
}

struct SlowStart;

#[async_trait]
impl Service for SlowStart {
    async fn initialize(&self) -> Result<(), BoxError> {
        tokio::time::sleep(Duration::from_millis(80)).await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout_covers_initialize_hook() {
    let container = ServiceContainer::new();
    container
        .register_service(
            "slow-start",
            |_ctx: ServiceContext| async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Ok::<_, BoxError>(SlowStart)
            },
            ServiceOptions::new()
                .optional()
                .retry_attempts(1)
                .timeout(Duration::from_millis(100)),
        )
        .unwrap();

    container.initialize(json!({})).await.unwrap();
    let state = container.service_state("slow-start").unwrap();
    assert_eq!(state.status(), ServiceStatus::Failed);
    assert!(state.error().unwrap().contains("timeout after 100ms"));
}

struct BrokenHook;

#[async_trait]
impl Service for BrokenHook {
    async fn initialize(&self) -> Result<(), BoxError> {
        Err("migrations pending".into())
    }
}

#[tokio::test(start_paused = true)]
async fn test_initialize_hook_failure_is_retried() {
    let container = ServiceContainer::new();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    container
        .register_service(
            "hooked",
            move |_ctx: ServiceContext| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, BoxError>(BrokenHook) }
            },
            ServiceOptions::new().optional().retry_attempts(2),
        )
        .unwrap();

    container.initialize(json!({})).await.unwrap();
    let state = container.service_state("hooked").unwrap();
    assert_eq!(state.status(), ServiceStatus::Failed);
    assert_eq!(state.attempts(), 2);
    assert_eq!(state.error(), Some("initialize failed: migrations pending"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_factory_panic_is_an_attempt_failure() {
    let container = ServiceContainer::new();
    container
        .register_service(
            "panicky",
            |_ctx: ServiceContext| async {
                if true {
                    panic!("boom");
                }
                Ok::<_, BoxError>(Noop)
            },
            ServiceOptions::new().optional().retry_attempts(1),
        )
        .unwrap();
    ok_service(&container, "healthy", ServiceOptions::new());

    container.initialize(json!({})).await.unwrap();
    let state = container.service_state("panicky").unwrap();
    assert_eq!(state.status(), ServiceStatus::Failed);
    assert_eq!(state.error(), Some("factory panicked: boom"));
    assert!(container.has_service("healthy"));
}

#[tokio::test]
async fn test_concurrent_initialize_runs_factories_once() {
    let container = ServiceContainer::new();
    let calls = Arc::new(AtomicU32::new(0));
    for name in ["a", "b", "c"] {
        let counter = calls.clone();
        container
            .register_service(
                name,
                move |_ctx: ServiceContext| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok::<_, BoxError>(Noop)
                    }
                },
                ServiceOptions::new(),
            )
            .unwrap();
    }

    let (first, second) = tokio::join!(
        container.initialize(json!({})),
        container.initialize(json!({ "ignored": true }))
    );
    assert_eq!(first.unwrap().services_ready, 3);
    assert_eq!(second.unwrap().services_ready, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let again = container.initialize(json!({})).await.unwrap();
    assert_eq!(again.services_ready, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_independent_services_all_ready() {
    let container = ServiceContainer::new();
    for name in ["pdf", "email", "sms"] {
        ok_service(&container, name, ServiceOptions::new());
    }

    let summary = container.initialize(json!({})).await.unwrap();
    assert_eq!(summary.services_ready, 3);
    assert_eq!(summary.services_failed, 0);
    assert_eq!(summary.order.len(), 3);
    for name in ["pdf", "email", "sms"] {
        assert_eq!(container.service_status(name), Some(ServiceStatus::Ready));
    }
}

#[tokio::test(start_paused = true)]
async fn test_dependents_wait_for_dependencies() {
    let container = ServiceContainer::new();
    let events = Arc::new(Mutex::new(Vec::new()));

    let log = events.clone();
    container
        .register_service(
            "db",
            move |_ctx: ServiceContext| {
                let log = log.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    log.lock().push("db");
                    Ok::<_, BoxError>(Noop)
                }
            },
            ServiceOptions::new(),
        )
        .unwrap();
    let log = events.clone();
    container
        .register_service(
            "permits",
            move |ctx: ServiceContext| {
                let log = log.clone();
                async move {
                    let _db: Arc<Noop> = ctx.required("db")?;
                    log.lock().push("permits");
                    Ok::<_, BoxError>(Noop)
                }
            },
            ServiceOptions::new().depends_on(["db"]),
        )
        .unwrap();
    let log = events.clone();
    container
        .register_service(
            "unrelated",
            move |_ctx: ServiceContext| {
                let log = log.clone();
                async move {
                    log.lock().push("unrelated");
                    Ok::<_, BoxError>(Noop)
                }
            },
            ServiceOptions::new(),
        )
        .unwrap();

    container.initialize(json!({})).await.unwrap();
    let events = events.lock().clone();
    let pos = |name: &str| events.iter().position(|e| *e == name).unwrap();
    assert!(pos("db") < pos("permits"));
    // not held back by the slow db
    assert!(pos("unrelated") < pos("db"));
}

#[tokio::test(start_paused = true)]
async fn test_dependency_wait_is_bounded() {
    let container = ServiceContainer::with_config(ContainerConfig {
        dependency_wait_timeout: Duration::from_secs(1),
        ..ContainerConfig::default()
    });
    container
        .register_service(
            "slow",
            |_ctx: ServiceContext| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, BoxError>(Noop)
            },
            ServiceOptions::new().optional(),
        )
        .unwrap();
    ok_service(
        &container,
        "impatient",
        ServiceOptions::new().optional().depends_on(["slow"]),
    );

    container.initialize(json!({})).await.unwrap();
    assert_eq!(container.service_status("slow"), Some(ServiceStatus::Ready));
    let impatient = container.service_state("impatient").unwrap();
    assert_eq!(impatient.status(), ServiceStatus::Failed);
    assert_eq!(impatient.attempts(), 0);
    assert_eq!(
        impatient.error(),
        Some("timed out after 1000ms waiting for dependency 'slow'")
    );
}

#[tokio::test]
async fn test_unregistered_dependency_fails_the_dependent() {
    let container = ServiceContainer::new();
    ok_service(&container, "api", ServiceOptions::new().depends_on(["metrics"]));

    let err = container.initialize(json!({})).await.unwrap_err();
    match err {
        LifecycleError::ServiceFailed { service, error } => {
            assert_eq!(service, "api");
            assert!(error.contains("'metrics'"), "{error}");
            assert!(error.contains("not registered"), "{error}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[derive(Deserialize)]
struct PoolConfig {
    url: String,
    pool: u32,
}

#[tokio::test]
async fn test_config_slices() {
    let container = ServiceContainer::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let log = seen.clone();
    container
        .register_service(
            "db",
            move |ctx: ServiceContext| {
                let log = log.clone();
                async move {
                    let config: PoolConfig = ctx.config_as()?;
                    log.lock().push(format!("{}:{}", config.url, config.pool));
                    Ok::<_, BoxError>(Noop)
                }
            },
            ServiceOptions::new().config_key("storage.database"),
        )
        .unwrap();
    let log = seen.clone();
    container
        .register_service(
            "misc",
            move |ctx: ServiceContext| {
                let log = log.clone();
                async move {
                    log.lock().push(ctx.config()["app"].as_str().unwrap_or("none").to_string());
                    Ok::<_, BoxError>(Noop)
                }
            },
            ServiceOptions::new().config_key("not.there"),
        )
        .unwrap();

    let config = json!({
        "app": "permits",
        "storage": { "database": { "url": "postgres://db", "pool": 8 } }
    });
    container.initialize(config.clone()).await.unwrap();

    let mut seen = seen.lock().clone();
    seen.sort();
    assert_eq!(seen, vec!["permits".to_string(), "postgres://db:8".to_string()]);
    assert_eq!(*container.config_snapshot().unwrap(), config);
}

#[tokio::test]
async fn test_resolve_dependencies_after_initialize() {
    let container = ServiceContainer::new();
    ok_service(&container, "db", ServiceOptions::new());
    failing_service(&container, "cache", ServiceOptions::new().optional().retry_attempts(1), Arc::new(AtomicU32::new(0)));
    ok_service(&container, "api", ServiceOptions::new().depends_on(["db", "cache"]));
    container.initialize(json!({})).await.unwrap();

    let deps = container.resolve_dependencies("api").unwrap();
    assert_eq!(deps.len(), 2);
    assert!(deps.is_available("db"));
    assert!(!deps.is_available("cache"));
    assert!(deps.optional::<Noop>("cache").is_none());
    assert!(deps.required::<Noop>("db").is_ok());
}

#[tokio::test]
async fn test_lookup_errors() {
    let container = ServiceContainer::new();
    ok_service(&container, "db", ServiceOptions::new());
    container.initialize(json!({})).await.unwrap();

    assert_eq!(
        container.get_service::<Noop>("nope").unwrap_err(),
        LifecycleError::NotFound("nope".to_string())
    );
    assert!(matches!(
        container.get_service::<Database>("db").unwrap_err(),
        LifecycleError::TypeMismatch { .. }
    ));
    assert!(container.get_service::<Noop>("db").unwrap().is_some());
    assert!(container.get_service_dyn("db").unwrap().is_some());
}

#[tokio::test]
async fn test_failed_initialize_is_cached_until_reset() {
    let container = ServiceContainer::new();
    let calls = Arc::new(AtomicU32::new(0));
    failing_service(&container, "bad", ServiceOptions::new(), calls.clone());

    let first = container.initialize(json!({})).await.unwrap_err();
    let second = container.initialize(json!({})).await.unwrap_err();
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    container.reset();
    ok_service(&container, "good", ServiceOptions::new());
    let summary = container.initialize(json!({})).await.unwrap();
    assert_eq!(summary.services_ready, 1);
}

#[tokio::test(start_paused = true)]
async fn test_observer_sees_transitions() {
    let container = ServiceContainer::new();
    let recorder = Arc::new(RecordingObserver::new());
    container.add_observer(recorder.clone());

    let calls = Arc::new(AtomicU32::new(0));
    failing_service(
        &container,
        "cache",
        ServiceOptions::new().optional().retry_attempts(2),
        calls,
    );
    ok_service(&container, "db", ServiceOptions::new());
    container.initialize(json!({})).await.unwrap();

    let events = recorder.events();
    assert!(events.contains(&LifecycleEvent::Initializing("cache".to_string())));
    assert!(events.contains(&LifecycleEvent::AttemptFailed {
        name: "cache".to_string(),
        attempt: 1,
        will_retry: true,
    }));
    assert!(events.contains(&LifecycleEvent::AttemptFailed {
        name: "cache".to_string(),
        attempt: 2,
        will_retry: false,
    }));
    assert!(events.contains(&LifecycleEvent::Failed {
        name: "cache".to_string(),
        optional: true,
    }));
    assert!(events.contains(&LifecycleEvent::Ready {
        name: "db".to_string(),
        attempts: 1,
    }));
}

#[tokio::test]
async fn test_unbounded_timeouts_do_not_overflow() {
    let container = ServiceContainer::with_config(ContainerConfig {
        dependency_wait_timeout: Duration::MAX,
        ..ContainerConfig::default()
    });
    container
        .register_service(
            "db",
            |_ctx: ServiceContext| async { Ok::<_, BoxError>(Noop) },
            ServiceOptions::new().timeout(Duration::MAX),
        )
        .unwrap();
    container
        .register_service(
            "api",
            |ctx: ServiceContext| async move {
                ctx.required::<Noop>("db")?;
                Ok::<_, BoxError>(Noop)
            },
            ServiceOptions::new()
                .depends_on(["db"])
                .timeout(Duration::MAX)
                .retry_delay(Duration::MAX),
        )
        .unwrap();

    let summary = container.initialize(json!({})).await.unwrap();
    assert_eq!(summary.services_ready, 2);
    assert_eq!(container.service_status("api"), Some(ServiceStatus::Ready));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_retry_backoff() {
    let container = ServiceContainer::new();
    container
        .register_service(
            "cache",
            |_ctx: ServiceContext| async { Err::<Noop, BoxError>("redis unreachable".into()) },
            ServiceOptions::new()
                .optional()
                .retry_attempts(3)
                .retry_delay(Duration::from_secs(3600)),
        )
        .unwrap();

    let initializing = tokio::spawn({
        let container = container.clone();
        async move { container.initialize(json!({})).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(container.service_status("cache"), Some(ServiceStatus::Initializing));

    container.shutdown().await;
    let err = initializing.await.unwrap().unwrap_err();
    assert_eq!(err, LifecycleError::ShuttingDown);
    assert_eq!(container.service_status("cache"), Some(ServiceStatus::Failed));
    assert_eq!(container.service_state("cache").unwrap().attempts(), 1);
    assert!(!container.is_initialized());
}
