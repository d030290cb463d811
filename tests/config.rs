use ferrous_lifecycle::{
    BoxError, ConfigProvider, ConfigSource, ContainerConfig, EnvironmentConfigSource,
    JsonConfigSource, LifecycleError, MemoryConfigSource, Service, ServiceContainer,
    ServiceContext, ServiceOptions,
};
use serde_json::json;
use serial_test::serial;
use std::env;
use std::time::Duration;

struct EnvGuard(Vec<&'static str>);

impl EnvGuard {
    fn set(vars: &[(&'static str, &str)]) -> Self {
        for (key, value) in vars {
            env::set_var(key, value);
        }
        Self(vars.iter().map(|(key, _)| *key).collect())
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for key in &self.0 {
            env::remove_var(key);
        }
    }
}

#[test]
#[serial]
fn test_environment_source_nests_on_double_underscore() {
    let _guard = EnvGuard::set(&[
        ("LCTEST_DATABASE__URL", "postgres://env"),
        ("LCTEST_DATABASE__POOL_SIZE", "8"),
        ("LCTEST_CACHE__ENABLED", "false"),
        ("LCTEST_RATIO", "0.25"),
    ]);

    let value = EnvironmentConfigSource::with_prefix("lctest").load().unwrap();
    assert_eq!(value["database"]["url"], json!("postgres://env"));
    assert_eq!(value["database"]["pool_size"], json!(8));
    assert_eq!(value["cache"]["enabled"], json!(false));
    assert_eq!(value["ratio"], json!(0.25));
    assert!(value.get("path").is_none());
}

#[test]
#[serial]
fn test_environment_overrides_file_defaults() {
    let _guard = EnvGuard::set(&[("LCTEST_DATABASE__URL", "postgres://override")]);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.json");
    std::fs::write(
        &path,
        r#"{ "database": { "url": "postgres://file", "pool": 4 }, "cache": { "url": "redis://file" } }"#,
    )
    .unwrap();

    let mut provider = ConfigProvider::new();
    provider.add_source(Box::new(EnvironmentConfigSource::with_prefix("LCTEST")));
    provider.add_source(Box::new(JsonConfigSource::new(&path)));
    provider.reload().unwrap();

    assert_eq!(provider.get_string("database.url").unwrap(), "postgres://override");
    assert_eq!(provider.get_i64("database.pool").unwrap(), 4);
    assert_eq!(provider.get_string_or("cache.url", "none"), "redis://file");
    assert_eq!(provider.get_string_or("mail.host", "localhost"), "localhost");
}

#[test]
fn test_json_source_errors() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.json");
    assert!(matches!(
        JsonConfigSource::new(&missing).load().unwrap_err(),
        LifecycleError::Config(_)
    ));
    assert_eq!(JsonConfigSource::new(&missing).optional().load().unwrap(), json!({}));

    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{ not json").unwrap();
    let err = JsonConfigSource::new(&broken).optional().load().unwrap_err();
    assert!(err.to_string().contains("invalid JSON"));
}

#[test]
fn test_reload_failure_keeps_previous_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.json");
    std::fs::write(&path, r#"{ "version": 1 }"#).unwrap();

    let mut provider = ConfigProvider::new();
    provider.add_source(Box::new(JsonConfigSource::new(&path)));
    provider.reload().unwrap();
    assert_eq!(provider.get_i64("version").unwrap(), 1);

    std::fs::write(&path, "{").unwrap();
    assert!(provider.reload().is_err());
    assert_eq!(provider.get_i64("version").unwrap(), 1);
}

#[test]
fn test_container_config_from_provider() {
    let mut provider = ConfigProvider::new();
    provider.add_source(Box::new(MemoryConfigSource::new(json!({
        "container": {
            "default_timeout_ms": 2500,
            "shutdown_timeout_ms": 1000,
            "health_check_timeout_ms": 250,
            "default_priority": 5
        }
    }))));
    provider.reload().unwrap();

    let config = ContainerConfig::load(&provider);
    assert_eq!(config.default_timeout, Duration::from_millis(2500));
    assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    assert_eq!(config.health_check_timeout, Duration::from_millis(250));
    assert_eq!(config.default_priority, 5);
    assert_eq!(config.emergency_timeout, ContainerConfig::default().emergency_timeout);
}

struct Payments {
    key: String,
}
impl Service for Payments {}

#[tokio::test]
async fn test_provider_snapshot_reaches_services() {
    let mut provider = ConfigProvider::new();
    provider.add_source(Box::new(MemoryConfigSource::new(json!({
        "payments": { "api_key": "sk_live" }
    }))));
    let snapshot = provider.reload().unwrap();

    let container = ServiceContainer::with_config(ContainerConfig::load(&provider));
    container
        .register_service(
            "payments",
            |ctx: ServiceContext| async move {
                let key = ctx.config()["api_key"]
                    .as_str()
                    .ok_or("api_key missing")?
                    .to_string();
                Ok::<_, BoxError>(Payments { key })
            },
            ServiceOptions::new().config_key("payments"),
        )
        .unwrap();
    container.initialize(snapshot).await.unwrap();

    let payments = container.get_required::<Payments>("payments").unwrap();
    assert_eq!(payments.key, "sk_live");
    assert_eq!(container.config_snapshot().unwrap()["payments"]["api_key"], "sk_live");
}
