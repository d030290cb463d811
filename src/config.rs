//! Configuration loading for the container and the services it hosts.
//!
//! `ConfigProvider` merges any number of `ConfigSource`s into one JSON
//! snapshot. That snapshot is what `ServiceContainer::initialize` receives;
//! each service gets the slice named by its `config_key`. `ContainerConfig`
//! carries the engine's own timeouts and limits, read from the `container.*`
//! keys of the same snapshot.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::definition::DEFAULT_PRIORITY;
use crate::error::{LifecycleError, LifecycleResult};
use crate::resolver::DEFAULT_MAX_DEPTH;

/// Trait for configuration sources
pub trait ConfigSource: Send + Sync + std::fmt::Debug {
    /// Full tree this source contributes.
    fn load(&self) -> LifecycleResult<Value>;

    /// Short label for logs.
    fn describe(&self) -> String;
}

/// Environment variable configuration source
///
/// With prefix `PERMITS`, the variable `PERMITS_DATABASE__POOL_SIZE=8`
/// becomes `{"database": {"pool_size": 8}}`. A double underscore separates
/// nesting levels; keys are lowercased. Values parse as integer, float or
/// boolean when they can, string otherwise.
#[derive(Debug, Default)]
pub struct EnvironmentConfigSource {
    prefix: Option<String>,
}

impl EnvironmentConfigSource {
    pub fn new() -> Self {
        Self { prefix: None }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn strip<'k>(&self, key: &'k str) -> Option<&'k str> {
        match &self.prefix {
            Some(prefix) => {
                let prefix_upper = format!("{}_", prefix.to_uppercase());
                key.strip_prefix(prefix_upper.as_str())
            }
            None => Some(key),
        }
    }
}

impl ConfigSource for EnvironmentConfigSource {
    fn load(&self) -> LifecycleResult<Value> {
        let mut root = Value::Object(Map::new());
        for (key, raw) in env::vars() {
            let Some(stripped) = self.strip(&key) else {
                continue;
            };
            if stripped.is_empty() {
                continue;
            }
            let path: Vec<String> = stripped.split("__").map(str::to_lowercase).collect();
            insert_path(&mut root, &path, parse_scalar(&raw));
        }
        Ok(root)
    }

    fn describe(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("env:{}_*", prefix.to_uppercase()),
            None => "env".to_string(),
        }
    }
}

/// JSON file configuration source
#[derive(Debug)]
pub struct JsonConfigSource {
    file_path: PathBuf,
    required: bool,
}

impl JsonConfigSource {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            required: true,
        }
    }

    /// A missing file contributes nothing instead of failing.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

impl ConfigSource for JsonConfigSource {
    fn load(&self) -> LifecycleResult<Value> {
        let Some(content) = read_source(&self.file_path, self.required)? else {
            return Ok(Value::Object(Map::new()));
        };
        serde_json::from_str(&content).map_err(|e| {
            LifecycleError::Config(format!("invalid JSON in {}: {}", self.file_path.display(), e))
        })
    }

    fn describe(&self) -> String {
        format!("file:{}", self.file_path.display())
    }
}

/// YAML file configuration source
///
/// The document is converted to the same JSON tree the other sources
/// produce.
#[derive(Debug)]
pub struct YamlConfigSource {
    file_path: PathBuf,
    required: bool,
}

impl YamlConfigSource {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

impl ConfigSource for YamlConfigSource {
    fn load(&self) -> LifecycleResult<Value> {
        let Some(content) = read_source(&self.file_path, self.required)? else {
            return Ok(Value::Object(Map::new()));
        };
        let value: Value = serde_yaml::from_str(&content).map_err(|e| {
            LifecycleError::Config(format!("invalid YAML in {}: {}", self.file_path.display(), e))
        })?;
        // An empty document parses as null.
        Ok(if value.is_null() {
            Value::Object(Map::new())
        } else {
            value
        })
    }

    fn describe(&self) -> String {
        format!("file:{}", self.file_path.display())
    }
}

fn read_source(path: &Path, required: bool) -> LifecycleResult<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => Ok(None),
        Err(e) => Err(LifecycleError::Config(format!(
            "cannot read {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Fixed in-memory tree; defaults and tests.
#[derive(Debug, Clone)]
pub struct MemoryConfigSource {
    value: Value,
}

impl MemoryConfigSource {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

impl ConfigSource for MemoryConfigSource {
    fn load(&self) -> LifecycleResult<Value> {
        Ok(self.value.clone())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Configuration provider composed of prioritized sources
///
/// Sources added first win. Objects are merged key by key; any other value
/// from a higher-priority source replaces the lower one.
///
/// # Examples
///
/// ```
/// use ferrous_lifecycle::config::{ConfigProvider, MemoryConfigSource};
/// use serde_json::json;
/// use std::time::Duration;
///
/// let mut provider = ConfigProvider::new();
/// provider.add_source(Box::new(MemoryConfigSource::new(json!({
///     "database": { "url": "postgres://prod" }
/// }))));
/// provider.add_source(Box::new(MemoryConfigSource::new(json!({
///     "database": { "url": "postgres://localhost", "pool": 4 },
///     "container": { "shutdown_timeout_ms": 10000 }
/// }))));
/// provider.reload().unwrap();
///
/// assert_eq!(provider.get_string("database.url").unwrap(), "postgres://prod");
/// assert_eq!(provider.get_i64("database.pool").unwrap(), 4);
/// assert_eq!(
///     provider.get_duration_ms_or("container.shutdown_timeout_ms", Duration::ZERO),
///     Duration::from_secs(10)
/// );
/// ```
pub struct ConfigProvider {
    sources: Vec<Box<dyn ConfigSource>>,
    snapshot: RwLock<Value>,
}

impl std::fmt::Debug for ConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigProvider")
            .field(
                "sources",
                &self.sources.iter().map(|s| s.describe()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ConfigProvider {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            snapshot: RwLock::new(Value::Object(Map::new())),
        }
    }

    /// Add a configuration source (higher priority sources should be added first)
    pub fn add_source(&mut self, source: Box<dyn ConfigSource>) {
        self.sources.push(source);
    }

    /// Re-reads every source and rebuilds the snapshot.
    pub fn reload(&self) -> LifecycleResult<Value> {
        let mut merged = Value::Object(Map::new());
        for source in self.sources.iter().rev() {
            let layer = source.load()?;
            tracing::debug!(source = %source.describe(), "loaded configuration source");
            merge(&mut merged, layer);
        }
        *self.snapshot.write() = merged.clone();
        Ok(merged)
    }

    /// The most recently loaded tree.
    pub fn snapshot(&self) -> Value {
        self.snapshot.read().clone()
    }

    /// Value at a dotted path.
    pub fn get(&self, path: &str) -> Option<Value> {
        lookup(&self.snapshot.read(), path).cloned()
    }

    pub fn get_string(&self, path: &str) -> LifecycleResult<String> {
        match self.get(path) {
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(LifecycleError::Config(format!("{} is not a string", path))),
            None => Err(LifecycleError::Config(format!("{} is not set", path))),
        }
    }

    pub fn get_string_or(&self, path: &str, default: &str) -> String {
        self.get_string(path).unwrap_or_else(|_| default.to_string())
    }

    pub fn get_i64(&self, path: &str) -> LifecycleResult<i64> {
        self.get(path)
            .ok_or_else(|| LifecycleError::Config(format!("{} is not set", path)))?
            .as_i64()
            .ok_or_else(|| LifecycleError::Config(format!("{} is not an integer", path)))
    }

    pub fn get_i64_or(&self, path: &str, default: i64) -> i64 {
        self.get_i64(path).unwrap_or(default)
    }

    pub fn get_bool_or(&self, path: &str, default: bool) -> bool {
        self.get(path).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    /// Duration stored as non-negative milliseconds.
    pub fn get_duration_ms(&self, path: &str) -> LifecycleResult<Duration> {
        let ms = self.get_i64(path)?;
        if ms < 0 {
            return Err(LifecycleError::Config(format!("{} cannot be negative", path)));
        }
        Ok(Duration::from_millis(ms as u64))
    }

    pub fn get_duration_ms_or(&self, path: &str, default: Duration) -> Duration {
        self.get_duration_ms(path).unwrap_or(default)
    }
}

impl Default for ConfigProvider {
    fn default() -> Self {
        let mut provider = Self::new();
        provider.add_source(Box::new(EnvironmentConfigSource::new()));
        provider
    }
}

/// Engine settings for `ServiceContainer`.
///
/// The dependency wait is independent of and stacked on top of each
/// service's own timeout, so a chain of `n` slow services can take up to
/// roughly `n * (timeout * attempts + backoff)` before a failure surfaces at
/// its tail. Lower `dependency_wait_timeout` to bound that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub default_timeout: Duration,
    pub default_retry_delay: Duration,
    pub dependency_wait_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub emergency_service_timeout: Duration,
    pub emergency_timeout: Duration,
    pub health_check_timeout: Duration,
    pub max_dependency_depth: usize,
    pub default_priority: i32,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            default_retry_delay: Duration::from_secs(1),
            dependency_wait_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            emergency_service_timeout: Duration::from_secs(1),
            emergency_timeout: Duration::from_secs(5),
            health_check_timeout: Duration::from_secs(5),
            max_dependency_depth: DEFAULT_MAX_DEPTH,
            default_priority: DEFAULT_PRIORITY,
        }
    }
}

impl ContainerConfig {
    /// Load configuration from a config provider
    pub fn load(config: &ConfigProvider) -> Self {
        let defaults = Self::default();
        Self {
            default_timeout: config.get_duration_ms_or("container.default_timeout_ms", defaults.default_timeout),
            default_retry_delay: config
                .get_duration_ms_or("container.default_retry_delay_ms", defaults.default_retry_delay),
            dependency_wait_timeout: config
                .get_duration_ms_or("container.dependency_wait_timeout_ms", defaults.dependency_wait_timeout),
            shutdown_timeout: config.get_duration_ms_or("container.shutdown_timeout_ms", defaults.shutdown_timeout),
            emergency_service_timeout: config
                .get_duration_ms_or("container.emergency_service_timeout_ms", defaults.emergency_service_timeout),
            emergency_timeout: config.get_duration_ms_or("container.emergency_timeout_ms", defaults.emergency_timeout),
            health_check_timeout: config
                .get_duration_ms_or("container.health_check_timeout_ms", defaults.health_check_timeout),
            max_dependency_depth: config
                .get_i64_or("container.max_dependency_depth", defaults.max_dependency_depth as i64)
                .max(1) as usize,
            default_priority: config.get_i64_or("container.default_priority", defaults.default_priority as i64)
                as i32,
        }
    }
}

/// Looks up a dotted path (`"payments.stripe"`). An empty path is the root.
pub fn lookup<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |node, segment| node.get(segment))
}

fn parse_scalar(raw: &str) -> Value {
    if let Ok(int_val) = raw.parse::<i64>() {
        Value::from(int_val)
    } else if let Ok(float_val) = raw.parse::<f64>() {
        Value::from(float_val)
    } else if let Ok(bool_val) = raw.parse::<bool>() {
        Value::Bool(bool_val)
    } else {
        Value::String(raw.to_string())
    }
}

fn insert_path(root: &mut Value, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut node = root;
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else { return };
        node = map.entry(segment.clone()).or_insert_with(|| Value::Object(Map::new()));
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        map.insert(last.clone(), value);
    }
}

/// Overlays `top` onto `base`.
fn merge(base: &mut Value, top: Value) {
    match (base, top) {
        (Value::Object(base_map), Value::Object(top_map)) => {
            for (key, value) in top_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, top) => *base = top,
    }
}
