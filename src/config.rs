//! Durable key/value configuration with primary + backup file.
//!
//! The store must always be readable: a missing or corrupt primary file
//! falls back to the backup snapshot, and a double failure yields an
//! empty cache that resolves everything through accessor defaults. Typed
//! accessors never fail; coercion problems collapse into the caller's
//! default so a garbled operator edit can never take the controller down.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// A single configuration value. Untagged, so the persisted document is
/// a plain JSON object.
///
/// Variant order matters for deserialization: integers must be tried
/// before floats or every whole number would load as `Float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl Value {
    fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            Value::Str(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(i64::from(*b)),
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Str(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
        }
    }

    /// Boolean coercion recognizes `true/1/yes/on` (case-insensitive).
    /// Anything else stored under the key reads as false.
    fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(v) => *v == 1,
            Value::Float(v) => *v == 1.0,
            Value::Str(s) => {
                matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
            }
        }
    }

    pub fn render(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Str(s) => s.clone(),
        }
    }

    /// Parse `input` into the same variant as `self`. Used by the web
    /// surface so an operator edit keeps the stored type.
    pub fn coerce_like(&self, input: &str) -> Option<Value> {
        match self {
            Value::Bool(_) => match input.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Some(Value::Bool(false)),
                _ => None,
            },
            Value::Int(_) => input.trim().parse().ok().map(Value::Int),
            Value::Float(_) => input.trim().parse().ok().map(Value::Float),
            Value::Str(_) => Some(Value::Str(input.to_string())),
        }
    }
}

/// Compiled-in defaults. Seeded into the cache after load so every
/// recognized key pre-exists (the web surface rejects unknown keys) and
/// so a fresh device starts with a sane configuration.
fn default_entries() -> Vec<(&'static str, Value)> {
    vec![
        ("nominal_min_temp", Value::Float(42.0)),
        ("nominal_max_temp", Value::Float(55.0)),
        ("update_time", Value::Int(120)),
        ("relay_time", Value::Int(2000)),
        ("init_relay_time", Value::Int(2000)),
        ("interval", Value::Int(1000)),
        ("temp_sampling_interval", Value::Int(10_000)),
        ("temp_update_interval", Value::Int(5)),
        ("temp_change_high_threshold", Value::Float(1.0)),
        ("temp_change_medium_threshold", Value::Float(0.3)),
        ("update_time_high_multiplier", Value::Float(0.5)),
        ("update_time_medium_multiplier", Value::Float(0.75)),
        ("relay_time_high_multiplier", Value::Float(0.3)),
        ("relay_time_medium_multiplier", Value::Float(0.6)),
        ("current_temp", Value::Float(-127.0)),
        ("temp_last_measurement", Value::Float(0.0)),
        ("temp_last_measurement_time", Value::Int(0)),
        ("temp_change_category", Value::Str("LOW".into())),
        ("temp_increasing", Value::Bool(false)),
        ("stop_timer", Value::Int(0)),
        ("stop_timer_buffer", Value::Int(5)),
        ("boot_normal", Value::Bool(true)),
        ("delay_before_start_1", Value::Int(30)),
        ("delay_before_start_2", Value::Int(30)),
        ("safe_temp_max", Value::Float(150.0)),
        ("log_level", Value::Str("info".into())),
        ("http_port", Value::Int(8080)),
        ("relay_increase_gpio", Value::Int(14)),
        ("relay_decrease_gpio", Value::Int(15)),
        ("gpio_base_path", Value::Str("/sys/class/gpio".into())),
        ("w1_base_path", Value::Str("/sys/bus/w1/devices".into())),
        ("net_check_addr", Value::Str(String::new())),
        ("net_max_attempts", Value::Int(10)),
        ("error_log_path", Value::Str("error.log".into())),
    ]
}

#[derive(Debug)]
pub struct Config {
    path: PathBuf,
    backup_path: PathBuf,
    values: BTreeMap<String, Value>,
}

impl Config {
    /// Load the store: primary file, else backup, else empty. Never
    /// fails; a controller with no readable state still has to start.
    pub fn load(path: impl Into<PathBuf>, backup_path: impl Into<PathBuf>) -> Config {
        let path = path.into();
        let backup_path = backup_path.into();
        let values = match read_document(&path) {
            Ok(values) => values,
            Err(err) => {
                warn!("config {}: {err:#}, trying backup", path.display());
                match read_document(&backup_path) {
                    Ok(values) => values,
                    Err(err) => {
                        warn!(
                            "config backup {}: {err:#}, starting with defaults",
                            backup_path.display()
                        );
                        BTreeMap::new()
                    }
                }
            }
        };
        Config {
            path,
            backup_path,
            values,
        }
    }

    /// Insert defaults for missing keys and reset the volatile control
    /// state that must not survive a restart.
    pub fn apply_defaults(&mut self) {
        for (key, value) in default_entries() {
            self.values.entry(key.to_string()).or_insert(value);
        }
        self.set("temp_last_measurement", 0.0);
        self.set("temp_last_measurement_time", 0i64);
        self.set("temp_change_category", "LOW");
        self.set("temp_increasing", false);
        self.set("stop_timer", 0i64);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .map(Value::render)
            .unwrap_or_else(|| default.to_string())
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.values
            .get(key)
            .and_then(Value::as_int)
            .unwrap_or(default)
    }

    pub fn get_float(&self, key: &str, default: f64) -> f64 {
        self.values
            .get(key)
            .and_then(Value::as_float)
            .unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.values.get(key).map_or(default, Value::as_bool)
    }

    /// Mutate the cache only. Persistence is always explicit.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Serialize the cache to the primary file. Write failures are
    /// non-fatal: the controller keeps operating from memory.
    pub fn save(&self) {
        write_document(&self.path, &self.values);
    }

    /// Snapshot current state into the backup slot.
    pub fn create_backup(&self) {
        debug!("create_config_backup()");
        write_document(&self.backup_path, &self.values);
    }

    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.values
    }
}

fn read_document(path: &Path) -> anyhow::Result<BTreeMap<String, Value>> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_document(path: &Path, values: &BTreeMap<String, Value>) {
    let rendered = match serde_json::to_string_pretty(values) {
        Ok(rendered) => rendered,
        Err(err) => {
            warn!("config serialize failed: {err}");
            return;
        }
    };
    if let Err(err) = fs::write(path, rendered) {
        warn!("config write {} failed: {err}", path.display());
    }
}

/// Shared handle used by both the control loop and the web surface.
///
/// Every accessor takes the lock for a single read or write, so the loop
/// observes operator edits on its next read (last write wins, no
/// cross-key transactions).
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Config>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> SharedConfig {
        SharedConfig {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn load(path: impl Into<PathBuf>, backup_path: impl Into<PathBuf>) -> SharedConfig {
        let mut config = Config::load(path, backup_path);
        config.apply_defaults();
        SharedConfig::new(config)
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.inner.read().unwrap().get_str(key, default)
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.inner.read().unwrap().get_int(key, default)
    }

    pub fn get_float(&self, key: &str, default: f64) -> f64 {
        self.inner.read().unwrap().get_float(key, default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.inner.read().unwrap().get_bool(key, default)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.read().unwrap().contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().unwrap().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.inner.write().unwrap().set(key, value);
    }

    pub fn save(&self) {
        self.inner.read().unwrap().save();
    }

    pub fn create_backup(&self) {
        self.inner.read().unwrap().create_backup();
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.inner.read().unwrap().entries().clone()
    }
}
