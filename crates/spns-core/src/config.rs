//! Configuration resolution for SPNS.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/spns/settings.json)
//! 3. Explicit config file (`--config` / `SPNS_CONFIG`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete SPNS configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Relay server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the management HTTP surface listens on.
    pub listen: SocketAddr,
    pub database_path: Option<PathBuf>,
    /// Dispatch queue capacity; `None` means unbounded.
    pub queue_capacity: Option<usize>,
    /// Consecutive push failures tolerated before a token is dropped.
    pub max_push_failures: u32,
    /// Maximum number of sink sends in flight.
    pub workers: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8880)),
            database_path: None,
            queue_capacity: None,
            max_push_failures: 5,
            workers: 8,
        }
    }
}

/// Which push sink drains the dispatch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Log every job and report it delivered.
    #[default]
    Log,
    /// Firebase Cloud Messaging HTTP v1.
    Fcm,
}

impl std::str::FromStr for SinkKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "log" | "dummy" => Ok(Self::Log),
            "fcm" | "firebase" => Ok(Self::Fcm),
            other => Err(Error::Config(format!("Unknown push sink '{other}'"))),
        }
    }
}

/// Push sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub sink: SinkKind,
    /// Path to the FCM service account JSON key.
    pub fcm_credentials: Option<PathBuf>,
    /// Retries after the first failed provider call.
    pub retries: u32,
    pub retry_interval_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::Log,
            fcm_credentials: None,
            retries: 1,
            retry_interval_secs: 5,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// `explicit` is a file named by the operator; unlike the global file it
/// must exist.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            merge_json(&mut merged, read_config_value(&global_path)?);
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file {} does not exist",
                path.display()
            )));
        }
        merge_json(&mut merged, read_config_value(path)?);
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("settings.json"))
}

/// Get the default database path for the relay.
pub fn database_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("relay.db"))
}

fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".spns"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/spns"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("spns"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn read_config_value(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Overlay `overlay` onto `base`: objects merge key by key, anything else
/// replaces the base value.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Apply `SPNS_*` overrides. `lookup` abstracts the environment so tests do
/// not have to mutate process state.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("SPNS_LISTEN") {
        if let Ok(addr) = val.parse() {
            config.relay.listen = addr;
        }
    }
    if let Some(val) = lookup("SPNS_DB_PATH") {
        config.relay.database_path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("SPNS_QUEUE_CAPACITY") {
        if let Ok(n) = val.parse::<usize>() {
            config.relay.queue_capacity = (n > 0).then_some(n);
        }
    }
    if let Some(val) = lookup("SPNS_MAX_PUSH_FAILURES") {
        if let Ok(n) = val.parse() {
            config.relay.max_push_failures = n;
        }
    }
    if let Some(val) = lookup("SPNS_SINK") {
        if let Ok(kind) = val.parse() {
            config.notify.sink = kind;
        }
    }
    if let Some(val) = lookup("SPNS_LOG_LEVEL") {
        config.log.level = val;
    }
}
