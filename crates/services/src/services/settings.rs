//! Key-value persistence for the switcher.
//!
//! Mirrors the host's saved-value API: an ordered key→value store that
//! survives restarts. Reads fall back to caller-supplied defaults and writes
//! cannot fail at this interface; implementations report their own I/O
//! problems instead of surfacing them to registry operations.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;

pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
}

/// Typed `get` with a default for missing or undecodable values.
pub fn get_or<T: DeserializeOwned>(store: &dyn SettingsStore, key: &str, default: T) -> T {
    store
        .get(key)
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or(default)
}

/// Store persisted as a single JSON object on disk, written through on every
/// `set`.
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    pub fn open(path: PathBuf) -> Self {
        let values = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                tracing::warn!(
                    "settings file {} is not valid JSON, starting fresh: {err}",
                    path.display()
                );
                BTreeMap::new()
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                tracing::warn!("failed to read settings file {}: {err}", path.display());
                BTreeMap::new()
            }
        };
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    fn values(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush(&self, values: &BTreeMap<String, Value>) {
        let serialized = match serde_json::to_string_pretty(values) {
            Ok(serialized) => serialized,
            Err(err) => {
                tracing::error!("cannot serialize settings: {err}");
                return;
            }
        };
        if let Some(parent) = self.path.parent()
            && let Err(err) = fs::create_dir_all(parent)
        {
            tracing::error!("cannot create settings directory {}: {err}", parent.display());
            return;
        }
        if let Err(err) = fs::write(&self.path, serialized) {
            tracing::error!("failed to write settings file {}: {err}", self.path.display());
        }
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        let mut values = self.values();
        values.insert(key.to_string(), value);
        self.flush(&values);
    }
}

/// In-memory store for tests and ephemeral hosts.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }
}
