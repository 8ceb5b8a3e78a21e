//! Persisted coordinator state. The store mirrors the flat key/value surface
//! the original extension platform exposes; [`Storage`] layers typed accessors
//! over it. Storage is the source of truth across coordinator restarts, while
//! in-memory state stays authoritative for a live coordinator.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use snaptrail_common::session::Session;

/// Well-known persisted keys.
pub mod keys {
    pub const SESSION_ACTIVE: &str = "sessionActive";
    pub const DEBUG_MODE: &str = "debugMode";
    pub const CURRENT_SESSION: &str = "currentSession";
    pub const SCREENSHOT_SEQUENCE: &str = "screenshotSequence";
    pub const NAVIGATION_COUNT: &str = "navigationCount";
    pub const DEBUG_LOGS: &str = "debugLogs";
}

/// The debug log ring keeps only the most recent entries.
pub const DEBUG_LOG_CAP: usize = 100;

/// Default on-disk location for the persisted state document.
pub fn default_state_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".snaptrail/state.json"))
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Flat async key/value store with JSON values.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn write(&self, key: &str, value: Value) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// Write-through store backed by a single JSON document on disk. The whole
/// map is rewritten on every mutation; coordinator state is small enough that
/// this stays cheap.
pub struct FileStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, Value>>,
}

impl FileStore {
    /// Opens the store, creating parent directories as needed and loading
    /// any existing document.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let cache = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    async fn flush(&self, entries: &HashMap<String, Value>) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(entries)?;
        tokio::fs::write(&self.path, body).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.cache.lock().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut entries = self.cache.lock().await;
        entries.insert(key.to_string(), value);
        self.flush(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.cache.lock().await;
        entries.remove(key);
        self.flush(&entries).await
    }
}

/// One entry in the persisted debug log ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugLogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Everything the coordinator rehydrates after a restart.
#[derive(Debug, Clone, Default)]
pub struct PersistedState {
    pub session_active: bool,
    pub debug_mode: bool,
    pub session: Option<Session>,
    pub sequence: u32,
    pub navigation_count: u32,
}

/// Typed facade over a [`StateStore`].
#[derive(Clone)]
pub struct Storage {
    store: Arc<dyn StateStore>,
}

impl Storage {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    async fn read_bool(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .store
            .read(key)
            .await?
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    async fn read_u32(&self, key: &str) -> Result<u32, StoreError> {
        Ok(self
            .store
            .read(key)
            .await?
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32)
    }

    pub async fn session_active(&self) -> Result<bool, StoreError> {
        self.read_bool(keys::SESSION_ACTIVE).await
    }

    pub async fn set_session_active(&self, active: bool) -> Result<(), StoreError> {
        self.store
            .write(keys::SESSION_ACTIVE, Value::Bool(active))
            .await
    }

    pub async fn debug_mode(&self) -> Result<bool, StoreError> {
        self.read_bool(keys::DEBUG_MODE).await
    }

    pub async fn set_debug_mode(&self, debug: bool) -> Result<(), StoreError> {
        self.store.write(keys::DEBUG_MODE, Value::Bool(debug)).await
    }

    pub async fn store_session(&self, session: &Session) -> Result<(), StoreError> {
        self.store
            .write(keys::CURRENT_SESSION, serde_json::to_value(session)?)
            .await
    }

    pub async fn load_session(&self) -> Result<Option<Session>, StoreError> {
        match self.store.read(keys::CURRENT_SESSION).await? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    pub async fn set_counters(&self, sequence: u32, navigation_count: u32) -> Result<(), StoreError> {
        self.store
            .write(keys::SCREENSHOT_SEQUENCE, Value::from(sequence))
            .await?;
        self.store
            .write(keys::NAVIGATION_COUNT, Value::from(navigation_count))
            .await
    }

    pub async fn counters(&self) -> Result<(u32, u32), StoreError> {
        Ok((
            self.read_u32(keys::SCREENSHOT_SEQUENCE).await?,
            self.read_u32(keys::NAVIGATION_COUNT).await?,
        ))
    }

    /// Resets every session-scoped key in one logical step. Used by session
    /// end and force-stop; the debug flag and log ring survive.
    pub async fn clear_session_state(&self) -> Result<(), StoreError> {
        self.store
            .write(keys::SESSION_ACTIVE, Value::Bool(false))
            .await?;
        self.store.write(keys::CURRENT_SESSION, Value::Null).await?;
        self.set_counters(0, 0).await
    }

    pub async fn snapshot(&self) -> Result<PersistedState, StoreError> {
        let (sequence, navigation_count) = self.counters().await?;
        Ok(PersistedState {
            session_active: self.session_active().await?,
            debug_mode: self.debug_mode().await?,
            session: self.load_session().await?,
            sequence,
            navigation_count,
        })
    }

    /// Appends to the debug log ring, dropping the oldest entries beyond
    /// [`DEBUG_LOG_CAP`].
    pub async fn append_debug_log(
        &self,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Result<(), StoreError> {
        let entry = DebugLogEntry {
            timestamp: Utc::now(),
            message: message.into(),
            data,
        };
        let mut logs = self.debug_logs().await?;
        logs.push(entry);
        if logs.len() > DEBUG_LOG_CAP {
            let excess = logs.len() - DEBUG_LOG_CAP;
            logs.drain(..excess);
        }
        self.store
            .write(keys::DEBUG_LOGS, serde_json::to_value(&logs)?)
            .await
    }

    pub async fn debug_logs(&self) -> Result<Vec<DebugLogEntry>, StoreError> {
        match self.store.read(keys::DEBUG_LOGS).await? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => Ok(serde_json::from_value(value)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips_values() {
        let storage = Storage::in_memory();
        assert!(!storage.session_active().await.unwrap());

        storage.set_session_active(true).await.unwrap();
        storage.set_counters(4, 2).await.unwrap();
        assert!(storage.session_active().await.unwrap());
        assert_eq!(storage.counters().await.unwrap(), (4, 2));
    }

    #[tokio::test]
    async fn clear_resets_session_keys_but_not_debug() {
        let storage = Storage::in_memory();
        storage.set_session_active(true).await.unwrap();
        storage.set_debug_mode(true).await.unwrap();
        storage.set_counters(9, 3).await.unwrap();
        storage
            .store_session(&Session::begin(Utc::now(), "example.com"))
            .await
            .unwrap();

        storage.clear_session_state().await.unwrap();

        assert!(!storage.session_active().await.unwrap());
        assert!(storage.debug_mode().await.unwrap());
        assert_eq!(storage.counters().await.unwrap(), (0, 0));
        assert!(storage.load_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn debug_log_ring_is_capped() {
        let storage = Storage::in_memory();
        for i in 0..(DEBUG_LOG_CAP + 5) {
            storage
                .append_debug_log(format!("entry {}", i), None)
                .await
                .unwrap();
        }
        let logs = storage.debug_logs().await.unwrap();
        assert_eq!(logs.len(), DEBUG_LOG_CAP);
        assert_eq!(logs[0].message, "entry 5");
        assert_eq!(logs.last().unwrap().message, format!("entry {}", DEBUG_LOG_CAP + 4));
    }
}
