//! Key-value persistence capability.
//!
//! Two independent namespaces share this trait: a session-scoped store
//! (cleared when the browser session ends) and a durable store. Every
//! operation is a single round trip with last-writer-wins semantics per
//! key — there is no cross-operation locking, callers compose
//! read-modify-write themselves.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use hermes_core::HermesError;

// ─── Trait ───────────────────────────────────────────────────────────

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the requested keys. Absent keys are simply missing from the
    /// returned map.
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, HermesError>;

    /// Merge the given entries into the store (partial set).
    async fn set(&self, entries: Map<String, Value>) -> Result<(), HermesError>;

    /// Remove the given keys.
    async fn remove(&self, keys: &[&str]) -> Result<(), HermesError>;
}

// ─── Typed helpers ───────────────────────────────────────────────────

/// Read one key and deserialize it, treating absence as `None`.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, HermesError> {
    let mut map = store.get(&[key]).await?;
    match map.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| HermesError::StorageFailure(format!("corrupt value at '{key}': {e}"))),
    }
}

/// Serialize and write one key.
pub async fn set_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), HermesError> {
    let value = serde_json::to_value(value)
        .map_err(|e| HermesError::StorageFailure(format!("serialize '{key}': {e}")))?;
    let mut entries = Map::new();
    entries.insert(key.to_string(), value);
    store.set(entries).await
}

// ─── In-memory implementation ────────────────────────────────────────

/// In-memory store for tests and the simulated demo.
///
/// Counts operations so tests can assert call collapsing, and can be
/// told to reject writes to exercise the storage-failure path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
    get_calls: AtomicUsize,
    set_calls: AtomicUsize,
    reject_writes: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    /// Make subsequent `set` calls fail until switched back off.
    pub fn set_reject_writes(&self, reject: bool) {
        *self.reject_writes.lock().expect("store lock") = reject;
    }

    /// Direct snapshot of a stored value, bypassing call counters.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.values.lock().expect("store lock").get(key).cloned()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, HermesError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let values = self.values.lock().expect("store lock");
        let mut out = Map::new();
        for key in keys {
            if let Some(value) = values.get(*key) {
                out.insert((*key).to_string(), value.clone());
            }
        }
        Ok(out)
    }

    async fn set(&self, entries: Map<String, Value>) -> Result<(), HermesError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if *self.reject_writes.lock().expect("store lock") {
            return Err(HermesError::StorageFailure("write rejected".to_string()));
        }
        let mut values = self.values.lock().expect("store lock");
        for (key, value) in entries {
            values.insert(key, value);
        }
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<(), HermesError> {
        let mut values = self.values.lock().expect("store lock");
        for key in keys {
            values.remove(*key);
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
