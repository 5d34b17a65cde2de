//! Ephemeral Driver
//!
//! Process-memory driver: records live in a HashMap for the life of the
//! driver, with optional LRU eviction once a capacity is reached.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::driver::{Driver, LruTracker, Record};
use crate::error::Result;
use crate::value::Value;

// == Ephemeral Store ==
#[derive(Debug, Default)]
struct EphemeralStore {
    /// Key-record storage
    records: HashMap<Vec<String>, Record>,
    /// LRU access tracker
    lru: LruTracker<Vec<String>>,
    /// Maximum number of records, 0 = unbounded
    max_items: usize,
}

impl EphemeralStore {
    fn cleanup_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<Vec<String>> = self
            .records
            .iter()
            .filter(|(_, record)| record.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.records.remove(key);
            self.lru.remove(key);
        }

        expired.len()
    }
}

// == Ephemeral Driver ==
/// In-memory driver scoped to the current process.
#[derive(Debug, Default)]
pub struct Ephemeral {
    inner: Mutex<EphemeralStore>,
}

impl Ephemeral {
    // == Constructor ==
    /// Creates an unbounded in-memory driver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a driver holding at most `max_items` records.
    pub fn with_capacity(max_items: usize) -> Self {
        Self {
            inner: Mutex::new(EphemeralStore {
                max_items,
                ..EphemeralStore::default()
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }
}

impl Driver for Ephemeral {
    fn is_available() -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "Ephemeral"
    }

    fn get_data(&self, key: &[String]) -> Option<Record> {
        let mut store = self.inner.lock();
        let record = store.records.get(key).cloned()?;
        store.lru.touch(&key.to_vec());
        Some(record)
    }

    fn store_data(&self, key: &[String], data: &Value, expiration: DateTime<Utc>) -> Result<bool> {
        if key.is_empty() {
            return Ok(false);
        }

        let mut store = self.inner.lock();
        let key = key.to_vec();

        // If not overwriting and at capacity, evict the oldest record
        let is_overwrite = store.records.contains_key(&key);
        if !is_overwrite && store.max_items > 0 && store.records.len() >= store.max_items {
            if let Some(evicted) = store.lru.evict_oldest() {
                debug!(key = ?evicted, "evicting least recently used record");
                store.records.remove(&evicted);
            }
        }

        store
            .records
            .insert(key.clone(), Record::new(data.clone(), expiration));
        store.lru.touch(&key);
        Ok(true)
    }

    fn clear(&self, key: Option<&[String]>) -> bool {
        let mut store = self.inner.lock();

        match key {
            None | Some([]) => {
                store.records.clear();
                store.lru.clear();
            }
            Some(prefix) => {
                store.records.retain(|k, _| !k.starts_with(prefix));
                store.lru.retain(|k| !k.starts_with(prefix));
            }
        }

        true
    }

    fn purge(&self) -> bool {
        let removed = self.inner.lock().cleanup_expired(Utc::now());
        debug!(removed, "ephemeral purge complete");
        true
    }
}
