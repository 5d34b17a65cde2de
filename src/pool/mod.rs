//! Pool Module
//!
//! A pool owns one driver and hands out [`Item`]s bound to keys. All items
//! from one pool share its driver, clock, options, and namespace.

mod invalidation;
mod item;
mod key;

use std::sync::Arc;

use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::driver::Driver;
use crate::error::{Result, StashError};

pub use invalidation::{Invalidation, PrecomputeWindow};
pub use item::{Item, ItemOptions, ItemState};
pub use key::{CacheKey, KEY_SEPARATOR};

/// Literal root segment for stored values.
pub const DATA_ROOT: &str = "@cache";
/// Literal root segment for recompute leases.
pub const LOCK_ROOT: &str = "@sp";

// == Pool ==
/// Factory for items over a shared driver.
pub struct Pool {
    driver: Arc<dyn Driver>,
    clock: Arc<dyn Clock>,
    options: ItemOptions,
    namespace: Option<String>,
}

impl Pool {
    // == Constructor ==
    /// Creates a pool over `driver` using wall-clock time and default options.
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            clock: Arc::new(SystemClock),
            options: ItemOptions::default(),
            namespace: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_options(mut self, options: ItemOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ItemOptions {
        &self.options
    }

    // == Namespace ==
    /// Scopes every later item and `flush` to `namespace`, or removes the
    /// scope when `None`.
    ///
    /// # Errors
    /// `StashError::InvalidKey` unless the namespace is non-empty ASCII
    /// alphanumeric.
    pub fn set_namespace(&mut self, namespace: Option<&str>) -> Result<()> {
        match namespace {
            None => self.namespace = None,
            Some(ns) => {
                if ns.is_empty() || !ns.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(StashError::InvalidKey(format!(
                        "namespace must be alphanumeric: {:?}",
                        ns
                    )));
                }
                self.namespace = Some(ns.to_string());
            }
        }
        Ok(())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    // == Driver ==
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Swaps the backend. Items already handed out keep the old one.
    pub fn set_driver(&mut self, driver: Arc<dyn Driver>) {
        debug!(from = self.driver.name(), to = driver.name(), "pool driver replaced");
        self.driver = driver;
    }

    // == Items ==
    /// Item bound to `key`.
    pub fn get_item(&self, key: CacheKey) -> Item {
        let data_key = self.scoped(DATA_ROOT, key.segments());
        let lock_key = self.scoped(LOCK_ROOT, key.segments());
        Item::new(
            self.driver.clone(),
            self.clock.clone(),
            self.options.clone(),
            key,
            data_key,
            lock_key,
        )
    }

    /// Lazily builds one item per key, in order.
    pub fn get_item_iterator<'a, I>(&'a self, keys: I) -> impl Iterator<Item = Item> + 'a
    where
        I: IntoIterator<Item = CacheKey>,
        I::IntoIter: 'a,
    {
        keys.into_iter().map(move |key| self.get_item(key))
    }

    // == Maintenance ==
    /// Removes every value and lease in this pool's namespace, or the whole
    /// store when no namespace is set.
    pub fn flush(&self) -> bool {
        let flushed = match &self.namespace {
            None => self.driver.clear(None),
            Some(_) => {
                let data = self.driver.clear(Some(&self.scoped(DATA_ROOT, &[])));
                let locks = self.driver.clear(Some(&self.scoped(LOCK_ROOT, &[])));
                data && locks
            }
        };
        info!(namespace = ?self.namespace, flushed, "pool flushed");
        flushed
    }

    /// Removes expired records from the backend.
    pub fn purge(&self) -> bool {
        self.driver.purge()
    }

    fn scoped(&self, root: &str, segments: &[String]) -> Vec<String> {
        let mut scoped = Vec::with_capacity(segments.len() + 2);
        scoped.push(root.to_string());
        if let Some(ns) = &self.namespace {
            scoped.push(ns.clone());
        }
        scoped.extend(segments.iter().cloned());
        scoped
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("driver", &self.driver.name())
            .field("namespace", &self.namespace)
            .field("options", &self.options)
            .finish()
    }
}
