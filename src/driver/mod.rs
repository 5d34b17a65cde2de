//! Driver Module
//!
//! The storage contract every cache backend satisfies, plus the built-in
//! backends and the registry used to pick one by name.
//!
//! # Contract
//! - `get_data` returns `None` both for "never stored" and for "backend
//!   unreadable right now"; drivers swallow their own I/O failures.
//! - `store_data` replaces a record atomically from a reader's point of view.
//! - `clear(Some(key))` removes the key and every key it prefixes.
//! - `purge` removes expired records and never touches live ones.

mod black_hole;
mod ephemeral;
mod lru;
mod registry;

pub mod filesystem;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::value::Value;

pub use black_hole::BlackHole;
pub use ephemeral::Ephemeral;
pub use filesystem::{FileSystem, FileSystemOptions, KeyHash};
pub use lru::LruTracker;
pub use registry::{DriverEntry, DriverFactory, DriverKind, DriverRegistry};

// == Public Constants ==
/// Segments starting with this marker are used verbatim as path components
/// instead of being hashed.
pub const LITERAL_MARKER: char = '@';

// == Record ==
/// A stored value together with its expiration.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub data: Value,
    pub expiration: DateTime<Utc>,
}

impl Record {
    pub fn new(data: Value, expiration: DateTime<Utc>) -> Self {
        Self { data, expiration }
    }

    /// A record is expired once `now` reaches its expiration.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }
}

// == Driver Trait ==
/// Byte-level storage backend shared by every item of a pool.
pub trait Driver: Send + Sync {
    /// Static probe: can this backend work in the running environment?
    fn is_available() -> bool
    where
        Self: Sized;

    /// Registry name of the backend.
    fn name(&self) -> &'static str;

    /// Fetches the record stored under `key`, expired or not.
    fn get_data(&self, key: &[String]) -> Option<Record>;

    /// Stores `data` under `key`.
    ///
    /// Returns `Ok(false)` when the write failed for a transient reason.
    /// `Err` is reserved for requests the backend can never satisfy, such as
    /// a path the host cannot address.
    fn store_data(&self, key: &[String], data: &Value, expiration: DateTime<Utc>) -> Result<bool>;

    /// Removes `key` and its whole subtree, or everything when `key` is `None`.
    fn clear(&self, key: Option<&[String]>) -> bool;

    /// Removes expired records.
    fn purge(&self) -> bool;
}
