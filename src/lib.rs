//! Stash - A pluggable persistent cache engine
//!
//! Drivers store expiring records behind one contract; pools hand out items
//! that add hierarchical keys and stampede protection on top.

pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod pool;
pub mod tasks;
pub mod value;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::StashConfig;
pub use driver::{Driver, DriverRegistry, Record};
pub use error::{Result, StashError};
pub use pool::{CacheKey, Invalidation, Item, ItemOptions, ItemState, Pool};
pub use tasks::spawn_purge_task;
pub use value::Value;
