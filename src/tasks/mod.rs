//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a pool is in use.
//!
//! # Tasks
//! - Purge: Removes expired records at configured intervals

mod purge;

pub use purge::spawn_purge_task;
