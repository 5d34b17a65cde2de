//! Configuration Module
//!
//! Handles loading cache configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::driver::FileSystemOptions;
use crate::pool::ItemOptions;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct StashConfig {
    /// Registry name of the driver to build
    pub driver: String,
    /// FileSystem storage root
    pub path: PathBuf,
    /// Mode bits for record files
    pub file_permissions: u32,
    /// Mode bits for created directories
    pub dir_permissions: u32,
    /// Directory levels per hashed key segment
    pub dir_split: usize,
    /// Path memo capacity, 0 disables it
    pub mem_key_limit: usize,
    /// Key hash function name
    pub key_hash: String,
    /// Ephemeral driver capacity, 0 = unbounded
    pub max_items: usize,
    /// Seconds between maintenance purges
    pub purge_interval: u64,
    /// Default value ttl in seconds
    pub default_ttl: u64,
    /// Default lease ttl in seconds
    pub lock_ttl: u64,
}

impl StashConfig {
    /// Creates a new StashConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `STASH_DRIVER` - Driver name (default: FileSystem)
    /// - `STASH_PATH` - Storage root (default: `<temp dir>/stash`)
    /// - `STASH_FILE_PERMISSIONS` - Octal file mode (default: 660)
    /// - `STASH_DIR_PERMISSIONS` - Octal directory mode (default: 770)
    /// - `STASH_DIR_SPLIT` - Directory split factor (default: 2, minimum 1)
    /// - `STASH_MEM_KEY_LIMIT` - Path memo capacity (default: 20)
    /// - `STASH_KEY_HASH` - Key hash function (default: md5)
    /// - `STASH_MAX_ITEMS` - Ephemeral capacity (default: 0)
    /// - `STASH_PURGE_INTERVAL` - Purge frequency in seconds (default: 300)
    /// - `STASH_DEFAULT_TTL` - Value ttl in seconds (default: 432000)
    /// - `STASH_LOCK_TTL` - Lease ttl in seconds (default: 30)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            driver: env::var("STASH_DRIVER").unwrap_or(defaults.driver),
            path: env::var("STASH_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            file_permissions: env::var("STASH_FILE_PERMISSIONS")
                .ok()
                .and_then(|v| u32::from_str_radix(&v, 8).ok())
                .unwrap_or(defaults.file_permissions),
            dir_permissions: env::var("STASH_DIR_PERMISSIONS")
                .ok()
                .and_then(|v| u32::from_str_radix(&v, 8).ok())
                .unwrap_or(defaults.dir_permissions),
            dir_split: env::var("STASH_DIR_SPLIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.dir_split)
                .max(1),
            mem_key_limit: env::var("STASH_MEM_KEY_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.mem_key_limit),
            key_hash: env::var("STASH_KEY_HASH").unwrap_or(defaults.key_hash),
            max_items: env::var("STASH_MAX_ITEMS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_items),
            purge_interval: env::var("STASH_PURGE_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.purge_interval),
            default_ttl: env::var("STASH_DEFAULT_TTL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_ttl),
            lock_ttl: env::var("STASH_LOCK_TTL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.lock_ttl),
        }
    }

    /// FileSystem driver settings carried by this config.
    pub fn filesystem_options(&self) -> FileSystemOptions {
        FileSystemOptions {
            path: self.path.clone(),
            file_permissions: self.file_permissions,
            dir_permissions: self.dir_permissions,
            dir_split: self.dir_split,
            mem_key_limit: self.mem_key_limit,
            key_hash: self.key_hash.clone(),
        }
    }

    /// Item defaults carried by this config.
    pub fn item_options(&self) -> ItemOptions {
        ItemOptions {
            default_ttl: Duration::from_secs(self.default_ttl),
            lock_ttl: Duration::from_secs(self.lock_ttl),
            ..ItemOptions::default()
        }
    }
}

impl Default for StashConfig {
    fn default() -> Self {
        let fs = FileSystemOptions::default();
        Self {
            driver: "FileSystem".to_string(),
            path: fs.path,
            file_permissions: fs.file_permissions,
            dir_permissions: fs.dir_permissions,
            dir_split: fs.dir_split,
            mem_key_limit: fs.mem_key_limit,
            key_hash: fs.key_hash,
            max_items: 0,
            purge_interval: 300,
            default_ttl: 432_000,
            lock_ttl: 30,
        }
    }
}
