//! Driver Registry
//!
//! Name to backend lookup. Each entry pairs a factory with the backend's
//! static availability probe, so callers can list what works on this host
//! before building anything. A registry is an ordinary value: build one at
//! startup and pass it where it is needed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::StashConfig;
use crate::driver::{BlackHole, Driver, Ephemeral, FileSystem};
use crate::error::{Result, StashError};

/// Builds a ready driver from the loaded configuration.
pub type DriverFactory = fn(&StashConfig) -> Result<Arc<dyn Driver>>;

// == Driver Kind ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// Stores data itself
    Backend,
    /// Only delegates to other drivers; always listed as available
    Composite,
}

// == Driver Entry ==
#[derive(Clone, Copy)]
pub struct DriverEntry {
    pub kind: DriverKind,
    pub is_available: fn() -> bool,
    pub build: DriverFactory,
}

impl DriverEntry {
    /// Backend entry for a driver type, probed through its own `is_available`.
    pub fn backend<D: Driver + 'static>(build: DriverFactory) -> Self {
        Self {
            kind: DriverKind::Backend,
            is_available: D::is_available,
            build,
        }
    }
}

impl fmt::Debug for DriverEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverEntry")
            .field("kind", &self.kind)
            .field("available", &(self.is_available)())
            .finish()
    }
}

// == Driver Registry ==
#[derive(Debug, Default, Clone)]
pub struct DriverRegistry {
    entries: BTreeMap<String, DriverEntry>,
}

impl DriverRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the FileSystem, Ephemeral, and BlackHole backends.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("FileSystem", DriverEntry::backend::<FileSystem>(build_filesystem));
        registry.register("Ephemeral", DriverEntry::backend::<Ephemeral>(build_ephemeral));
        registry.register("BlackHole", DriverEntry::backend::<BlackHole>(build_black_hole));
        registry
    }

    /// Adds `entry` under `name`, replacing any earlier entry with that name.
    pub fn register(&mut self, name: impl Into<String>, entry: DriverEntry) {
        let name = name.into();
        if self.entries.insert(name.clone(), entry).is_some() {
            debug!(driver = %name, "driver registration replaced");
        }
    }

    pub fn resolve(&self, name: &str) -> Option<&DriverEntry> {
        self.entries.get(name)
    }

    /// Names of the drivers usable on this host, in name order.
    pub fn list_available(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.kind == DriverKind::Composite || (entry.is_available)())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Builds the driver registered under `name`.
    ///
    /// # Errors
    /// `StashError::Configuration` when the name is unknown or the backend
    /// is unavailable here, or whatever the factory reports.
    pub fn build(&self, name: &str, config: &StashConfig) -> Result<Arc<dyn Driver>> {
        let entry = self
            .resolve(name)
            .ok_or_else(|| StashError::Configuration(format!("unknown driver: {}", name)))?;

        if entry.kind == DriverKind::Backend && !(entry.is_available)() {
            return Err(StashError::Configuration(format!(
                "driver unavailable on this host: {}",
                name
            )));
        }

        (entry.build)(config)
    }
}

fn build_filesystem(config: &StashConfig) -> Result<Arc<dyn Driver>> {
    Ok(Arc::new(FileSystem::new(config.filesystem_options())?))
}

fn build_ephemeral(config: &StashConfig) -> Result<Arc<dyn Driver>> {
    Ok(Arc::new(Ephemeral::with_capacity(config.max_items)))
}

fn build_black_hole(_config: &StashConfig) -> Result<Arc<dyn Driver>> {
    Ok(Arc::new(BlackHole))
}
