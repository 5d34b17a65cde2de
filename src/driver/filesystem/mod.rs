//! FileSystem Driver
//!
//! Stores one record file per key under a storage root, laid out by
//! [`KeyPathDeriver`] and encoded with the binary record codec.
//!
//! Writes go to a temporary sibling that is renamed over the record, so a
//! reader sees either the old content, the new content, or no file at all.

pub mod codec;
mod path;

#[cfg(test)]
mod property_tests;

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::driver::{Driver, Record};
use crate::error::{Result, StashError};
use crate::value::Value;

pub use path::{KeyHash, KeyPathDeriver, RECORD_EXTENSION};

// == Public Constants ==
/// Longest record path the host can address, in bytes.
#[cfg(windows)]
pub const MAX_PATH_LENGTH: usize = 259;
/// Longest record path the host can address, in bytes.
#[cfg(not(windows))]
pub const MAX_PATH_LENGTH: usize = 4095;

const TEMP_PREFIX: &str = ".stash-";
const TEMP_SUFFIX: &str = ".tmp";
const TEMP_RANDOM_LEN: usize = 6;

/// A purge can empty and remove a directory between our mkdir and our write.
const WRITE_ATTEMPTS: usize = 3;

// == Options ==
/// Construction settings for [`FileSystem`].
#[derive(Debug, Clone, PartialEq)]
pub struct FileSystemOptions {
    /// Storage root
    pub path: PathBuf,
    /// Mode bits for record files (unix only)
    pub file_permissions: u32,
    /// Mode bits for created directories (unix only)
    pub dir_permissions: u32,
    /// Directory levels per hashed key segment
    pub dir_split: usize,
    /// Capacity of the key -> path memo, 0 disables it
    pub mem_key_limit: usize,
    /// Name of the key hash function
    pub key_hash: String,
}

impl Default for FileSystemOptions {
    fn default() -> Self {
        Self {
            path: std::env::temp_dir().join("stash"),
            file_permissions: 0o660,
            dir_permissions: 0o770,
            dir_split: 2,
            mem_key_limit: 20,
            key_hash: "md5".to_string(),
        }
    }
}

impl FileSystemOptions {
    /// Options rooted at `path`, everything else default.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

// == FileSystem Driver ==
/// Filesystem-backed driver.
#[derive(Debug)]
pub struct FileSystem {
    paths: KeyPathDeriver,
    file_permissions: u32,
    dir_permissions: u32,
}

impl FileSystem {
    // == Constructor ==
    /// Creates the driver, creating the storage root if needed.
    ///
    /// # Errors
    /// `StashError::Configuration` when the hash function is unknown or the
    /// root is not a writable directory.
    pub fn new(options: FileSystemOptions) -> Result<Self> {
        let hash = KeyHash::from_name(&options.key_hash)?;
        Self::with_key_hash(options, hash)
    }

    /// Same as [`FileSystem::new`] with an explicit hash function.
    pub fn with_key_hash(options: FileSystemOptions, hash: KeyHash) -> Result<Self> {
        check_root(&options.path, options.dir_permissions)?;

        debug!(
            root = %options.path.display(),
            dir_split = options.dir_split,
            mem_key_limit = options.mem_key_limit,
            "filesystem driver ready"
        );

        Ok(Self {
            paths: KeyPathDeriver::new(
                options.path,
                options.dir_split,
                hash,
                options.mem_key_limit,
            ),
            file_permissions: options.file_permissions,
            dir_permissions: options.dir_permissions,
        })
    }

    pub fn root(&self) -> &Path {
        self.paths.root()
    }

    /// Where the record for `key` lives.
    pub fn record_path(&self, key: &[String]) -> PathBuf {
        self.paths.record_path(key)
    }

    // == Write ==
    fn write_record(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut attempt = 1;
        loop {
            match self.try_write_record(path, bytes) {
                Err(e) if e.kind() == io::ErrorKind::NotFound && attempt < WRITE_ATTEMPTS => {
                    debug!(path = %path.display(), attempt, "record directory vanished, retrying write");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn try_write_record(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let parent = path.parent().unwrap_or_else(|| self.root());
        create_dir_all(parent, self.dir_permissions)?;

        // Writers racing on the same record queue up on its current inode.
        let existing = match File::open(path) {
            Ok(file) => {
                file.lock_exclusive()?;
                Some(file)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .rand_bytes(TEMP_RANDOM_LEN)
            .tempfile_in(parent)?;
        tmp.write_all(bytes)?;
        set_mode(tmp.path(), self.file_permissions)?;
        tmp.persist(path).map_err(|e| e.error)?;

        if let Some(file) = existing {
            FileExt::unlock(&file)?;
        }
        Ok(())
    }

    // == Clear ==
    fn clear_all(&self) -> bool {
        let root = self.root();
        let removed = match fs::remove_dir_all(root) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "failed to clear storage root");
                false
            }
        };

        match create_dir_all(root, self.dir_permissions) {
            Ok(()) => removed,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "failed to recreate storage root");
                false
            }
        }
    }

    fn clear_key(&self, key: &[String]) -> bool {
        let record = self.paths.record_path(key);
        let subtree = self.paths.subtree_path(key);
        let mut ok = true;

        if let Err(e) = fs::remove_file(&record) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %record.display(), error = %e, "failed to remove record");
                ok = false;
            }
        }

        if let Err(e) = fs::remove_dir_all(&subtree) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %subtree.display(), error = %e, "failed to remove subtree");
                ok = false;
            }
        }

        ok
    }
}

impl Driver for FileSystem {
    /// The driver of last resort: a filesystem is always there.
    fn is_available() -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "FileSystem"
    }

    fn get_data(&self, key: &[String]) -> Option<Record> {
        if key.is_empty() {
            return None;
        }
        read_record(&self.paths.record_path(key))
    }

    fn store_data(&self, key: &[String], data: &Value, expiration: DateTime<Utc>) -> Result<bool> {
        if key.is_empty() {
            debug!("refusing to store a record at the storage root");
            return Ok(false);
        }

        let path = self.paths.record_path(key);
        if path.as_os_str().len().max(temp_path_len(&path)) > MAX_PATH_LENGTH {
            return Err(StashError::PathTooLong {
                path,
                limit: MAX_PATH_LENGTH,
            });
        }

        let bytes = codec::encode(data, expiration);
        match self.write_record(&path, &bytes) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to store record");
                Ok(false)
            }
        }
    }

    fn clear(&self, key: Option<&[String]>) -> bool {
        match key {
            None | Some([]) => self.clear_all(),
            Some(key) => self.clear_key(key),
        }
    }

    fn purge(&self) -> bool {
        let now = Utc::now();
        let mut removed = 0usize;
        let mut ok = true;

        // Children are visited before their parent so emptied directories go too.
        for entry in WalkDir::new(self.root()).min_depth(1).contents_first(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // Usually a concurrent clear removed it first.
                    debug!(error = %e, "skipping vanished entry during purge");
                    continue;
                }
            };
            let path = entry.path();

            if entry.file_type().is_dir() {
                remove_if_empty(path);
                continue;
            }

            if !is_record(path) {
                continue;
            }

            match purge_record(path, now) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to purge record");
                    ok = false;
                }
            }
        }

        info!(removed, root = %self.root().display(), "purge complete");
        ok
    }
}

// == Helpers ==
/// Verifies the storage root, creating it when absent.
fn check_root(root: &Path, dir_permissions: u32) -> Result<()> {
    if root.exists() && !root.is_dir() {
        return Err(StashError::Configuration(format!(
            "Cache path is not a directory: {}",
            root.display()
        )));
    }

    if !root.is_dir() {
        create_dir_all(root, dir_permissions).map_err(|e| {
            StashError::Configuration(format!(
                "Failed to create cache path {}: {}",
                root.display(),
                e
            ))
        })?;
    }

    tempfile::tempfile_in(root).map_err(|e| {
        StashError::Configuration(format!(
            "Cache path is not writable {}: {}",
            root.display(),
            e
        ))
    })?;

    Ok(())
}

fn read_record(path: &Path) -> Option<Record> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read record");
            return None;
        }
    };

    match codec::decode(&bytes) {
        Ok(record) => Some(record),
        Err(e) => {
            // Left in place; purge decides what happens to it.
            debug!(path = %path.display(), error = %e, "unreadable record treated as miss");
            None
        }
    }
}

/// Removes the record at `path` if it is expired. Returns whether it did.
///
/// Runs under the same inode lock writers take, and only unlinks `path` while
/// it still names the inode that was judged expired. A record a writer
/// renamed into place meanwhile is left alone.
fn purge_record(path: &Path, now: DateTime<Utc>) -> io::Result<bool> {
    let mut file = File::open(path)?;
    file.lock_exclusive()?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let expiration = match codec::decode_expiration(&bytes) {
        Ok(expiration) => expiration,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "skipping undecodable record");
            return Ok(false);
        }
    };

    if expiration > now || !same_inode(&file, path)? {
        return Ok(false);
    }

    let removed = match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(e),
    };
    FileExt::unlock(&file)?;
    Ok(removed)
}

/// Whether `path` still names the file behind `file`.
#[cfg(unix)]
fn same_inode(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn same_inode(file: &File, path: &Path) -> io::Result<bool> {
    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(held.len() == current.len() && held.modified()? == current.modified()?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Length of the temporary sibling a write of `record` creates.
fn temp_path_len(record: &Path) -> usize {
    let parent = record.parent().map_or(0, |p| p.as_os_str().len());
    parent + 1 + TEMP_PREFIX.len() + TEMP_RANDOM_LEN + TEMP_SUFFIX.len()
}

fn is_record(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == RECORD_EXTENSION)
}

fn remove_if_empty(dir: &Path) {
    let empty = match fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => false,
    };

    if empty {
        if let Err(e) = fs::remove_dir(dir) {
            debug!(path = %dir.display(), error = %e, "directory not removed during purge");
        }
    }
}

/// Recursive directory creation that tolerates concurrent creators.
fn create_dir_all(path: &Path, mode: u32) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    match builder.create(path) {
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        other => other,
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
