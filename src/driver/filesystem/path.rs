//! Key Path Module
//!
//! Maps hierarchical cache keys to record files under the storage root.
//!
//! Every hashed segment is split into `dir_split` directory levels so that no
//! single directory fans out too far. With a split of 2, the key
//! `["users", "42"]` lands at:
//!
//! ```text
//! <root>/<md5(users)[..16]>/<md5(users)[16..]>/<md5(42)[..16]>/<md5(42)[16..]>.cache
//! ```
//!
//! The record for a key sits beside the directory holding its children, so a
//! subtree clear only has to strip the suffix.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rand::seq::IteratorRandom;
use sha2::{Digest, Sha256};

use crate::driver::LITERAL_MARKER;
use crate::error::{Result, StashError};

// == Public Constants ==
/// Extension marking files owned by the driver.
pub const RECORD_EXTENSION: &str = "cache";

// == Key Hash ==
/// One-way hash applied to non-literal key segments.
#[derive(Clone, Copy)]
pub enum KeyHash {
    Md5,
    Sha256,
    /// Caller-supplied hash, mostly for tests.
    Custom(fn(&str) -> String),
}

impl KeyHash {
    /// Looks a hash function up by its configuration name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "md5" => Ok(KeyHash::Md5),
            "sha256" => Ok(KeyHash::Sha256),
            other => Err(StashError::Configuration(format!(
                "Key hash function does not exist: {}",
                other
            ))),
        }
    }

    pub fn hash(&self, segment: &str) -> String {
        match self {
            KeyHash::Md5 => format!("{:x}", md5::compute(segment.as_bytes())),
            KeyHash::Sha256 => hex::encode(Sha256::digest(segment.as_bytes())),
            KeyHash::Custom(f) => f(segment),
        }
    }
}

impl fmt::Debug for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyHash::Md5 => f.write_str("Md5"),
            KeyHash::Sha256 => f.write_str("Sha256"),
            KeyHash::Custom(_) => f.write_str("Custom"),
        }
    }
}

// == Path Memo ==
/// Bounded key -> path memo. Losing an entry only costs a recomputation.
#[derive(Debug)]
struct PathMemo {
    capacity: usize,
    paths: HashMap<Vec<String>, PathBuf>,
}

impl PathMemo {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            paths: HashMap::new(),
        }
    }

    fn get(&self, key: &[String]) -> Option<PathBuf> {
        self.paths.get(key).cloned()
    }

    fn insert(&mut self, key: &[String], path: PathBuf) {
        if self.capacity == 0 {
            return;
        }

        self.paths.insert(key.to_vec(), path);

        // Keys are mostly used right away or never again; drop about half.
        if self.paths.len() > self.capacity {
            let count = self.capacity.div_ceil(2) + 1;
            let victims = self
                .paths
                .keys()
                .cloned()
                .choose_multiple(&mut rand::thread_rng(), count);
            for victim in victims {
                self.paths.remove(&victim);
            }
        }
    }

    fn len(&self) -> usize {
        self.paths.len()
    }
}

// == Key Path Deriver ==
/// Derives record paths from keys.
#[derive(Debug)]
pub struct KeyPathDeriver {
    root: PathBuf,
    dir_split: usize,
    hash: KeyHash,
    memo: Mutex<PathMemo>,
}

impl KeyPathDeriver {
    /// Creates a deriver. A `dir_split` below 1 is treated as 1.
    pub fn new(root: impl Into<PathBuf>, dir_split: usize, hash: KeyHash, memo_capacity: usize) -> Self {
        Self {
            root: root.into(),
            dir_split: dir_split.max(1),
            hash,
            memo: Mutex::new(PathMemo::new(memo_capacity)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record file for `key`. The empty key maps to the root.
    pub fn record_path(&self, key: &[String]) -> PathBuf {
        if key.is_empty() {
            return self.root.clone();
        }

        if let Some(path) = self.memo.lock().get(key) {
            return path;
        }

        let path = self.derive(key);
        self.memo.lock().insert(key, path.clone());
        path
    }

    /// Directory holding the children of `key`.
    pub fn subtree_path(&self, key: &[String]) -> PathBuf {
        let record = self.record_path(key);
        if key.is_empty() {
            record
        } else {
            record.with_extension("")
        }
    }

    fn derive(&self, key: &[String]) -> PathBuf {
        let mut path = self.root.clone();

        for segment in key {
            if let Some(literal) = literal_component(segment) {
                path.push(literal);
                continue;
            }

            let hashed = self.hash.hash(segment);
            for part in split_even(&hashed, self.dir_split) {
                path.push(part);
            }
        }

        // The last pushed component becomes the record file.
        let mut file_name = path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        file_name.push(".");
        file_name.push(RECORD_EXTENSION);
        path.set_file_name(file_name);
        path
    }

    #[cfg(test)]
    fn memo_len(&self) -> usize {
        self.memo.lock().len()
    }
}

/// Returns the verbatim component for a literal segment, if it is one and is
/// safe to use as a single path component. Unsafe literals get hashed.
fn literal_component(segment: &str) -> Option<&str> {
    let literal = segment.strip_prefix(LITERAL_MARKER)?;
    let unsafe_literal = literal.is_empty()
        || literal == "."
        || literal == ".."
        || literal.contains(['/', '\\', '\0']);
    if unsafe_literal {
        None
    } else {
        Some(literal)
    }
}

/// Splits `s` into `parts` near-equal substrings whose concatenation is `s`.
/// Earlier parts take the remainder, one extra character each.
fn split_even(s: &str, parts: usize) -> Vec<&str> {
    let boundaries: Vec<usize> = s.char_indices().map(|(i, _)| i).collect();
    let chars = boundaries.len();
    if chars == 0 {
        return vec!["_"];
    }

    let parts = parts.clamp(1, chars);
    let base = chars / parts;
    let extra = chars % parts;

    let mut out = Vec::with_capacity(parts);
    let mut start_char = 0;
    for i in 0..parts {
        let width = base + usize::from(i < extra);
        let end_char = start_char + width;
        let start = boundaries[start_char];
        let end = boundaries.get(end_char).copied().unwrap_or(s.len());
        out.push(&s[start..end]);
        start_char = end_char;
    }
    out
}
