//! Cache Key Module
//!
//! Hierarchical keys: `users/42/posts` is a child of `users/42`, and clearing
//! the parent clears the child too.

use std::fmt;
use std::str::FromStr;

use crate::driver::LITERAL_MARKER;
use crate::error::{Result, StashError};

/// Separator used by [`CacheKey::parse`] and `Display`.
pub const KEY_SEPARATOR: char = '/';

// == Cache Key ==
/// Ordered, non-empty sequence of key segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    segments: Vec<String>,
}

impl CacheKey {
    // == Constructor ==
    /// Builds a key from its segments.
    ///
    /// # Errors
    /// `StashError::InvalidKey` when there are no segments, a segment is empty,
    /// contains the separator, or starts with the reserved literal marker.
    pub fn new<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();

        if segments.is_empty() {
            return Err(StashError::InvalidKey("key has no segments".to_string()));
        }
        for segment in &segments {
            validate_segment(segment)?;
        }

        Ok(Self { segments })
    }

    /// Parses `"a/b/c"`. Leading and trailing separators are ignored.
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.trim_matches(KEY_SEPARATOR);
        if trimmed.is_empty() {
            return Err(StashError::InvalidKey(format!("empty key: {:?}", path)));
        }
        Self::new(trimmed.split(KEY_SEPARATOR))
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Key one level below this one.
    pub fn child(&self, segment: impl Into<String>) -> Result<Self> {
        let segment = segment.into();
        validate_segment(&segment)?;

        let mut segments = self.segments.clone();
        segments.push(segment);
        Ok(Self { segments })
    }

    /// True when `other` lies strictly below this key.
    pub fn is_parent_of(&self, other: &CacheKey) -> bool {
        other.segments.len() > self.segments.len() && other.segments.starts_with(&self.segments)
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(StashError::InvalidKey("empty key segment".to_string()));
    }
    if segment.contains(KEY_SEPARATOR) {
        return Err(StashError::InvalidKey(format!(
            "segment contains '{}': {:?}",
            KEY_SEPARATOR, segment
        )));
    }
    if segment.starts_with(LITERAL_MARKER) {
        return Err(StashError::InvalidKey(format!(
            "segment starts with reserved '{}': {:?}",
            LITERAL_MARKER, segment
        )));
    }
    Ok(())
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl FromStr for CacheKey {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
