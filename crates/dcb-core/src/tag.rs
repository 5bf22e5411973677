//! Tags: `(key, value)` pairs attached to events and projection entities.
//!
//! Tags are the indexed-lookup mechanism for both the event log and
//! projection state's tag index. A `Tag` carries no ordering semantics
//! beyond its own `(key, value)` identity; sets of tags are unordered.

use std::fmt;

/// A `(key, value)` pair used for indexed lookup of events or projection
/// entities.
///
/// Tags are plain strings: there is no schema enforcing which keys are
/// valid. Construction is infallible; callers are free to tag events
/// with whatever taxonomy their domain needs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Tag {
    key: String,
    value: String,
}

impl Tag {
    /// Builds a tag from a key and value.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Returns the tag's key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the tag's value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns the directory-safe `"<key>_<value>"` index segment used to
    /// name this tag's on-disk index file, per the store's on-disk layout
    /// (`indices/tags/<Key>/<Value>`).
    #[must_use]
    pub fn index_path_segments(&self) -> (String, String) {
        (sanitize_segment(&self.key), sanitize_segment(&self.value))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Replaces path separators and NUL bytes (the one byte invalid on every
/// target platform) so a tag component is always safe as a path segment.
fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_as_key_equals_value() {
        let tag = Tag::new("email", "a@x");
        assert_eq!(tag.to_string(), "email=a@x");
    }

    #[test]
    fn sanitizes_path_hostile_characters() {
        let tag = Tag::new("path", "a/b\\c\0d");
        let (_, value_segment) = tag.index_path_segments();
        assert_eq!(value_segment, "a_b_c_d");
    }

    #[test]
    fn ordering_is_derived_lexicographically() {
        let a = Tag::new("a", "1");
        let b = Tag::new("a", "2");
        assert!(a < b);
    }
}
