//! The error kinds shared by every layer of the store and projection engine.
//!
//! `StoreError` is a single `thiserror`-derived enum covering validation,
//! append-condition violations, lock timeouts, corrupted entities, and I/O
//! failures: struct-like variants carrying enough context for a caller to
//! act without parsing the message string.

use std::path::PathBuf;

use thiserror::Error;

use crate::position::Position;

/// Errors produced by the event store, projection store, and projection
/// manager.
///
/// Each variant corresponds to one error kind from the error-handling design:
/// `Validation`, `ConditionViolation`, `Timeout`, `CorruptedEntity`,
/// `ProjectionBusy`, and `Fatal`/`Io`. There is no variant for orphaned-file
/// recovery: that always happens locally (truncate-and-log) and is never
/// surfaced to the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    /// One or more inputs were invalid: empty event batches, malformed keys,
    /// an unknown projection name, or a bad configuration value.
    ///
    /// Carries every violation found, not just the first, so a caller can
    /// report a complete fail-fast diagnostic in one error.
    #[error("validation failed: {0:?}")]
    Validation(Vec<String>),

    /// An `AppendCondition`'s `FailIfEventsMatch` query matched an event
    /// beyond `AfterSequencePosition`.
    #[error("append condition violated: an event matching the query exists after position {after}")]
    ConditionViolation {
        /// The position the condition was evaluated after.
        after: Position,
    },

    /// The cross-process lock could not be acquired within the configured
    /// timeout.
    #[error("timed out waiting for lock file {path}")]
    Timeout {
        /// Path to the lock file that could not be acquired.
        path: PathBuf,
    },

    /// A projection entity file failed to deserialize.
    #[error("corrupted projection entity for key {key:?} in projection {projection:?}: {reason}")]
    CorruptedEntity {
        /// The projection the entity belongs to.
        projection: String,
        /// The entity's key.
        key: String,
        /// A human-readable description of the deserialization failure.
        reason: String,
    },

    /// A rebuild was requested for a projection that is already rebuilding
    /// or updating.
    #[error("projection {name:?} is already being rebuilt or updated")]
    ProjectionBusy {
        /// The name of the busy projection.
        name: String,
    },

    /// A projection name was not found in the registry.
    #[error("no projection registered with name {0:?}")]
    UnknownProjection(String),

    /// An unrecoverable I/O failure: disk full, permission denied, or
    /// similar.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path the failing operation targeted.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A serialization or deserialization failure outside the
    /// `CorruptedEntity` case (e.g. writing an event payload).
    #[error("serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
}

impl StoreError {
    /// Builds a [`StoreError::Validation`] from a single message, useful at
    /// call sites that only ever produce one violation.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }

    /// Wraps an [`std::io::Error`] with the path that was being operated on.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_renders_every_message() {
        let error = StoreError::Validation(vec!["root path is empty".into(), "batch size is 0".into()]);
        let display = error.to_string();
        assert!(display.contains("root path is empty"));
        assert!(display.contains("batch size is 0"));
    }

    #[test]
    fn condition_violation_mentions_position() {
        let error = StoreError::ConditionViolation { after: Position::new(5) };
        assert!(error.to_string().contains('5'));
    }

    #[test]
    fn timeout_mentions_lock_path() {
        let error = StoreError::Timeout { path: PathBuf::from("/tmp/store/.store.lock") };
        assert!(error.to_string().contains(".store.lock"));
    }
}
