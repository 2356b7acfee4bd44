//! Error types for the notification pipeline.

use std::path::PathBuf;

/// A UI message could not be enqueued; the notification is lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error("UI queue is full")]
    Full,
    #[error("UI queue consumer has shut down")]
    Disconnected,
}

/// Consistency violations detected while reconciling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("duplicate {kind} key {key}: element already bound, leaving it untouched")]
    DuplicateKey { kind: &'static str, key: String },
}

/// Failures of an entity source during a scan.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}
