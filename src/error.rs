//! Error types surfaced by the inspection library.
//!
//! Every fallible public operation returns [`SinspError`]. The inspector keeps
//! the rendered string of the most recent failure so consumers can retrieve it
//! with `get_last_error()` without holding on to the error value itself.

use std::path::PathBuf;

use thiserror::Error;

/// Library-level error taxonomy.
#[derive(Debug, Error)]
pub enum SinspError {
    /// The capture source could not be opened: bad path, missing driver,
    /// or insufficient permissions.
    #[error("cannot open capture source {path}: {message}")]
    SourceOpen {
        /// Path or device the open targeted.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// A malformed frame was read from the source. Fatal for file captures;
    /// live captures count and skip the frame instead of surfacing this.
    #[error("malformed event frame at offset {offset}: {message}")]
    SourceDecode {
        /// Byte offset of the bad frame within the source.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// `close()` was called while `next()` was blocked, or `next()` was
    /// called on a closed inspector.
    #[error("capture interrupted")]
    CaptureInterrupted,

    /// The filter expression failed to compile.
    #[error("filter error at position {pos}: {message}")]
    FilterCompile {
        /// Byte position of the error within the expression.
        pos: usize,
        /// Description of the problem.
        message: String,
    },

    /// A configuration operation was attempted after the capture started
    /// (or, for live-only settings, on a file capture).
    #[error("configuration locked: {message}")]
    ConfigLocked {
        /// Which operation was disallowed and why.
        message: String,
    },

    /// A thread or FD lookup failed and synthesis was not requested.
    #[error("{kind} not found: {id}")]
    LookupFailed {
        /// What was being looked up.
        kind: &'static str,
        /// The identifier that missed.
        id: i64,
    },

    /// Writing or rotating the output capture failed.
    #[error("dump I/O error on {path}: {source}")]
    DumpIo {
        /// Dump file involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An internal invariant was broken; the capture must close.
    #[error("fatal inspector error: {message}")]
    Fatal {
        /// Description of the broken invariant.
        message: String,
    },
}

impl SinspError {
    /// True for errors that must latch the inspector closed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SinspError::Fatal { .. })
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SinspError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_open_display_contains_path_and_message() {
        let err = SinspError::SourceOpen {
            path: PathBuf::from("/tmp/missing.scap"),
            message: "no such file".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("/tmp/missing.scap"));
        assert!(msg.contains("no such file"));
    }

    #[test]
    fn filter_compile_display_contains_position() {
        let err = SinspError::FilterCompile {
            pos: 11,
            message: "expected value".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("11"));
        assert!(msg.contains("expected value"));
    }

    #[test]
    fn only_fatal_is_fatal() {
        assert!(SinspError::Fatal {
            message: "corrupt thread table".into()
        }
        .is_fatal());
        assert!(!SinspError::CaptureInterrupted.is_fatal());
    }
}
