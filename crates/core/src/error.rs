//! Engine-wide error type.
//!
//! Covers the scheduler, medium registry, framed pipeline, and stream
//! parser. The RTSP control-plane client has its own error type
//! ([`crate::rtsp::RtspError`]) since its failure taxonomy (status
//! codes, auth challenges, redirects) doesn't overlap much with the
//! engine's.

use std::fmt;

/// Errors raised by the scheduler, medium registry, pipeline, or parser.
///
/// - **Transient I/O**: [`Io`](Self::Io).
/// - **Medium lookup**: [`NotFound`](Self::NotFound), [`WrongKind`](Self::WrongKind).
/// - **Pipeline contract**: [`AlreadyAwaitingData`](Self::AlreadyAwaitingData),
///   [`SinkAlreadyBound`](Self::SinkAlreadyBound).
/// - **Fatal**: [`Fatal`](Self::Fatal) — bank overflow, readiness syscall
///   failure, or any condition the engine cannot recover from within a
///   single-threaded event loop.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No medium registered under the given name.
    #[error("medium not found: {0}")]
    NotFound(String),

    /// A medium was found but is not the concrete kind the caller expected
    /// (e.g. looked up a group socket as an RTP source).
    #[error("medium {0:?} is not a {1}")]
    WrongKind(String, &'static str),

    /// `get_next_frame` called on a source that already has a request
    /// outstanding (§4.4 invariant: at most one call outstanding per source).
    #[error("get_next_frame called while a request was already outstanding on {0:?}")]
    AlreadyAwaitingData(String),

    /// `start_playing` called on a sink that already has a source bound.
    #[error("sink {0:?} already has a source bound")]
    SinkAlreadyBound(String),

    /// A fatal, unrecoverable implementation error: bank overflow in the
    /// stream parser, a hard readiness-syscall failure, and similar
    /// conditions that should terminate the process with a diagnostic
    /// rather than be handled.
    #[error("fatal engine error in {operation}: {detail}")]
    Fatal {
        operation: &'static str,
        detail: String,
    },
}

/// Convenience alias for `Result<T, EngineError>`.
pub type Result<T> = std::result::Result<T, EngineError>;

/// A three-part "prefix + argument + suffix" diagnostic string, modeling
/// the mutable last-error buffer the original `UsageEnvironment` exposes.
/// Kept as a display-only helper on [`crate::env::Environment`] rather
/// than a second source of truth for control flow — callers still get a
/// typed [`EngineError`]; this is only for human-readable reporting.
#[derive(Debug, Clone, Default)]
pub struct LastError {
    prefix: String,
    arg: String,
    suffix: String,
}

impl LastError {
    pub fn set(&mut self, prefix: impl Into<String>, arg: impl Into<String>, suffix: impl Into<String>) {
        self.prefix = prefix.into();
        self.arg = arg.into();
        self.suffix = suffix.into();
    }

    pub fn clear(&mut self) {
        self.prefix.clear();
        self.arg.clear();
        self.suffix.clear();
    }
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.prefix, self.arg, self.suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_error_formats_three_parts() {
        let mut e = LastError::default();
        e.set("failed to open ", "rtsp://host/stream", ": connection refused");
        assert_eq!(
            e.to_string(),
            "failed to open rtsp://host/stream: connection refused"
        );
    }

    #[test]
    fn last_error_clear() {
        let mut e = LastError::default();
        e.set("a", "b", "c");
        e.clear();
        assert_eq!(e.to_string(), "");
    }
}
