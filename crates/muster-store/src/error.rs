//! Error types for the coordination store.

use snafu::Snafu;

/// Errors from coordination store operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// Key does not exist.
    #[snafu(display("key '{key}' not found"))]
    NotFound {
        /// The requested key.
        key: String,
    },

    /// The store transport is down or unreachable.
    #[snafu(display("store unavailable: {reason}"))]
    Unavailable {
        /// Human-readable description of the failure.
        reason: String,
    },

    /// A `wait` call elapsed without all keys appearing.
    #[snafu(display("wait timed out after {duration_ms}ms"))]
    WaitTimeout {
        /// The timeout that elapsed, in milliseconds.
        duration_ms: u64,
    },

    /// I/O failure on the store connection.
    #[snafu(display("i/o failure during {operation}: {source}"))]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// The underlying error.
        source: std::io::Error,
    },

    /// A wire message could not be decoded.
    #[snafu(display("failed to decode {what}: {reason}"))]
    Decode {
        /// What was being decoded.
        what: &'static str,
        /// Description of the decode failure.
        reason: String,
    },

    /// The peer violated the wire protocol.
    #[snafu(display("protocol violation: {reason}"))]
    Protocol {
        /// Description of the violation.
        reason: String,
    },

    /// Key exceeds the fixed size limit.
    #[snafu(display("key size {size} exceeds maximum of {max} bytes"))]
    KeyTooLarge {
        /// Actual key size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Value exceeds the fixed size limit.
    #[snafu(display("value size {size} exceeds maximum of {max} bytes"))]
    ValueTooLarge {
        /// Actual value size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },
}

impl StoreError {
    /// Whether the operation may succeed if retried against the same store.
    ///
    /// `WaitTimeout` is deliberately excluded: wait retry policy belongs to
    /// the caller, which must check its shutdown signal between attempts.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. } | StoreError::Io { .. })
    }
}
