//! Error types for group coordination.

use muster_store::StoreError;
use snafu::Snafu;

/// Errors from rendezvous and broadcast.
///
/// Transient store failures are absorbed inside the retry loops; only the
/// variants here cross the component boundary. `Aborted` is distinct from
/// every failure mode so callers can tell "coordination failed" from "we
/// were asked to stop".
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CoordinationError {
    /// Underlying store error that is not retried.
    #[snafu(display("storage error: {source}"))]
    Store {
        /// The underlying error.
        source: StoreError,
    },

    /// The shutdown signal fired during a blocking operation.
    #[snafu(display("aborted by shutdown during {operation}"))]
    Aborted {
        /// The operation that was interrupted.
        operation: String,
    },

    /// Retry budget exhausted without the shutdown signal firing.
    #[snafu(display("max retries exceeded for {operation}: {attempts} attempts"))]
    MaxRetriesExceeded {
        /// Description of the operation.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The group could not establish a shared store. Fatal: there is no
    /// degraded mode without the store.
    #[snafu(display("bootstrap failed: {reason}"))]
    BootstrapFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// The advertised coordinator does not match this rank's configuration.
    #[snafu(display(
        "coordinator conflict: rank {advertised} advertised, rank {configured} configured"
    ))]
    CoordinatorConflict {
        /// Coordinator rank seen in the advert or store.
        advertised: u32,
        /// Coordinator rank this process was configured with.
        configured: u32,
    },

    /// Command pack/unpack failure.
    #[snafu(display("codec failure while {operation}: {reason}"))]
    Codec {
        /// The codec operation that failed.
        operation: &'static str,
        /// Description of the failure.
        reason: String,
    },

    /// The requested source rank is outside the group.
    #[snafu(display("source rank {source_rank} outside group of size {world_size}"))]
    InvalidSourceRank {
        /// The offending rank.
        source_rank: u32,
        /// The group size.
        world_size: u32,
    },

    /// The source rank called broadcast without a command to publish.
    #[snafu(display("broadcast source provided no command"))]
    MissingCommand,
}

impl From<StoreError> for CoordinationError {
    fn from(source: StoreError) -> Self {
        CoordinationError::Store { source }
    }
}

impl CoordinationError {
    /// Whether the whole broadcast attempt may be restarted from the top.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(self, CoordinationError::Store { source } if source.is_transient())
    }
}
