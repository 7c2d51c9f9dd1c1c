//! Error types for the benchmark driver.
use thiserror::Error;

/// Fatal errors that abort a running benchmark.
///
/// Recoverable request failures never surface here: they are recorded as
/// failed samples and stay inside the sample stream (see
/// [`RequestMeta`](crate::sample::RequestMeta)).
#[derive(Debug, Error)]
pub enum DriverError {
    /// A runner could not be executed because required parameters were
    /// missing from its parameter source.
    #[error("cannot execute [{operation}]: {reason}")]
    MissingParameter {
        /// The operation whose runner failed.
        operation: String,
        /// What was missing.
        reason: String,
    },

    /// Track preparation failed on one of the load driver hosts.
    #[error("could not prepare track [{track}]: {reason}")]
    TrackPreparation {
        /// The track being prepared.
        track: String,
        /// The underlying failure.
        reason: String,
    },

    /// A load worker exited without being asked to.
    #[error("load worker [{client_id}] has exited prematurely")]
    WorkerExited {
        /// Index of the worker that disappeared.
        client_id: u32,
    },

    /// An internal invariant was violated. Always a programming bug.
    #[error("assertion violated: {0}")]
    Assertion(String),

    /// The requested challenge does not exist in the track.
    #[error("unknown challenge [{challenge}] for track [{track}]")]
    UnknownChallenge {
        /// The requested challenge name.
        challenge: String,
        /// The track that was searched.
        track: String,
    },

    /// Any other fatal error raised at the runner or parameter-source seam.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias used throughout the driver.
pub type Result<T> = std::result::Result<T, DriverError>;
