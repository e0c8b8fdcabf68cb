//! Error types returned by lanes, stores, and coordinators.

use std::io;

use thiserror::Error;

/// Errors that can occur when configuring or submitting work to an [`ExecutionLane`].
///
/// [`ExecutionLane`]: crate::ExecutionLane
#[derive(Debug, Error)]
pub enum LaneError {
    /// The lane was shut down before the submission was made. Nothing was enqueued.
    #[error("lane `{label}` is closed")]
    Closed {
        /// Label of the lane that rejected the submission.
        label: String,
    },
    /// A concurrent lane was required but a serial one was given.
    #[error("lane `{label}` is serial, a concurrent lane is required")]
    NotConcurrent {
        /// Label of the offending lane.
        label: String,
    },
    /// The operating system refused to start a worker thread.
    #[error("failed to spawn a worker for lane `{label}`")]
    Spawn {
        /// Label of the lane being built.
        label: String,
        /// The underlying spawn failure.
        #[source]
        source: io::Error,
    },
}

/// Misuse of a [`CompletionCoordinator`].
///
/// [`CompletionCoordinator::leave`] and [`CompletionCoordinator::enter`] panic with these; the
/// `try_` variants hand them back instead.
///
/// [`CompletionCoordinator`]: crate::CompletionCoordinator
/// [`CompletionCoordinator::leave`]: crate::CompletionCoordinator::leave
/// [`CompletionCoordinator::enter`]: crate::CompletionCoordinator::enter
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    /// `leave` was called with no outstanding `enter` to match it.
    #[error("leave called without a matching enter")]
    Imbalanced,
    /// `enter` would have overflowed the outstanding counter.
    #[error("outstanding completion counter is saturated")]
    Saturated,
}
