//! Gateway dispatch errors.

use crate::messages::WorkerKind;

/// Why a dispatch was refused. Refusals are normal flow control, not
/// failures: the caller retries naturally on a later frame.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The worker kind is at its concurrency ceiling.
    #[error("worker {0:?} is at its concurrency ceiling")]
    AtCapacity(WorkerKind),

    /// The worker allows a single outstanding request and has one.
    #[error("worker {0:?} already has a request in flight")]
    Busy(WorkerKind),

    /// The gateway is in degraded mode (workers failed to spawn) or the
    /// worker's channel is gone.
    #[error("worker {0:?} is unavailable")]
    Unavailable(WorkerKind),
}
