//! Sender error types.

use tessera_routing::CacheError;
use thiserror::Error;

use crate::backoff::BackoffError;
use crate::proto::RequestKind;

/// Errors that end a logical request.
///
/// Region errors the caller must handle itself (stale epoch, other) are
/// not errors here; they come back inside the response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// Cancelled, past its deadline, or out of retry budget.
    #[error(transparent)]
    Backoff(#[from] BackoffError),

    /// The response answers a different kind of request.
    #[error("response kind {response} does not match request kind {request}")]
    KindMismatch {
        /// Kind of the request sent.
        request: RequestKind,
        /// Kind of the response received.
        response: RequestKind,
    },

    /// Successor regions from a stale-epoch error could not be cached.
    #[error("failed to replace stale region: {0}")]
    Cache(#[from] CacheError),

    /// The loop hit its hard iteration bound.
    #[error("request not resolved after {attempts} attempts")]
    TooManyAttempts {
        /// Iterations performed.
        attempts: u32,
    },
}

impl SendError {
    /// Returns true if the request ended because the caller cancelled it or
    /// its deadline passed.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::Backoff(BackoffError::Cancelled | BackoffError::DeadlineExceeded)
        )
    }
}

/// Result type for sender operations.
pub type SendResult<T> = Result<T, SendError>;
