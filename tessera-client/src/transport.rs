//! Transport trait abstraction for store communication.
//!
//! The sender never touches sockets or encodings. It hands a stamped
//! request, a store address and a timeout to a [`Transport`] and gets back
//! either a decoded response or a [`TransportError`].
//!
//! Any transport error is treated as "this peer could not be reached":
//! the sender fails over to another peer and backs off. Region-level
//! problems reported by a reachable server are not transport errors; they
//! arrive inside the response.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::proto::{CopRequest, CopResponse, KvRequest, KvResponse};

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request did not complete within its timeout.
    #[error("request to {addr} timed out after {timeout:?}")]
    Timeout {
        /// The target address.
        addr: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The store refused the connection.
    #[error("connection to {addr} refused")]
    ConnectionRefused {
        /// The target address.
        addr: String,
    },

    /// The connection was lost mid-request.
    #[error("connection to {addr} reset")]
    ConnectionReset {
        /// The target address.
        addr: String,
    },

    /// The store is unreachable or rejected the call at the RPC layer.
    #[error("store {addr} unavailable: {message}")]
    Unavailable {
        /// The target address.
        addr: String,
        /// Error description.
        message: String,
    },

    /// Transport is shutdown.
    #[error("transport is shutdown")]
    Shutdown,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Trait for sending requests to stores.
///
/// # Implementation Notes
///
/// Implementations must be `Send + Sync`; one transport is shared by every
/// request in flight. Each call must complete or fail within `timeout`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a transactional key-value request.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or does not answer
    /// within `timeout`.
    async fn send_kv(
        &self,
        addr: &str,
        request: &KvRequest,
        timeout: Duration,
    ) -> TransportResult<KvResponse>;

    /// Sends a coprocessor request.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or does not answer
    /// within `timeout`.
    async fn send_coprocessor(
        &self,
        addr: &str,
        request: &CopRequest,
        timeout: Duration,
    ) -> TransportResult<CopResponse>;
}
