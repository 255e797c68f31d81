//! Tessera Client - Region request dispatch.
//!
//! This crate delivers key-value and coprocessor requests to the replica
//! currently serving a region, recovering from stale routing and transient
//! failures along the way.
//!
//! # Overview
//!
//! - `RegionRequestSender`: the retry and error-classification loop
//! - `Backoffer`: per-request retry budgets with cancellation
//! - `Transport`: the seam to the network
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tessera_client::{
//!     BackoffConfig, Backoffer, KvRequest, RegionRequestSender, RequestKind, READ_TIMEOUT_SHORT,
//! };
//!
//! let sender = RegionRequestSender::new(cache.clone(), transport.clone());
//!
//! // One backoffer per logical request.
//! let mut bo = Backoffer::new(BackoffConfig::for_get(), cancel.child_token());
//! let resp = sender
//!     .send_kv(&mut bo, KvRequest::new(RequestKind::Get, body), &ver_id, READ_TIMEOUT_SHORT)
//!     .await?;
//! if let Some(region_err) = resp.region_error {
//!     // Re-locate the keys and split the request.
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod backoff;
mod config;
mod error;
mod metrics;
mod proto;
mod sender;
mod transport;

pub use backoff::{BackoffError, BackoffKind, Backoffer, BACKOFF_ERRORS_MAX};
pub use config::{
    BackoffConfig, BackoffPolicy, ConfigError, Jitter, COMMIT_MAX_BACKOFF, COP_NEXT_MAX_BACKOFF,
    GET_MAX_BACKOFF, READ_TIMEOUT_LONG, READ_TIMEOUT_MEDIUM, READ_TIMEOUT_SHORT,
};
pub use error::{SendError, SendResult};
pub use metrics::{SenderMetrics, SenderMetricsSnapshot};
pub use proto::{
    CopKind, CopRequest, CopResponse, KeyRange, KvRequest, KvResponse, RegionError,
    RegionRequest, RegionResponse, RequestKind,
};
pub use sender::{RegionRequestSender, SEND_ATTEMPTS_MAX};
pub use transport::{Transport, TransportError, TransportResult};
