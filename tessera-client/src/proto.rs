//! Request and response model.
//!
//! Payloads are opaque [`Bytes`]; encoding them is the transport's job.
//! What the sender needs from a request is its kind tag and a slot for the
//! routing context. What it needs from a response is the kind tag and the
//! optional [`RegionError`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tessera_core::RegionId;
use tessera_routing::{Peer, RegionMeta, RpcContext};
use thiserror::Error;

use crate::transport::{Transport, TransportResult};

/// Kind tag shared by a request and its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Transactional point read.
    Get,
    /// Transactional range read.
    Scan,
    /// Transactional multi-key read.
    BatchGet,
    /// First phase of two-phase commit.
    Prewrite,
    /// Second phase of two-phase commit.
    Commit,
    /// Roll back a single key's lock.
    Cleanup,
    /// Roll back several keys' locks.
    BatchRollback,
    /// List locks older than a timestamp.
    ScanLock,
    /// Commit or roll back the locks of a transaction.
    ResolveLock,
    /// Garbage-collect old versions.
    Gc,
    /// Non-transactional read.
    RawGet,
    /// Non-transactional write.
    RawPut,
    /// Non-transactional delete.
    RawDelete,
    /// Non-transactional range read.
    RawScan,
    /// Computation pushed down to the store.
    Coprocessor,
}

impl RequestKind {
    /// Returns the kind name used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Scan => "scan",
            Self::BatchGet => "batch_get",
            Self::Prewrite => "prewrite",
            Self::Commit => "commit",
            Self::Cleanup => "cleanup",
            Self::BatchRollback => "batch_rollback",
            Self::ScanLock => "scan_lock",
            Self::ResolveLock => "resolve_lock",
            Self::Gc => "gc",
            Self::RawGet => "raw_get",
            Self::RawPut => "raw_put",
            Self::RawDelete => "raw_delete",
            Self::RawScan => "raw_scan",
            Self::Coprocessor => "coprocessor",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recoverable routing problem reported by a reachable server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionError {
    /// The contacted peer is not the leader.
    #[error("not leader for {region_id}, leader: {leader:?}")]
    NotLeader {
        /// The region the request was addressed to.
        region_id: RegionId,
        /// The leader as far as the server knows.
        leader: Option<Peer>,
    },

    /// The caller's epoch is outdated.
    #[error("stale epoch, {} successor region(s)", .new_regions.len())]
    StaleEpoch {
        /// Regions that replaced the stale one. May be empty.
        new_regions: Vec<RegionMeta>,
    },

    /// The peer is overloaded.
    #[error("server is busy: {reason}")]
    ServerBusy {
        /// The server's explanation.
        reason: String,
    },

    /// Any other routing problem (key not in region, region not found,
    /// missing epoch).
    #[error("region error: {message}")]
    Other {
        /// The server's explanation.
        message: String,
    },
}

impl RegionError {
    /// The placeholder returned when the caller's region version is no
    /// longer cached.
    #[must_use]
    pub const fn stale_epoch() -> Self {
        Self::StaleEpoch {
            new_regions: Vec::new(),
        }
    }

    /// Returns the variant name used in logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::NotLeader { .. } => "not_leader",
            Self::StaleEpoch { .. } => "stale_epoch",
            Self::ServerBusy { .. } => "server_busy",
            Self::Other { .. } => "other",
        }
    }
}

/// A transactional key-value request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvRequest {
    /// The operation.
    pub kind: RequestKind,
    /// Routing context, stamped by the sender before each attempt.
    pub context: Option<RpcContext>,
    /// Encoded operation payload.
    pub body: Bytes,
}

impl KvRequest {
    /// Creates a request with no routing context.
    #[must_use]
    pub fn new(kind: RequestKind, body: impl Into<Bytes>) -> Self {
        Self {
            kind,
            context: None,
            body: body.into(),
        }
    }
}

/// Response to a [`KvRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvResponse {
    /// The operation this answers.
    pub kind: RequestKind,
    /// Routing problem, if the server could not serve the request.
    pub region_error: Option<RegionError>,
    /// Encoded result payload.
    pub body: Bytes,
}

impl KvResponse {
    /// Creates a successful response.
    #[must_use]
    pub fn ok(kind: RequestKind, body: impl Into<Bytes>) -> Self {
        Self {
            kind,
            region_error: None,
            body: body.into(),
        }
    }

    /// Creates a response carrying a region error.
    #[must_use]
    pub const fn with_region_error(kind: RequestKind, error: RegionError) -> Self {
        Self {
            kind,
            region_error: Some(error),
            body: Bytes::new(),
        }
    }
}

/// Coprocessor request types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopKind {
    /// Execute a pushed-down query plan.
    Dag,
    /// Collect statistics.
    Analyze,
    /// Compute a checksum over the ranges.
    Checksum,
}

/// A half-open key range `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// First key (inclusive).
    pub start: Bytes,
    /// Last key (exclusive).
    pub end: Bytes,
}

impl KeyRange {
    /// Creates a new key range.
    #[must_use]
    pub fn new(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

/// A coprocessor (computation pushdown) request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopRequest {
    /// What to compute.
    pub tp: CopKind,
    /// Routing context, stamped by the sender before each attempt.
    pub context: Option<RpcContext>,
    /// Encoded plan.
    pub data: Bytes,
    /// Key ranges the plan runs over. All must lie inside the region.
    pub ranges: Vec<KeyRange>,
}

impl CopRequest {
    /// Creates a request with no routing context.
    #[must_use]
    pub fn new(tp: CopKind, data: impl Into<Bytes>, ranges: Vec<KeyRange>) -> Self {
        Self {
            tp,
            context: None,
            data: data.into(),
            ranges,
        }
    }
}

/// Response to a [`CopRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CopResponse {
    /// Routing problem, if the server could not serve the request.
    pub region_error: Option<RegionError>,
    /// Non-routing failure reported by the executor.
    pub other_error: Option<String>,
    /// Encoded result.
    pub data: Bytes,
}

impl CopResponse {
    /// Creates a successful response.
    #[must_use]
    pub fn ok(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Creates a response carrying a region error.
    #[must_use]
    pub fn with_region_error(error: RegionError) -> Self {
        Self {
            region_error: Some(error),
            ..Self::default()
        }
    }
}

/// What the sender needs from a response.
pub trait RegionResponse: Send {
    /// The kind of request this response answers.
    fn kind(&self) -> RequestKind;

    /// The region error, if any.
    fn region_error(&self) -> Option<&RegionError>;
}

impl RegionResponse for KvResponse {
    fn kind(&self) -> RequestKind {
        self.kind
    }

    fn region_error(&self) -> Option<&RegionError> {
        self.region_error.as_ref()
    }
}

impl RegionResponse for CopResponse {
    fn kind(&self) -> RequestKind {
        RequestKind::Coprocessor
    }

    fn region_error(&self) -> Option<&RegionError> {
        self.region_error.as_ref()
    }
}

/// What the sender needs from a request.
///
/// The two request families differ only in which transport call carries
/// them and in the placeholder answered when the region is gone.
#[async_trait]
pub trait RegionRequest: Send + Sync {
    /// The matching response type.
    type Response: RegionResponse;

    /// The request's kind tag.
    fn kind(&self) -> RequestKind;

    /// Stamps the routing context for the next attempt.
    fn set_context(&mut self, context: RpcContext);

    /// The response answered without a network call when the caller's
    /// region version is not cached.
    fn stale_epoch_response(&self) -> Self::Response;

    /// Sends the request through `transport`.
    ///
    /// # Errors
    ///
    /// Returns the transport's error.
    async fn dispatch<T>(
        &self,
        transport: &T,
        addr: &str,
        timeout: Duration,
    ) -> TransportResult<Self::Response>
    where
        T: Transport + ?Sized;
}

#[async_trait]
impl RegionRequest for KvRequest {
    type Response = KvResponse;

    fn kind(&self) -> RequestKind {
        self.kind
    }

    fn set_context(&mut self, context: RpcContext) {
        self.context = Some(context);
    }

    fn stale_epoch_response(&self) -> KvResponse {
        KvResponse::with_region_error(self.kind, RegionError::stale_epoch())
    }

    async fn dispatch<T>(
        &self,
        transport: &T,
        addr: &str,
        timeout: Duration,
    ) -> TransportResult<KvResponse>
    where
        T: Transport + ?Sized,
    {
        transport.send_kv(addr, self, timeout).await
    }
}

#[async_trait]
impl RegionRequest for CopRequest {
    type Response = CopResponse;

    fn kind(&self) -> RequestKind {
        RequestKind::Coprocessor
    }

    fn set_context(&mut self, context: RpcContext) {
        self.context = Some(context);
    }

    fn stale_epoch_response(&self) -> CopResponse {
        CopResponse::with_region_error(RegionError::stale_epoch())
    }

    async fn dispatch<T>(
        &self,
        transport: &T,
        addr: &str,
        timeout: Duration,
    ) -> TransportResult<CopResponse>
    where
        T: Transport + ?Sized,
    {
        transport.send_coprocessor(addr, self, timeout).await
    }
}
