//! Region request sender - delivers one logical request to a region.
//!
//! The sender resolves the region from the cache, sends the request to the
//! selected peer, and classifies what comes back:
//!
//! - **Transport failure**: fail over to the next peer, back off, retry
//! - **Not leader**: record the leader hint, back off if there was none, retry
//! - **Server busy**: back off, retry
//! - **Stale epoch**: cache the successor regions, hand the error back
//! - **Other region error**: drop the region, hand the error back
//!
//! Stale-epoch and other errors go back to the caller inside the response
//! because the caller may have to re-split its request across the regions
//! that now cover its keys. Every retry passes through a cache mutation, a
//! backoff, or both, and the loop checks for cancellation before every
//! attempt.
//!
//! Each call takes the [`Backoffer`] of its logical request. The sender
//! itself holds only shared state and can serve any number of concurrent
//! calls.

use std::sync::Arc;
use std::time::Duration;

use tessera_core::RegionVerId;
use tessera_routing::{RegionCache, RegionSnapshot};
use tracing::{debug, warn};

use crate::backoff::{BackoffKind, Backoffer};
use crate::error::{SendError, SendResult};
use crate::metrics::SenderMetrics;
use crate::proto::{
    CopRequest, CopResponse, KvRequest, KvResponse, RegionError, RegionRequest, RegionResponse,
};
use crate::transport::{Transport, TransportError};

/// Hard bound on loop iterations for one logical request.
pub const SEND_ATTEMPTS_MAX: u32 = 1_000;

/// Sends region requests over a shared cache and transport.
///
/// Retry budgets are not part of the sender: every call is handed the
/// [`Backoffer`] of the logical request it serves.
pub struct RegionRequestSender<C: ?Sized, T: ?Sized> {
    cache: Arc<C>,
    transport: Arc<T>,
    metrics: Arc<SenderMetrics>,
}

impl<C, T> RegionRequestSender<C, T>
where
    C: RegionCache + ?Sized,
    T: Transport + ?Sized,
{
    /// Creates a sender over `cache` and `transport`.
    #[must_use]
    pub fn new(cache: Arc<C>, transport: Arc<T>) -> Self {
        Self {
            cache,
            transport,
            metrics: Arc::new(SenderMetrics::new()),
        }
    }

    /// Reports into shared counters instead of private ones.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<SenderMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the counters this sender reports into.
    #[must_use]
    pub fn metrics(&self) -> &SenderMetrics {
        &self.metrics
    }

    /// Sends a key-value request to the region at `ver_id`, charging
    /// retries to `backoffer`.
    ///
    /// `backoffer` belongs to this one logical request; start every request
    /// with a fresh one. The returned response may still carry a stale-epoch
    /// or other region error; the caller must check it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request was cancelled, ran out of retry
    /// budget, got a response of the wrong kind, or could not cache the
    /// regions that replaced a stale one.
    pub async fn send_kv(
        &self,
        backoffer: &mut Backoffer,
        request: KvRequest,
        ver_id: &RegionVerId,
        timeout: Duration,
    ) -> SendResult<KvResponse> {
        self.send(backoffer, request, ver_id, timeout).await
    }

    /// Sends a coprocessor request to the region at `ver_id`.
    ///
    /// # Errors
    ///
    /// Same as [`send_kv`](Self::send_kv).
    pub async fn send_coprocessor(
        &self,
        backoffer: &mut Backoffer,
        request: CopRequest,
        ver_id: &RegionVerId,
        timeout: Duration,
    ) -> SendResult<CopResponse> {
        self.send(backoffer, request, ver_id, timeout).await
    }

    async fn send<R: RegionRequest>(
        &self,
        backoffer: &mut Backoffer,
        mut request: R,
        ver_id: &RegionVerId,
        timeout: Duration,
    ) -> SendResult<R::Response> {
        for _ in 0..SEND_ATTEMPTS_MAX {
            backoffer.check_live()?;

            let Some(region) = self.cache.resolve_by_version(ver_id) else {
                // The version was evicted, so the caller's view is stale no
                // matter what a server would say.
                debug!(region = %ver_id, kind = %request.kind(), "region not cached, skipping rpc");
                self.metrics.observe_stale_short_circuit();
                return Ok(request.stale_epoch_response());
            };

            let Some(response) = self
                .send_to_region(backoffer, &region, &mut request, timeout)
                .await?
            else {
                continue;
            };

            if let Some(region_err) = response.region_error() {
                if self.on_region_error(backoffer, &region, region_err).await? {
                    continue;
                }
            }

            // Applies to unresolved region errors handed back as well.
            if response.kind() != request.kind() {
                return Err(SendError::KindMismatch {
                    request: request.kind(),
                    response: response.kind(),
                });
            }
            return Ok(response);
        }

        Err(SendError::TooManyAttempts {
            attempts: SEND_ATTEMPTS_MAX,
        })
    }

    /// Sends one attempt. Returns `None` if the transport failed and the
    /// request should be retried.
    async fn send_to_region<R: RegionRequest>(
        &self,
        backoffer: &mut Backoffer,
        region: &RegionSnapshot,
        request: &mut R,
        timeout: Duration,
    ) -> SendResult<Option<R::Response>> {
        request.set_context(region.context());
        match request
            .dispatch(self.transport.as_ref(), region.address(), timeout)
            .await
        {
            Ok(response) => Ok(Some(response)),
            Err(err) => {
                self.on_send_fail(backoffer, region, &err).await?;
                Ok(None)
            }
        }
    }

    async fn on_send_fail(
        &self,
        backoffer: &mut Backoffer,
        region: &RegionSnapshot,
        err: &TransportError,
    ) -> SendResult<()> {
        self.metrics.observe_rpc_failure();
        self.cache.advance_peer(&region.ver_id());

        let ctx = region.context();
        warn!(error = %err, ctx = %ctx, "send request failed, trying next peer");
        backoffer
            .backoff(
                BackoffKind::Rpc,
                format!("send request error: {err}, ctx: {ctx}, try next peer later"),
            )
            .await?;
        Ok(())
    }

    /// Applies the recovery for a region error. Returns true if the request
    /// should be retried.
    async fn on_region_error(
        &self,
        backoffer: &mut Backoffer,
        region: &RegionSnapshot,
        region_err: &RegionError,
    ) -> SendResult<bool> {
        self.metrics.observe_region_error(region_err);
        let ver_id = region.ver_id();
        let ctx = region.context();

        match region_err {
            RegionError::NotLeader { leader, .. } => {
                warn!(error = %region_err, ctx = %ctx, "store reports not leader, retry later");
                self.cache.update_leader(&ver_id, leader.map(|p| p.id));
                if leader.is_none() {
                    backoffer
                        .backoff(
                            BackoffKind::RegionMiss,
                            format!("not leader: {region_err}, ctx: {ctx}"),
                        )
                        .await?;
                }
                Ok(true)
            }
            RegionError::StaleEpoch { new_regions } => {
                warn!(ctx = %ctx, successors = new_regions.len(), "store reports stale epoch");
                self.cache
                    .replace_with_successors(&ver_id, new_regions.clone())?;
                Ok(false)
            }
            RegionError::ServerBusy { reason } => {
                warn!(reason = %reason, ctx = %ctx, "store reports server busy, retry later");
                backoffer
                    .backoff(
                        BackoffKind::ServerBusy,
                        format!("server is busy: {reason}, ctx: {ctx}"),
                    )
                    .await?;
                Ok(true)
            }
            RegionError::Other { .. } => {
                // The caller may need to re-split the request, so only the
                // cache is repaired here.
                warn!(error = %region_err, ctx = %ctx, "store reports region error");
                self.cache.drop_region(&ver_id);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tessera_core::{PeerId, RegionEpoch, RegionId, StoreId};
    use tessera_routing::{MemoryRegionCache, Peer, RegionMeta};

    use super::*;
    use crate::config::BackoffConfig;
    use crate::proto::{CopKind, RequestKind};
    use crate::transport::TransportResult;

    /// Answers KV requests from a script and records target addresses.
    #[derive(Default)]
    struct ScriptTransport {
        kv: Mutex<VecDeque<TransportResult<KvResponse>>>,
        addrs: Mutex<Vec<String>>,
    }

    impl ScriptTransport {
        fn new(script: Vec<TransportResult<KvResponse>>) -> Self {
            Self {
                kv: Mutex::new(script.into()),
                addrs: Mutex::default(),
            }
        }

        fn addrs(&self) -> Vec<String> {
            self.addrs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptTransport {
        async fn send_kv(
            &self,
            addr: &str,
            request: &KvRequest,
            _timeout: Duration,
        ) -> TransportResult<KvResponse> {
            assert!(request.context.is_some(), "request sent without context");
            self.addrs.lock().unwrap().push(addr.to_string());
            self.kv
                .lock()
                .unwrap()
                .pop_front()
                .expect("transport script exhausted")
        }

        async fn send_coprocessor(
            &self,
            addr: &str,
            _request: &CopRequest,
            _timeout: Duration,
        ) -> TransportResult<CopResponse> {
            self.addrs.lock().unwrap().push(addr.to_string());
            Ok(CopResponse::ok("rows"))
        }
    }

    fn setup() -> (Arc<MemoryRegionCache>, RegionVerId) {
        let cache = MemoryRegionCache::with_defaults();
        for store in 1..=3 {
            cache.put_store(StoreId::new(store), format!("s{store}"));
        }
        let peers = (1..=3)
            .map(|i| Peer::new(PeerId::new(i), StoreId::new(i)))
            .collect();
        let meta = RegionMeta::new(RegionId::new(1), "", "", RegionEpoch::new(1, 3), peers);
        let ver_id = cache.insert_region(meta, None).unwrap();
        (Arc::new(cache), ver_id)
    }

    fn get() -> KvRequest {
        KvRequest::new(RequestKind::Get, "k")
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let (cache, ver_id) = setup();
        let transport = Arc::new(ScriptTransport::new(vec![Ok(KvResponse::ok(
            RequestKind::Get,
            "v",
        ))]));
        let mut bo = Backoffer::uncancellable(BackoffConfig::for_testing());
        let sender = RegionRequestSender::new(
            cache,
            transport.clone(),
        );

        let resp = sender.send_kv(&mut bo, get(), &ver_id, TIMEOUT).await.unwrap();
        assert_eq!(resp.body, "v");
        assert_eq!(transport.addrs(), vec!["s1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_fails_over() {
        let (cache, ver_id) = setup();
        let transport = Arc::new(ScriptTransport::new(vec![
            Err(TransportError::ConnectionRefused {
                addr: "s1".to_string(),
            }),
            Ok(KvResponse::ok(RequestKind::Get, "v")),
        ]));
        let mut bo = Backoffer::uncancellable(BackoffConfig::for_testing());
        let sender = RegionRequestSender::new(
            cache,
            transport.clone(),
        );

        let resp = sender.send_kv(&mut bo, get(), &ver_id, TIMEOUT).await.unwrap();
        assert!(resp.region_error.is_none());
        assert_eq!(transport.addrs(), vec!["s1", "s2"]);
        assert_eq!(bo.attempts(BackoffKind::Rpc), 1);
        assert_eq!(sender.metrics().snapshot().rpc_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kind_mismatch() {
        let (cache, ver_id) = setup();
        let transport = Arc::new(ScriptTransport::new(vec![Ok(KvResponse::ok(
            RequestKind::Scan,
            "v",
        ))]));
        let mut bo = Backoffer::uncancellable(BackoffConfig::for_testing());
        let sender = RegionRequestSender::new(
            cache,
            transport,
        );

        let err = sender.send_kv(&mut bo, get(), &ver_id, TIMEOUT).await.unwrap_err();
        assert_eq!(
            err,
            SendError::KindMismatch {
                request: RequestKind::Get,
                response: RequestKind::Scan,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_coprocessor_stale_short_circuit() {
        let (cache, _) = setup();
        let transport = Arc::new(ScriptTransport::default());
        let mut bo = Backoffer::uncancellable(BackoffConfig::for_testing());
        let sender = RegionRequestSender::new(
            cache,
            transport.clone(),
        );
        let unknown = RegionVerId::new(RegionId::new(1), RegionEpoch::new(1, 2));

        let resp = sender
            .send_coprocessor(
                &mut bo,
                CopRequest::new(CopKind::Dag, "plan", Vec::new()),
                &unknown,
                TIMEOUT,
            )
            .await
            .unwrap();
        assert_eq!(resp.region_error, Some(RegionError::stale_epoch()));
        assert!(transport.addrs().is_empty());
        assert_eq!(sender.metrics().snapshot().stale_short_circuits, 1);
    }
}
