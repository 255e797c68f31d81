//! Shared test fixtures.
//!
//! A standard three-replica region, a cache that records every call the
//! sender makes against it, and a tracing subscriber for debugging failed
//! runs (`RUST_LOG=tessera_client=debug`).

use std::sync::{Arc, Mutex, PoisonError};

use tessera_core::{PeerId, RegionEpoch, RegionId, RegionVerId, StoreId};
use tessera_routing::{
    CacheError, MemoryRegionCache, Peer, RegionCache, RegionCacheConfig, RegionMeta,
    RegionSnapshot,
};
use tracing_subscriber::EnvFilter;

/// Number of replicas in the standard region.
pub const REPLICA_COUNT: u64 = 3;

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Address of a store in the standard fixtures.
#[must_use]
pub fn store_addr(store: u64) -> String {
    format!("store-{store}:20160")
}

/// A peer whose id matches its store id.
#[must_use]
pub const fn peer(id: u64) -> Peer {
    Peer::new(PeerId::new(id), StoreId::new(id))
}

/// Metadata for region `id` covering `[start, end)` with peers `1..=3`.
#[must_use]
pub fn region_meta(id: u64, epoch: RegionEpoch, start: &'static [u8], end: &'static [u8]) -> RegionMeta {
    RegionMeta::new(
        RegionId::new(id),
        start,
        end,
        epoch,
        (1..=REPLICA_COUNT).map(peer).collect(),
    )
}

/// The epoch of the standard region.
#[must_use]
pub const fn standard_epoch() -> RegionEpoch {
    RegionEpoch::new(1, 3)
}

/// Creates a cache knowing all three stores and holding region 1 at
/// epoch `1.3` over the whole key space, with peer 1 selected.
///
/// # Panics
///
/// Panics if the standard region fails validation.
#[must_use]
pub fn standard_cache() -> (MemoryRegionCache, RegionVerId) {
    let cache = MemoryRegionCache::new(RegionCacheConfig::for_testing());
    for store in 1..=REPLICA_COUNT {
        cache.put_store(StoreId::new(store), store_addr(store));
    }
    let ver_id = cache
        .insert_region(region_meta(1, standard_epoch(), b"", b""), None)
        .expect("standard region is valid");
    (cache, ver_id)
}

/// One call made against a [`RecordingCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheCall {
    /// `resolve_by_version`.
    Resolve(RegionVerId),
    /// `advance_peer`.
    AdvancePeer(RegionVerId),
    /// `update_leader`.
    UpdateLeader(RegionVerId, Option<PeerId>),
    /// `drop_region`.
    Drop(RegionVerId),
    /// `replace_with_successors`, with the successor versions.
    Replace(RegionVerId, Vec<RegionVerId>),
}

/// A [`MemoryRegionCache`] that records every trait call.
#[derive(Debug)]
pub struct RecordingCache {
    inner: MemoryRegionCache,
    calls: Mutex<Vec<CacheCall>>,
}

impl RecordingCache {
    /// Wraps `inner`.
    #[must_use]
    pub const fn new(inner: MemoryRegionCache) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Creates a recording cache over [`standard_cache`].
    #[must_use]
    pub fn standard() -> (Arc<Self>, RegionVerId) {
        let (cache, ver_id) = standard_cache();
        (Arc::new(Self::new(cache)), ver_id)
    }

    /// Returns the wrapped cache.
    #[must_use]
    pub const fn inner(&self) -> &MemoryRegionCache {
        &self.inner
    }

    /// Returns every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<CacheCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns every call except lookups.
    #[must_use]
    pub fn mutations(&self) -> Vec<CacheCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, CacheCall::Resolve(_)))
            .collect()
    }

    /// Returns the number of recorded calls matching `pred`.
    #[must_use]
    pub fn count(&self, pred: impl Fn(&CacheCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: CacheCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

impl RegionCache for RecordingCache {
    fn resolve_by_version(&self, ver_id: &RegionVerId) -> Option<RegionSnapshot> {
        self.record(CacheCall::Resolve(*ver_id));
        self.inner.resolve_by_version(ver_id)
    }

    fn advance_peer(&self, ver_id: &RegionVerId) {
        self.record(CacheCall::AdvancePeer(*ver_id));
        self.inner.advance_peer(ver_id);
    }

    fn update_leader(&self, ver_id: &RegionVerId, leader: Option<PeerId>) {
        self.record(CacheCall::UpdateLeader(*ver_id, leader));
        self.inner.update_leader(ver_id, leader);
    }

    fn drop_region(&self, ver_id: &RegionVerId) {
        self.record(CacheCall::Drop(*ver_id));
        self.inner.drop_region(ver_id);
    }

    fn replace_with_successors(
        &self,
        ver_id: &RegionVerId,
        successors: Vec<RegionMeta>,
    ) -> Result<(), CacheError> {
        self.record(CacheCall::Replace(
            *ver_id,
            successors.iter().map(RegionMeta::ver_id).collect(),
        ));
        self.inner.replace_with_successors(ver_id, successors)
    }
}
