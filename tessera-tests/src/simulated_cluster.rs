//! Simulated storage cluster for end-to-end sender tests.
//!
//! The cluster plays the server side of the protocol: it owns the true
//! region layout and leadership, and answers each request by comparing the
//! caller's routing context against that truth, the way a store would.
//!
//! # Behavior
//!
//! - Down store: connection refused
//! - Missing context: other region error
//! - Unknown region: other region error
//! - Epoch mismatch: stale epoch carrying the current regions that overlap
//!   the caller's view of the range
//! - Peer is not the leader: not leader, with the leader if one is elected
//! - Otherwise: success, with the serving store id as the body
//!
//! Tests mutate the cluster (split, move leadership, kill stores) between
//! or during requests to drive the sender through recovery paths.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tessera_core::{PeerId, RegionEpoch, RegionId, RegionVerId, StoreId};
use tessera_client::{
    CopRequest, CopResponse, KvRequest, KvResponse, RegionError, Transport, TransportError,
    TransportResult,
};
use tessera_routing::{RegionMeta, RpcContext};
use tracing::debug;

#[derive(Debug, Clone)]
struct ServedRegion {
    meta: RegionMeta,
    leader: Option<PeerId>,
}

#[derive(Debug, Default)]
struct ClusterState {
    stores: BTreeMap<String, StoreId>,
    down: BTreeSet<StoreId>,
    regions: BTreeMap<RegionId, ServedRegion>,
    /// Metadata of every region version replaced by a split.
    retired: HashMap<RegionVerId, RegionMeta>,
    calls: BTreeMap<StoreId, u64>,
}

/// What the cluster decided for one request.
enum Outcome {
    Served(StoreId),
    RegionError(RegionError),
}

impl ClusterState {
    fn serve(&mut self, addr: &str, context: Option<RpcContext>) -> TransportResult<Outcome> {
        let Some(&store) = self.stores.get(addr) else {
            return Err(TransportError::Unavailable {
                addr: addr.to_string(),
                message: "no such store".to_string(),
            });
        };
        *self.calls.entry(store).or_default() += 1;
        if self.down.contains(&store) {
            return Err(TransportError::ConnectionRefused {
                addr: addr.to_string(),
            });
        }

        let Some(ctx) = context else {
            return Ok(Outcome::RegionError(RegionError::Other {
                message: "missing routing context".to_string(),
            }));
        };

        let caller_ver = RegionVerId::new(ctx.region_id, ctx.epoch);
        let current = self.regions.get(&ctx.region_id);
        if current.map(|r| r.meta.epoch) != Some(ctx.epoch) {
            let Some(old) = self
                .retired
                .get(&caller_ver)
                .or_else(|| current.map(|r| &r.meta))
            else {
                return Ok(Outcome::RegionError(RegionError::Other {
                    message: format!("{} not found", ctx.region_id),
                }));
            };
            let new_regions = self
                .regions
                .values()
                .filter(|r| r.meta.overlaps(old))
                .map(|r| r.meta.clone())
                .collect();
            return Ok(Outcome::RegionError(RegionError::StaleEpoch { new_regions }));
        }

        let Some(region) = current else {
            return Ok(Outcome::RegionError(RegionError::Other {
                message: format!("{} not found", ctx.region_id),
            }));
        };
        if region.leader != Some(ctx.peer.id) {
            let leader = region
                .leader
                .and_then(|id| region.meta.peer_index(id))
                .map(|idx| region.meta.peers[idx]);
            return Ok(Outcome::RegionError(RegionError::NotLeader {
                region_id: ctx.region_id,
                leader,
            }));
        }
        Ok(Outcome::Served(store))
    }
}

/// In-memory cluster implementing [`Transport`].
#[derive(Debug, Default)]
pub struct SimulatedCluster {
    state: Mutex<ClusterState>,
}

impl SimulatedCluster {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a store listening on `addr`.
    pub fn add_store(&self, store: StoreId, addr: impl Into<String>) {
        self.state().stores.insert(addr.into(), store);
    }

    /// Adds a region with the given leader.
    pub fn add_region(&self, meta: RegionMeta, leader: Option<PeerId>) {
        self.state()
            .regions
            .insert(meta.id, ServedRegion { meta, leader });
    }

    /// Moves leadership of a region. `None` simulates an election.
    pub fn set_leader(&self, region: RegionId, leader: Option<PeerId>) {
        if let Some(r) = self.state().regions.get_mut(&region) {
            r.leader = leader;
        }
    }

    /// Marks a store as down (refusing connections) or back up.
    pub fn set_down(&self, store: StoreId, down: bool) {
        let mut state = self.state();
        if down {
            state.down.insert(store);
        } else {
            state.down.remove(&store);
        }
    }

    /// Splits a region at `split_key`.
    ///
    /// The left half becomes `new_id`, the right half keeps the original id,
    /// and both move to the next version with the same peers and leader.
    /// Returns the two new versions, left first.
    ///
    /// # Panics
    ///
    /// Panics if the region does not exist or does not contain `split_key`.
    pub fn split(
        &self,
        region: RegionId,
        split_key: &'static [u8],
        new_id: RegionId,
    ) -> (RegionVerId, RegionVerId) {
        let mut state = self.state();
        let old = state
            .regions
            .remove(&region)
            .unwrap_or_else(|| panic!("{region} not in cluster"));
        assert!(
            old.meta.contains(split_key) && split_key != old.meta.start_key.as_ref(),
            "split key outside {region}"
        );

        let epoch = RegionEpoch::new(old.meta.epoch.conf_ver, old.meta.epoch.version + 1);
        let split_key = Bytes::from_static(split_key);
        let left = RegionMeta::new(
            new_id,
            old.meta.start_key.clone(),
            split_key.clone(),
            epoch,
            old.meta.peers.clone(),
        );
        let right = RegionMeta::new(
            region,
            split_key,
            old.meta.end_key.clone(),
            epoch,
            old.meta.peers.clone(),
        );
        let versions = (left.ver_id(), right.ver_id());
        debug!(
            region = %old.meta.ver_id(),
            left = %versions.0,
            right = %versions.1,
            "split region"
        );

        state.retired.insert(old.meta.ver_id(), old.meta);
        for meta in [left, right] {
            state.regions.insert(
                meta.id,
                ServedRegion {
                    meta,
                    leader: old.leader,
                },
            );
        }
        versions
    }

    /// Returns the current metadata of a region.
    #[must_use]
    pub fn region(&self, region: RegionId) -> Option<RegionMeta> {
        self.state().regions.get(&region).map(|r| r.meta.clone())
    }

    /// Returns the number of calls that reached `store`, including refused
    /// ones.
    #[must_use]
    pub fn calls(&self, store: StoreId) -> u64 {
        self.state().calls.get(&store).copied().unwrap_or(0)
    }

    /// Returns the number of calls across all stores.
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.state().calls.values().sum()
    }

    fn serve(&self, addr: &str, context: Option<RpcContext>) -> TransportResult<Outcome> {
        self.state().serve(addr, context)
    }
}

#[async_trait]
impl Transport for SimulatedCluster {
    async fn send_kv(
        &self,
        addr: &str,
        request: &KvRequest,
        _timeout: Duration,
    ) -> TransportResult<KvResponse> {
        // Let concurrent requests interleave between calls.
        tokio::task::yield_now().await;
        match self.serve(addr, request.context)? {
            Outcome::Served(store) => Ok(KvResponse::ok(request.kind, store.get().to_string())),
            Outcome::RegionError(err) => Ok(KvResponse::with_region_error(request.kind, err)),
        }
    }

    async fn send_coprocessor(
        &self,
        addr: &str,
        request: &CopRequest,
        _timeout: Duration,
    ) -> TransportResult<CopResponse> {
        tokio::task::yield_now().await;
        match self.serve(addr, request.context)? {
            Outcome::Served(store) => Ok(CopResponse::ok(store.get().to_string())),
            Outcome::RegionError(err) => Ok(CopResponse::with_region_error(err)),
        }
    }
}
