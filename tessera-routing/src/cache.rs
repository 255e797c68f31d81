//! Region cache trait - the sender's view of region topology.
//!
//! Implementations are shared by every in-flight request, so each method
//! must be individually atomic and safe to call concurrently. Nothing is
//! promised across a sequence of calls: two requests racing to repair the
//! same region may interleave, and the cache only has to converge.

use tessera_core::{PeerId, RegionId, RegionVerId};
use thiserror::Error;

use crate::region::{RegionMeta, RegionSnapshot};

/// Errors from region cache mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Region metadata cannot be routed to.
    #[error("invalid metadata for {region_id}: {source}")]
    InvalidRegion {
        /// The offending region.
        region_id: RegionId,
        /// Why it was rejected.
        source: tessera_core::Error,
    },
}

/// Mapping from region identity to its best-known location.
pub trait RegionCache: Send + Sync {
    /// Resolves a routable snapshot for the given region version.
    ///
    /// Returns `None` if the cache does not hold this exact version. The
    /// caller's view of the region is then stale and no request should be
    /// sent.
    fn resolve_by_version(&self, ver_id: &RegionVerId) -> Option<RegionSnapshot>;

    /// Marks the selected peer as failed and selects the next one.
    fn advance_peer(&self, ver_id: &RegionVerId);

    /// Records the leader reported by a server. `None` means the server
    /// did not know the leader either.
    fn update_leader(&self, ver_id: &RegionVerId, leader: Option<PeerId>);

    /// Evicts the region, forcing full re-resolution on next use.
    fn drop_region(&self, ver_id: &RegionVerId);

    /// Replaces a stale region with the regions that succeeded it after a
    /// split or merge. `successors` may be empty.
    ///
    /// # Errors
    ///
    /// Returns an error if any successor cannot be routed to. The cache is
    /// left unchanged in that case.
    fn replace_with_successors(
        &self,
        ver_id: &RegionVerId,
        successors: Vec<RegionMeta>,
    ) -> Result<(), CacheError>;
}
