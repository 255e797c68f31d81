//! In-memory region cache.
//!
//! Regions are indexed by id and by start key. Peer selection is a cursor
//! into the region's peer list: failover advances it round-robin, leader
//! hints move it to the reported peer.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use tessera_core::{PeerId, RegionId, RegionVerId, StoreId};
use tracing::{debug, info};

use crate::cache::{CacheError, RegionCache};
use crate::region::{RegionMeta, RegionSnapshot};

/// Maximum number of cached regions.
pub const REGION_CACHE_ENTRIES_MAX: usize = 100_000;

/// Configuration for the region cache.
#[derive(Debug, Clone, Copy)]
pub struct RegionCacheConfig {
    /// Maximum number of regions held at once.
    pub max_regions: usize,
}

impl Default for RegionCacheConfig {
    fn default() -> Self {
        Self {
            max_regions: REGION_CACHE_ENTRIES_MAX,
        }
    }
}

impl RegionCacheConfig {
    /// Creates a small configuration suitable for testing.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self { max_regions: 64 }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_regions` is zero or above
    /// [`REGION_CACHE_ENTRIES_MAX`].
    pub fn validate(&self) -> tessera_core::Result<()> {
        if self.max_regions == 0 {
            return Err(tessera_core::Error::InvalidArgument {
                name: "max_regions",
                reason: "cache must hold at least one region",
            });
        }
        if self.max_regions > REGION_CACHE_ENTRIES_MAX {
            return Err(tessera_core::Error::LimitExceeded {
                limit: "region_cache_entries",
                max: REGION_CACHE_ENTRIES_MAX as u64,
                actual: self.max_regions as u64,
            });
        }
        Ok(())
    }
}

/// A cached region and its peer cursor.
#[derive(Debug, Clone)]
struct CachedRegion {
    meta: RegionMeta,
    /// Index into `meta.peers` of the peer requests go to.
    selected: usize,
    /// Insertion sequence, used to pick eviction victims.
    inserted_seq: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    regions: HashMap<RegionId, CachedRegion>,
    by_start_key: BTreeMap<Bytes, RegionId>,
    stores: HashMap<StoreId, String>,
    next_seq: u64,
}

impl CacheState {
    /// Returns the cached region only if it is at exactly this version.
    fn get_exact(&self, ver_id: &RegionVerId) -> Option<&CachedRegion> {
        self.regions
            .get(&ver_id.id)
            .filter(|r| r.meta.epoch == ver_id.epoch)
    }

    fn get_exact_mut(&mut self, ver_id: &RegionVerId) -> Option<&mut CachedRegion> {
        self.regions
            .get_mut(&ver_id.id)
            .filter(|r| r.meta.epoch == ver_id.epoch)
    }

    fn remove(&mut self, region_id: RegionId) -> Option<CachedRegion> {
        let removed = self.regions.remove(&region_id)?;
        // Only unlink the index if it still points at this region.
        if self.by_start_key.get(&removed.meta.start_key) == Some(&region_id) {
            self.by_start_key.remove(&removed.meta.start_key);
        }
        Some(removed)
    }

    /// Returns the ids of cached regions whose ranges intersect `meta`.
    fn overlapping(&self, meta: &RegionMeta) -> Vec<RegionId> {
        let mut ids = Vec::new();

        // The region starting at or before `start_key` may extend into it.
        if let Some((_, &id)) = self
            .by_start_key
            .range(..=meta.start_key.clone())
            .next_back()
        {
            if self.regions.get(&id).is_some_and(|r| r.meta.overlaps(meta)) {
                ids.push(id);
            }
        }

        let upper = if meta.end_key.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(meta.end_key.clone())
        };
        for (_, &id) in self
            .by_start_key
            .range((Bound::Excluded(meta.start_key.clone()), upper))
        {
            ids.push(id);
        }
        ids
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .regions
            .values()
            .min_by_key(|r| r.inserted_seq)
            .map(|r| r.meta.id)
        {
            debug!(region = %oldest, "evicting oldest cached region");
            self.remove(oldest);
        }
    }

    fn insert(&mut self, meta: RegionMeta, selected: usize, max_regions: usize) {
        self.remove(meta.id);
        for stale in self.overlapping(&meta) {
            debug!(region = %stale, replaced_by = %meta.id, "dropping overlapping region");
            self.remove(stale);
        }
        if self.regions.len() >= max_regions {
            self.evict_oldest();
        }

        let inserted_seq = self.next_seq;
        self.next_seq += 1;
        self.by_start_key.insert(meta.start_key.clone(), meta.id);
        self.regions.insert(
            meta.id,
            CachedRegion {
                meta,
                selected,
                inserted_seq,
            },
        );
    }
}

/// Region cache held in process memory.
///
/// All state sits behind one lock and every operation takes it exactly
/// once, so each operation is atomic with respect to the others.
#[derive(Debug)]
pub struct MemoryRegionCache {
    config: RegionCacheConfig,
    state: RwLock<CacheState>,
}

impl MemoryRegionCache {
    /// Creates a new region cache with the given configuration.
    #[must_use]
    pub fn new(config: RegionCacheConfig) -> Self {
        Self {
            config,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Creates a new region cache with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RegionCacheConfig::default())
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the network address of a store.
    pub fn put_store(&self, store_id: StoreId, addr: impl Into<String>) {
        self.write().stores.insert(store_id, addr.into());
    }

    /// Inserts a region, selecting `leader` if given and a member.
    ///
    /// Cached regions whose ranges overlap the new one are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata fails validation.
    pub fn insert_region(
        &self,
        meta: RegionMeta,
        leader: Option<PeerId>,
    ) -> Result<RegionVerId, CacheError> {
        meta.validate().map_err(|source| CacheError::InvalidRegion {
            region_id: meta.id,
            source,
        })?;
        let ver_id = meta.ver_id();
        let selected = leader.and_then(|l| meta.peer_index(l)).unwrap_or(0);
        self.write().insert(meta, selected, self.config.max_regions);
        Ok(ver_id)
    }

    /// Returns the version of the cached region covering `key`.
    #[must_use]
    pub fn locate_key(&self, key: &[u8]) -> Option<RegionVerId> {
        let state = self.read();
        let (_, id) = state
            .by_start_key
            .range(..=Bytes::copy_from_slice(key))
            .next_back()?;
        state
            .regions
            .get(id)
            .filter(|r| r.meta.contains(key))
            .map(|r| r.meta.ver_id())
    }

    /// Returns the cached metadata for a region, at whatever epoch it is
    /// cached.
    #[must_use]
    pub fn region(&self, region_id: RegionId) -> Option<RegionMeta> {
        self.read().regions.get(&region_id).map(|r| r.meta.clone())
    }

    /// Returns the number of cached regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().regions.len()
    }

    /// Returns true if no region is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().regions.is_empty()
    }
}

impl Default for MemoryRegionCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl RegionCache for MemoryRegionCache {
    fn resolve_by_version(&self, ver_id: &RegionVerId) -> Option<RegionSnapshot> {
        let state = self.read();
        let region = state.get_exact(ver_id)?;
        let peer = *region.meta.peers.get(region.selected)?;
        let Some(addr) = state.stores.get(&peer.store_id) else {
            debug!(region = %ver_id, store = %peer.store_id, "store address unknown");
            return None;
        };
        Some(RegionSnapshot::new(&region.meta, peer, addr.clone()))
    }

    fn advance_peer(&self, ver_id: &RegionVerId) {
        let mut state = self.write();
        if let Some(region) = state.get_exact_mut(ver_id) {
            region.selected = (region.selected + 1) % region.meta.peers.len();
            debug!(
                region = %ver_id,
                peer = %region.meta.peers[region.selected],
                "switched to next peer"
            );
        }
    }

    fn update_leader(&self, ver_id: &RegionVerId, leader: Option<PeerId>) {
        let mut state = self.write();
        let Some(region) = state.get_exact_mut(ver_id) else {
            return;
        };

        match leader {
            Some(leader) => {
                if let Some(idx) = region.meta.peer_index(leader) {
                    region.selected = idx;
                    debug!(region = %ver_id, leader = %leader, "updated leader");
                } else {
                    info!(
                        region = %ver_id,
                        leader = %leader,
                        "reported leader is not a known peer, dropping region"
                    );
                    state.remove(ver_id.id);
                }
            }
            None => {
                // Election in progress; try the next replica.
                region.selected = (region.selected + 1) % region.meta.peers.len();
            }
        }
    }

    fn drop_region(&self, ver_id: &RegionVerId) {
        let mut state = self.write();
        if state.get_exact(ver_id).is_some() {
            state.remove(ver_id.id);
            debug!(region = %ver_id, "dropped region");
        }
    }

    fn replace_with_successors(
        &self,
        ver_id: &RegionVerId,
        successors: Vec<RegionMeta>,
    ) -> Result<(), CacheError> {
        for meta in &successors {
            meta.validate().map_err(|source| CacheError::InvalidRegion {
                region_id: meta.id,
                source,
            })?;
        }

        let mut state = self.write();
        let served_by = state
            .get_exact(ver_id)
            .and_then(|r| r.meta.peers.get(r.selected))
            .map(|p| p.store_id);
        if state.get_exact(ver_id).is_some() {
            state.remove(ver_id.id);
        }

        debug!(
            region = %ver_id,
            successors = successors.len(),
            "replacing stale region"
        );
        for meta in successors {
            // A concurrent request may already have cached a newer epoch.
            if let Some(cached) = state
                .regions
                .get(&meta.id)
                .filter(|r| meta.epoch.is_stale_against(&r.meta.epoch))
            {
                debug!(
                    region = %meta.ver_id(),
                    cached = %cached.meta.ver_id(),
                    "skipping successor older than cached region"
                );
                continue;
            }
            let selected = served_by
                .and_then(|store| meta.peer_index_on_store(store))
                .unwrap_or(0);
            state.insert(meta, selected, self.config.max_regions);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tessera_core::RegionEpoch;

    use super::*;
    use crate::region::Peer;

    fn meta(id: u64, version: u64, start: &'static [u8], end: &'static [u8], peers: &[u64]) -> RegionMeta {
        RegionMeta::new(
            RegionId::new(id),
            start,
            end,
            RegionEpoch::new(1, version),
            peers
                .iter()
                .map(|&p| Peer::new(PeerId::new(p), StoreId::new(p)))
                .collect(),
        )
    }

    fn cache_with_stores() -> MemoryRegionCache {
        let cache = MemoryRegionCache::with_defaults();
        for store in 1..=4 {
            cache.put_store(StoreId::new(store), format!("store{store}:20160"));
        }
        cache
    }

    #[test]
    fn test_resolve_exact_version_only() {
        let cache = cache_with_stores();
        let ver = cache.insert_region(meta(1, 3, b"", b"", &[1, 2, 3]), None).unwrap();

        let snapshot = cache.resolve_by_version(&ver).unwrap();
        assert_eq!(snapshot.address(), "store1:20160");
        assert_eq!(snapshot.context().epoch, RegionEpoch::new(1, 3));

        let older = RegionVerId::new(RegionId::new(1), RegionEpoch::new(1, 2));
        assert!(cache.resolve_by_version(&older).is_none());
    }

    #[test]
    fn test_resolve_requires_store_address() {
        let cache = MemoryRegionCache::with_defaults();
        let ver = cache.insert_region(meta(1, 1, b"", b"", &[1]), None).unwrap();
        assert!(cache.resolve_by_version(&ver).is_none());

        cache.put_store(StoreId::new(1), "store1:20160");
        assert!(cache.resolve_by_version(&ver).is_some());
    }

    #[test]
    fn test_advance_peer_round_robin() {
        let cache = cache_with_stores();
        let ver = cache.insert_region(meta(1, 1, b"", b"", &[1, 2, 3]), None).unwrap();

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(cache.resolve_by_version(&ver).unwrap().peer().id.get());
            cache.advance_peer(&ver);
        }
        assert_eq!(seen, vec![1, 2, 3, 1]);
    }

    #[test]
    fn test_insert_with_leader() {
        let cache = cache_with_stores();
        let ver = cache
            .insert_region(meta(1, 1, b"", b"", &[1, 2, 3]), Some(PeerId::new(3)))
            .unwrap();
        assert_eq!(cache.resolve_by_version(&ver).unwrap().peer().id, PeerId::new(3));
    }

    #[test]
    fn test_update_leader() {
        let cache = cache_with_stores();
        let ver = cache.insert_region(meta(1, 1, b"", b"", &[1, 2, 3]), None).unwrap();

        cache.update_leader(&ver, Some(PeerId::new(2)));
        assert_eq!(cache.resolve_by_version(&ver).unwrap().peer().id, PeerId::new(2));

        // Unknown leader moves on to the next replica.
        cache.update_leader(&ver, None);
        assert_eq!(cache.resolve_by_version(&ver).unwrap().peer().id, PeerId::new(3));
    }

    #[test]
    fn test_update_leader_non_member_drops_region() {
        let cache = cache_with_stores();
        let ver = cache.insert_region(meta(1, 1, b"", b"", &[1, 2, 3]), None).unwrap();

        cache.update_leader(&ver, Some(PeerId::new(99)));
        assert!(cache.resolve_by_version(&ver).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_mutations_ignore_other_epochs() {
        let cache = cache_with_stores();
        let ver = cache.insert_region(meta(1, 5, b"", b"", &[1, 2, 3]), None).unwrap();
        let stale = RegionVerId::new(RegionId::new(1), RegionEpoch::new(1, 4));

        cache.advance_peer(&stale);
        cache.drop_region(&stale);
        cache.update_leader(&stale, Some(PeerId::new(3)));

        assert_eq!(cache.resolve_by_version(&ver).unwrap().peer().id, PeerId::new(1));
    }

    #[test]
    fn test_drop_region() {
        let cache = cache_with_stores();
        let ver = cache.insert_region(meta(1, 1, b"a", b"m", &[1]), None).unwrap();
        assert_eq!(cache.locate_key(b"c"), Some(ver));

        cache.drop_region(&ver);
        assert!(cache.resolve_by_version(&ver).is_none());
        assert_eq!(cache.locate_key(b"c"), None);
    }

    #[test]
    fn test_locate_key() {
        let cache = cache_with_stores();
        let left = cache.insert_region(meta(1, 1, b"", b"m", &[1]), None).unwrap();
        let right = cache.insert_region(meta(2, 1, b"m", b"", &[2]), None).unwrap();

        assert_eq!(cache.locate_key(b""), Some(left));
        assert_eq!(cache.locate_key(b"lzzz"), Some(left));
        assert_eq!(cache.locate_key(b"m"), Some(right));
        assert_eq!(cache.locate_key(b"zzz"), Some(right));
    }

    #[test]
    fn test_locate_key_gap() {
        let cache = cache_with_stores();
        cache.insert_region(meta(1, 1, b"a", b"c", &[1]), None).unwrap();
        assert_eq!(cache.locate_key(b"d"), None);
        assert_eq!(cache.locate_key(b"0"), None);
    }

    #[test]
    fn test_replace_with_successors_after_split() {
        let cache = cache_with_stores();
        let stale = cache.insert_region(meta(1, 3, b"", b"", &[1, 2, 3]), None).unwrap();
        cache.update_leader(&stale, Some(PeerId::new(2)));

        let left = meta(1, 4, b"", b"m", &[1, 2, 3]);
        let right = meta(7, 4, b"m", b"", &[4, 2, 1]);
        cache
            .replace_with_successors(&stale, vec![left.clone(), right.clone()])
            .unwrap();

        assert!(cache.resolve_by_version(&stale).is_none());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.locate_key(b"a"), Some(left.ver_id()));
        assert_eq!(cache.locate_key(b"x"), Some(right.ver_id()));

        // Successors keep targeting the store that served the stale region.
        let snapshot = cache.resolve_by_version(&right.ver_id()).unwrap();
        assert_eq!(snapshot.peer().store_id, StoreId::new(2));
    }

    #[test]
    fn test_replace_with_no_successors() {
        let cache = cache_with_stores();
        let stale = cache.insert_region(meta(1, 3, b"", b"", &[1]), None).unwrap();

        cache.replace_with_successors(&stale, Vec::new()).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_replace_with_invalid_successor_changes_nothing() {
        let cache = cache_with_stores();
        let stale = cache.insert_region(meta(1, 3, b"", b"", &[1]), None).unwrap();

        let result = cache.replace_with_successors(&stale, vec![meta(1, 4, b"", b"", &[])]);
        assert!(matches!(result, Err(CacheError::InvalidRegion { .. })));
        assert!(cache.resolve_by_version(&stale).is_some());
    }

    #[test]
    fn test_replace_keeps_newer_cached_successor() {
        let cache = cache_with_stores();
        let stale = cache.insert_region(meta(1, 3, b"", b"m", &[1, 2, 3]), None).unwrap();
        let newer = cache.insert_region(meta(2, 5, b"m", b"", &[1, 2, 3]), None).unwrap();

        // This reply was computed before region 2 moved on to version 5.
        cache
            .replace_with_successors(
                &stale,
                vec![meta(1, 4, b"", b"m", &[1, 2, 3]), meta(2, 4, b"m", b"", &[1, 2, 3])],
            )
            .unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.locate_key(b"a").unwrap().epoch, RegionEpoch::new(1, 4));
        assert_eq!(cache.locate_key(b"x"), Some(newer));
        assert!(cache.resolve_by_version(&newer).is_some());
    }

    #[test]
    fn test_insert_drops_overlapping() {
        let cache = cache_with_stores();
        cache.insert_region(meta(1, 1, b"a", b"c", &[1]), None).unwrap();
        cache.insert_region(meta(2, 1, b"c", b"e", &[1]), None).unwrap();
        cache.insert_region(meta(3, 1, b"e", b"", &[1]), None).unwrap();

        // A merged region covering [b, f) replaces all three.
        cache.insert_region(meta(4, 2, b"b", b"f", &[2]), None).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.locate_key(b"d").map(|v| v.id), Some(RegionId::new(4)));
    }

    #[test]
    fn test_config_validate() {
        assert!(RegionCacheConfig::default().validate().is_ok());
        assert!(RegionCacheConfig::for_testing().validate().is_ok());
        assert!(RegionCacheConfig { max_regions: 0 }.validate().is_err());
        assert!(matches!(
            RegionCacheConfig {
                max_regions: REGION_CACHE_ENTRIES_MAX + 1
            }
            .validate(),
            Err(tessera_core::Error::LimitExceeded { .. })
        ));
    }

    #[test]
    fn test_eviction() {
        let cache = MemoryRegionCache::new(RegionCacheConfig { max_regions: 2 });
        cache.insert_region(meta(1, 1, b"a", b"b", &[1]), None).unwrap();
        cache.insert_region(meta(2, 1, b"b", b"c", &[1]), None).unwrap();
        cache.insert_region(meta(3, 1, b"c", b"d", &[1]), None).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.region(RegionId::new(1)).is_none());
        assert!(cache.region(RegionId::new(3)).is_some());
    }
}
