//! Region metadata - key ranges, peers and routing contexts.
//!
//! A region covers the key range `[start_key, end_key)`. An empty
//! `end_key` means the range is unbounded above.

use std::fmt;

use bytes::Bytes;
use tessera_core::{PeerId, RegionEpoch, RegionId, RegionVerId, StoreId, REGION_PEERS_MAX};

/// One replica of a region, placed on a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer {
    /// The peer identifier.
    pub id: PeerId,
    /// The store hosting this peer.
    pub store_id: StoreId,
}

impl Peer {
    /// Creates a new peer.
    #[must_use]
    pub const fn new(id: PeerId, store_id: StoreId) -> Self {
        Self { id, store_id }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id, self.store_id)
    }
}

/// Metadata describing one region at one epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMeta {
    /// The region identifier.
    pub id: RegionId,
    /// First key covered (inclusive).
    pub start_key: Bytes,
    /// First key not covered (exclusive). Empty means unbounded.
    pub end_key: Bytes,
    /// The region's replication epoch.
    pub epoch: RegionEpoch,
    /// Peers replicating this region.
    pub peers: Vec<Peer>,
}

impl RegionMeta {
    /// Creates region metadata.
    #[must_use]
    pub fn new(
        id: RegionId,
        start_key: impl Into<Bytes>,
        end_key: impl Into<Bytes>,
        epoch: RegionEpoch,
        peers: Vec<Peer>,
    ) -> Self {
        Self {
            id,
            start_key: start_key.into(),
            end_key: end_key.into(),
            epoch,
            peers,
        }
    }

    /// Returns the version identity of this region.
    #[must_use]
    pub const fn ver_id(&self) -> RegionVerId {
        RegionVerId::new(self.id, self.epoch)
    }

    /// Returns true if this region's range contains `key`.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start_key.as_ref() && (self.end_key.is_empty() || key < self.end_key.as_ref())
    }

    /// Returns true if the ranges of `self` and `other` intersect.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        let self_below_other_end =
            other.end_key.is_empty() || self.start_key.as_ref() < other.end_key.as_ref();
        let other_below_self_end =
            self.end_key.is_empty() || other.start_key.as_ref() < self.end_key.as_ref();
        self_below_other_end && other_below_self_end
    }

    /// Returns the index of the peer with the given id.
    #[must_use]
    pub fn peer_index(&self, peer_id: PeerId) -> Option<usize> {
        self.peers.iter().position(|p| p.id == peer_id)
    }

    /// Returns the index of the first peer placed on the given store.
    #[must_use]
    pub fn peer_index_on_store(&self, store_id: StoreId) -> Option<usize> {
        self.peers.iter().position(|p| p.store_id == store_id)
    }

    /// Checks that the metadata can be routed to.
    ///
    /// # Errors
    ///
    /// Returns an error if the region has no peers, too many peers, or an
    /// empty key range.
    pub fn validate(&self) -> tessera_core::Result<()> {
        if self.peers.is_empty() {
            return Err(tessera_core::Error::InvalidArgument {
                name: "peers",
                reason: "region has no peers",
            });
        }
        if self.peers.len() > REGION_PEERS_MAX {
            return Err(tessera_core::Error::LimitExceeded {
                limit: "region_peers",
                max: REGION_PEERS_MAX as u64,
                actual: self.peers.len() as u64,
            });
        }
        if !self.end_key.is_empty() && self.start_key >= self.end_key {
            return Err(tessera_core::Error::InvalidArgument {
                name: "end_key",
                reason: "end_key must be greater than start_key",
            });
        }
        Ok(())
    }
}

/// Routing context stamped into every outgoing request.
///
/// The server compares it against its own view of the region and answers
/// with a region error when the caller's assumption is wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcContext {
    /// The region the request is addressed to.
    pub region_id: RegionId,
    /// The epoch the caller believes the region is at.
    pub epoch: RegionEpoch,
    /// The peer the request is sent to.
    pub peer: Peer,
}

impl fmt::Display for RpcContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{region: {}, epoch: {}, peer: {}}}",
            self.region_id, self.epoch, self.peer
        )
    }
}

/// Where to send a request for a region, as of one cache lookup.
///
/// A snapshot never changes after it is handed out; any cache mutation
/// requires a fresh lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionSnapshot {
    ver_id: RegionVerId,
    peers: Vec<Peer>,
    addr: String,
    context: RpcContext,
}

impl RegionSnapshot {
    /// Creates a snapshot targeting `peer` at `addr`.
    #[must_use]
    pub fn new(meta: &RegionMeta, peer: Peer, addr: String) -> Self {
        Self {
            ver_id: meta.ver_id(),
            peers: meta.peers.clone(),
            addr,
            context: RpcContext {
                region_id: meta.id,
                epoch: meta.epoch,
                peer,
            },
        }
    }

    /// Returns the region version this snapshot was resolved for.
    #[must_use]
    pub const fn ver_id(&self) -> RegionVerId {
        self.ver_id
    }

    /// Returns all peers of the region.
    #[must_use]
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    /// Returns the selected peer.
    #[must_use]
    pub const fn peer(&self) -> Peer {
        self.context.peer
    }

    /// Returns the network address of the selected peer's store.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.addr
    }

    /// Returns the routing context to embed in requests.
    #[must_use]
    pub const fn context(&self) -> RpcContext {
        self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers(ids: &[u64]) -> Vec<Peer> {
        ids.iter()
            .map(|&id| Peer::new(PeerId::new(id), StoreId::new(id)))
            .collect()
    }

    fn region(id: u64, start: &'static [u8], end: &'static [u8]) -> RegionMeta {
        RegionMeta::new(
            RegionId::new(id),
            start,
            end,
            RegionEpoch::new(1, 1),
            peers(&[1, 2, 3]),
        )
    }

    #[test]
    fn test_contains() {
        let r = region(1, b"b", b"d");
        assert!(!r.contains(b"a"));
        assert!(r.contains(b"b"));
        assert!(r.contains(b"c"));
        assert!(!r.contains(b"d"));

        let unbounded = region(2, b"d", b"");
        assert!(unbounded.contains(b"zzzz"));
        assert!(!unbounded.contains(b"c"));
    }

    #[test]
    fn test_overlaps() {
        let left = region(1, b"a", b"c");
        let right = region(2, b"c", b"e");
        let middle = region(3, b"b", b"d");
        let tail = region(4, b"d", b"");

        assert!(!left.overlaps(&right));
        assert!(left.overlaps(&middle));
        assert!(right.overlaps(&middle));
        assert!(tail.overlaps(&right));
        assert!(!tail.overlaps(&left));
    }

    #[test]
    fn test_validate() {
        assert!(region(1, b"a", b"c").validate().is_ok());
        assert!(region(1, b"", b"").validate().is_ok());

        let mut no_peers = region(1, b"a", b"c");
        no_peers.peers.clear();
        assert!(no_peers.validate().is_err());

        let inverted = region(1, b"c", b"a");
        assert!(inverted.validate().is_err());

        let mut crowded = region(1, b"a", b"c");
        crowded.peers = peers(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(matches!(
            crowded.validate(),
            Err(tessera_core::Error::LimitExceeded { actual: 8, .. })
        ));
    }

    #[test]
    fn test_snapshot_context() {
        let meta = region(1, b"a", b"c");
        let peer = meta.peers[1];
        let snapshot = RegionSnapshot::new(&meta, peer, "10.0.0.2:20160".to_string());

        assert_eq!(snapshot.ver_id(), meta.ver_id());
        assert_eq!(snapshot.address(), "10.0.0.2:20160");
        assert_eq!(snapshot.context().peer, peer);
        assert_eq!(snapshot.context().region_id, meta.id);
        assert_eq!(snapshot.peers().len(), 3);
    }
}
