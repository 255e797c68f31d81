//! Strongly-typed identifiers for regions, peers and stores.
//!
//! Following `TigerStyle`: explicit types prevent bugs from mixing up IDs.
//! A region id and a store id are both `u64` on the wire but never
//! interchangeable in code.

use std::fmt;

/// Macro to generate strongly-typed ID wrappers.
///
/// Each ID type wraps a u64 and provides:
/// - Type safety (can't mix `PeerId` with `StoreId`)
/// - Debug/Display formatting
/// - Zero-cost abstraction (same as raw u64)
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new ID from a raw u64 value.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.get()
            }
        }
    };
}

// Key space partitioning.
define_id!(RegionId, "region", "Unique identifier for a region (a contiguous shard of the key space).");

// Replica placement.
define_id!(PeerId, "peer", "Unique identifier for one replica of a region.");
define_id!(StoreId, "store", "Unique identifier for a storage node hosting peers.");

/// Replication epoch of a region.
///
/// `conf_ver` advances on membership changes (peer added or removed),
/// `version` advances on splits and merges. Both only ever grow.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegionEpoch {
    /// Configuration change version.
    pub conf_ver: u64,
    /// Split/merge version.
    pub version: u64,
}

impl RegionEpoch {
    /// Creates a new epoch.
    #[must_use]
    pub const fn new(conf_ver: u64, version: u64) -> Self {
        Self { conf_ver, version }
    }

    /// Returns true if `self` is strictly older than `other` in either
    /// dimension.
    #[must_use]
    pub const fn is_stale_against(&self, other: &Self) -> bool {
        self.conf_ver < other.conf_ver || self.version < other.version
    }
}

impl fmt::Debug for RegionEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch({}.{})", self.conf_ver, self.version)
    }
}

impl fmt::Display for RegionEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.conf_ver, self.version)
    }
}

/// Identifies a region at one specific epoch.
///
/// Two identities are equal iff they name the same region at the same
/// epoch. Callers capture one when they route a request and hand it back to
/// the sender unchanged; the sender only ever uses it as a cache key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionVerId {
    /// The region.
    pub id: RegionId,
    /// The epoch the caller believes the region is at.
    pub epoch: RegionEpoch,
}

impl RegionVerId {
    /// Creates a new region version identity.
    #[must_use]
    pub const fn new(id: RegionId, epoch: RegionEpoch) -> Self {
        Self { id, epoch }
    }
}

impl fmt::Debug for RegionVerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{:?}", self.id, self.epoch)
    }
}

impl fmt::Display for RegionVerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        let region = RegionId::new(42);
        assert_eq!(format!("{region}"), "region-42");
        assert_eq!(format!("{region:?}"), "region(42)");
    }

    #[test]
    fn test_id_type_safety() {
        let peer = PeerId::new(7);
        let store = StoreId::new(7);

        // Same raw value, different types.
        assert_eq!(peer.get(), store.get());
    }

    #[test]
    fn test_ver_id_equality_requires_same_epoch() {
        let a = RegionVerId::new(RegionId::new(1), RegionEpoch::new(1, 3));
        let b = RegionVerId::new(RegionId::new(1), RegionEpoch::new(1, 3));
        let c = RegionVerId::new(RegionId::new(1), RegionEpoch::new(1, 4));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(format!("{a}"), "region-1@1.3");
    }

    #[test]
    fn test_epoch_staleness() {
        let old = RegionEpoch::new(1, 3);
        let split = RegionEpoch::new(1, 4);
        let conf_change = RegionEpoch::new(2, 3);

        assert!(old.is_stale_against(&split));
        assert!(old.is_stale_against(&conf_change));
        assert!(!split.is_stale_against(&old));
        assert!(!old.is_stale_against(&old));
    }
}
