//! Tessera Core - Strongly-typed identifiers for the Tessera client.
//!
//! This crate provides the identifiers shared by the routing and client
//! crates: regions, peers, stores and the (region, epoch) identity used to
//! address a request at one specific version of a region.
//!
//! # Design Principles (TigerStyle)
//!
//! - **Strongly-typed IDs**: Prevent mixing up `PeerId` with `StoreId`
//! - **Explicit limits**: Every resource has a bounded maximum
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod types;

pub use error::{Error, Result};
pub use types::{PeerId, RegionEpoch, RegionId, RegionVerId, StoreId};

/// Maximum number of peers (replicas) a single region may have.
pub const REGION_PEERS_MAX: usize = 7;
