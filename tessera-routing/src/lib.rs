//! Tessera Routing - Region topology for request dispatch.
//!
//! This crate maps region identities to the peer a request should be sent
//! to, and exposes the repairs the request sender applies when a server
//! reports that the mapping is wrong.
//!
//! # Design (`TigerStyle`)
//!
//! - **Version-exact lookup**: A region is only resolved at the epoch the
//!   caller asked for; anything else is treated as stale
//! - **Atomic mutations**: Each cache operation takes one lock, once
//! - **Explicit limits**: The number of cached regions is bounded

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod cache;
mod memory;
mod region;

pub use cache::{CacheError, RegionCache};
pub use memory::{MemoryRegionCache, RegionCacheConfig, REGION_CACHE_ENTRIES_MAX};
pub use region::{Peer, RegionMeta, RegionSnapshot, RpcContext};
