//! Tessera Tests - Integration tests for region request dispatch.
//!
//! This crate exercises the sender together with the real region cache,
//! against transports that stand in for the storage cluster. All tests run
//! on tokio's paused clock unless they need real concurrency.
//!
//! ## Test Organization
//!
//! **Integration Tests** (`*_tests.rs`):
//! - `sender_tests`: Retry and error-classification behavior, driven by a
//!   scripted transport
//! - `cluster_tests`: End-to-end recovery against a simulated cluster,
//!   including concurrent senders sharing one cache
//!
//! **Support Modules**:
//! - `scripted_transport`: Answers from a fixed reply script
//! - `simulated_cluster`: Answers from a model of regions and leaders
//! - `fixtures`: Standard region, recording cache, tracing setup
//!
//! ## Naming Conventions
//!
//! - Integration tests: `test_<component>_<scenario>`
//! - Unit tests: Inline in each crate under `#[cfg(test)]`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod fixtures;
pub mod scripted_transport;
pub mod simulated_cluster;
