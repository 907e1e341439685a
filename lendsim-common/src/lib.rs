//! Shared models, traits and math used by the lendsim crates.
//!
//! The crate holds everything that is independent of a concrete chain client: the lending
//! entities that make up a [`models::snapshot::SimulationSnapshot`], the
//! [`traits::StateProvider`] seam used to read them, Morpho style fixed-point math and the
//! per-swap [`slippage`] allocator used when migrating leveraged positions.

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

pub mod math;
pub mod models;
pub mod slippage;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_fixtures;
pub mod traits;

pub use alloy_primitives::{Address, B256, U256};
