pub mod action;
pub mod error;
pub mod market;
pub mod snapshot;
pub mod token;
pub mod user;
pub mod vault;

use std::fmt::Display;

use serde::{Deserialize, Serialize};

pub use alloy_primitives::Address;

/// Unique identifier of an isolated lending market: the keccak hash of its encoded
/// [`market::MarketParams`].
pub type MarketId = alloy_primitives::B256;

/// The block every read of a snapshot is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockInfo {
    pub number: u64,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
}

impl BlockInfo {
    pub fn new(number: u64, timestamp: u64) -> Self {
        Self { number, timestamp }
    }
}

impl Display for BlockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} ({})", self.number, self.timestamp)
    }
}

/// Shortens an address or id for log lines, e.g. `0x123456...7890`.
pub fn truncated(value: impl Display) -> String {
    let value = value.to_string();
    if value.len() >= 14 {
        format!("{}...{}", &value[0..8], &value[value.len() - 4..])
    } else {
        value
    }
}
