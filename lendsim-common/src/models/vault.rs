use alloy_primitives::{Address, U256};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::{
    math::{mul_div, MathError, RoundingDirection, VIRTUAL_ASSETS},
    models::MarketId,
};

/// State of a pooled lending vault that allocates its deposits across markets.
///
/// The vault is itself an ERC20: its address is also the address of its share token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    pub address: Address,
    /// The underlying asset deposited into the vault.
    pub asset: Address,
    /// Share token decimals.
    pub decimals: u8,
    /// Difference between share and asset decimals, used to size virtual shares.
    pub decimals_offset: u8,
    pub total_assets: U256,
    pub total_supply: U256,
    pub last_total_assets: U256,
    /// Performance fee, WAD scaled.
    pub fee: U256,
    pub owner: Address,
    pub curator: Address,
    /// Markets deposits are routed to, in order.
    pub supply_queue: Vec<MarketId>,
    /// Markets withdrawals are served from, in order.
    pub withdraw_queue: Vec<MarketId>,
}

impl Vault {
    /// Every market the vault may allocate to or from: the supply queue followed by the
    /// withdraw-queue markets not already in it.
    pub fn queued_markets(&self) -> IndexSet<MarketId> {
        self.supply_queue
            .iter()
            .chain(self.withdraw_queue.iter())
            .copied()
            .collect()
    }

    pub fn virtual_shares(&self) -> U256 {
        U256::from(10).pow(U256::from(self.decimals_offset))
    }

    pub fn to_assets(&self, shares: U256, rounding: RoundingDirection) -> Result<U256, MathError> {
        mul_div(
            shares,
            self.total_assets + VIRTUAL_ASSETS,
            self.total_supply + self.virtual_shares(),
            rounding,
        )
    }

    pub fn to_shares(&self, assets: U256, rounding: RoundingDirection) -> Result<U256, MathError> {
        mul_div(
            assets,
            self.total_supply + self.virtual_shares(),
            self.total_assets + VIRTUAL_ASSETS,
            rounding,
        )
    }
}

/// Public allocator limits on how much may flow into or out of a market for one vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicAllocatorMarketConfig {
    pub max_in: U256,
    pub max_out: U256,
}

/// A vault's configuration for one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultMarketConfig {
    pub vault: Address,
    pub market_id: MarketId,
    /// Maximum assets the vault may supply to the market.
    pub cap: U256,
    /// Cap waiting for the timelock, if any.
    pub pending_cap: Option<PendingCap>,
    /// Timestamp after which the market can be removed, zero if no removal is pending.
    pub removable_at: u64,
    pub enabled: bool,
    /// `None` when the public allocator has no flow caps for this market.
    pub public_allocator_config: Option<PublicAllocatorMarketConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCap {
    pub value: U256,
    pub valid_at: u64,
}

/// A user's relation to a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultUserConfig {
    pub vault: Address,
    pub user: Address,
    pub is_allocator: bool,
    /// Allowance of the vault's underlying asset granted by `user` to the vault.
    pub allowance: U256,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::vault;

    #[test]
    fn test_queued_markets_are_deduplicated_in_order() {
        let (a, b, c) =
            (MarketId::repeat_byte(1), MarketId::repeat_byte(2), MarketId::repeat_byte(3));
        let vault = vault(0x10, vec![a, b], vec![b, c, a]);

        let queued: Vec<_> = vault.queued_markets().into_iter().collect();
        assert_eq!(queued, vec![a, b, c]);
    }

    #[test]
    fn test_share_conversion_with_decimals_offset() {
        let mut vault = vault(0x10, vec![], vec![]);
        vault.decimals_offset = 12;
        vault.total_assets = U256::ZERO;
        vault.total_supply = U256::ZERO;

        let shares = vault
            .to_shares(U256::from(1_000_000), RoundingDirection::Down)
            .unwrap();
        assert_eq!(shares, U256::from(1_000_000) * U256::from(10).pow(U256::from(12)));

        vault.total_assets = U256::from(1_000_000);
        vault.total_supply = shares;
        let assets = vault
            .to_assets(shares, RoundingDirection::Down)
            .unwrap();
        assert_eq!(assets, U256::from(1_000_000));
    }
}
