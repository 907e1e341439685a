use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::{
    math::{MathError, RoundingDirection},
    models::{market::Market, MarketId},
};

/// Protocol-level state of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub address: Address,
    /// Whether the account authorised the general adapter to manage its positions.
    pub is_adapter_authorized: bool,
    /// Signature nonce used by authorisation permits.
    pub nonce: U256,
}

/// An account's position in one market, in shares (supply/borrow) and assets (collateral).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub user: Address,
    pub market_id: MarketId,
    pub supply_shares: U256,
    pub borrow_shares: U256,
    pub collateral: U256,
}

impl Position {
    pub fn is_empty(&self) -> bool {
        self.supply_shares.is_zero() && self.borrow_shares.is_zero() && self.collateral.is_zero()
    }

    /// Supplied assets, rounded down.
    pub fn supply_assets(&self, market: &Market) -> Result<U256, MathError> {
        market.to_supply_assets(self.supply_shares, RoundingDirection::Down)
    }

    /// Debt in loan assets, rounded up as the protocol does when repaying.
    pub fn borrow_assets(&self, market: &Market) -> Result<U256, MathError> {
        market.to_borrow_assets(self.borrow_shares, RoundingDirection::Up)
    }
}

/// Allowances granted by a holder to the contracts that pull funds during a bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowances {
    pub morpho: U256,
    pub general_adapter: U256,
    pub permit2: U256,
}

/// Balance and allowances of `user` for `token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub user: Address,
    pub token: Address,
    pub balance: U256,
    pub allowances: Allowances,
}
