use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::math::descale;

/// ERC20 metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl Token {
    pub fn new(address: Address, name: &str, symbol: &str, decimals: u8) -> Self {
        Self { address, name: name.to_string(), symbol: symbol.to_string(), decimals }
    }

    /// Converts a base-unit amount of this token to a real amount.
    pub fn descale(&self, amount: U256) -> f64 {
        descale(amount, self.decimals)
    }

    /// `10^decimals`, the base-unit amount of one whole token.
    pub fn one(&self) -> U256 {
        U256::from(10).pow(U256::from(self.decimals))
    }
}
