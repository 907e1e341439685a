use std::collections::BTreeMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::models::{
    market::Market,
    token::Token,
    user::{Holding, Position, User},
    vault::{Vault, VaultMarketConfig, VaultUserConfig},
    BlockInfo, MarketId,
};

/// A consistent, single-block view of the lending protocol state relevant to one action.
///
/// Every entity was read at `block`, and markets have their interest accrued to
/// `block.timestamp`. Maps are ordered so two snapshots of the same chain state are equal and
/// serialise identically. The snapshot exposes no mutating API; build a new one per action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    block: BlockInfo,
    markets: BTreeMap<MarketId, Market>,
    users: BTreeMap<Address, User>,
    tokens: BTreeMap<Address, Token>,
    vaults: BTreeMap<Address, Vault>,
    positions: BTreeMap<Address, BTreeMap<MarketId, Position>>,
    holdings: BTreeMap<Address, BTreeMap<Address, Holding>>,
    vault_market_configs: BTreeMap<Address, BTreeMap<MarketId, VaultMarketConfig>>,
    vault_user_configs: BTreeMap<Address, BTreeMap<Address, VaultUserConfig>>,
}

/// The flat vectors produced by the fetch stages, in the order they were fetched.
#[derive(Debug, Clone, Default)]
pub struct SnapshotParts {
    pub markets: Vec<Market>,
    pub users: Vec<User>,
    pub tokens: Vec<Token>,
    pub vaults: Vec<Vault>,
    pub positions: Vec<Position>,
    pub holdings: Vec<Holding>,
    pub vault_market_configs: Vec<VaultMarketConfig>,
    pub vault_user_configs: Vec<VaultUserConfig>,
}

impl SimulationSnapshot {
    /// Folds the fetched entities into nested maps keyed exactly as they were fetched.
    pub fn assemble(block: BlockInfo, parts: SnapshotParts) -> Self {
        let mut positions: BTreeMap<Address, BTreeMap<MarketId, Position>> = BTreeMap::new();
        for position in parts.positions {
            positions
                .entry(position.user)
                .or_default()
                .insert(position.market_id, position);
        }

        let mut holdings: BTreeMap<Address, BTreeMap<Address, Holding>> = BTreeMap::new();
        for holding in parts.holdings {
            holdings
                .entry(holding.user)
                .or_default()
                .insert(holding.token, holding);
        }

        let mut vault_market_configs: BTreeMap<Address, BTreeMap<MarketId, VaultMarketConfig>> =
            BTreeMap::new();
        for config in parts.vault_market_configs {
            vault_market_configs
                .entry(config.vault)
                .or_default()
                .insert(config.market_id, config);
        }

        let mut vault_user_configs: BTreeMap<Address, BTreeMap<Address, VaultUserConfig>> =
            BTreeMap::new();
        for config in parts.vault_user_configs {
            vault_user_configs
                .entry(config.vault)
                .or_default()
                .insert(config.user, config);
        }

        Self {
            block,
            markets: parts
                .markets
                .into_iter()
                .map(|market| (market.id, market))
                .collect(),
            users: parts
                .users
                .into_iter()
                .map(|user| (user.address, user))
                .collect(),
            tokens: parts
                .tokens
                .into_iter()
                .map(|token| (token.address, token))
                .collect(),
            vaults: parts
                .vaults
                .into_iter()
                .map(|vault| (vault.address, vault))
                .collect(),
            positions,
            holdings,
            vault_market_configs,
            vault_user_configs,
        }
    }

    pub fn block(&self) -> BlockInfo {
        self.block
    }

    pub fn markets(&self) -> &BTreeMap<MarketId, Market> {
        &self.markets
    }

    pub fn users(&self) -> &BTreeMap<Address, User> {
        &self.users
    }

    pub fn tokens(&self) -> &BTreeMap<Address, Token> {
        &self.tokens
    }

    pub fn vaults(&self) -> &BTreeMap<Address, Vault> {
        &self.vaults
    }

    pub fn positions(&self) -> &BTreeMap<Address, BTreeMap<MarketId, Position>> {
        &self.positions
    }

    pub fn holdings(&self) -> &BTreeMap<Address, BTreeMap<Address, Holding>> {
        &self.holdings
    }

    pub fn vault_market_configs(
        &self,
    ) -> &BTreeMap<Address, BTreeMap<MarketId, VaultMarketConfig>> {
        &self.vault_market_configs
    }

    pub fn vault_user_configs(&self) -> &BTreeMap<Address, BTreeMap<Address, VaultUserConfig>> {
        &self.vault_user_configs
    }

    pub fn market(&self, id: &MarketId) -> Option<&Market> {
        self.markets.get(id)
    }

    pub fn user(&self, address: &Address) -> Option<&User> {
        self.users.get(address)
    }

    pub fn token(&self, address: &Address) -> Option<&Token> {
        self.tokens.get(address)
    }

    pub fn vault(&self, address: &Address) -> Option<&Vault> {
        self.vaults.get(address)
    }

    pub fn position(&self, user: &Address, market_id: &MarketId) -> Option<&Position> {
        self.positions
            .get(user)
            .and_then(|by_market| by_market.get(market_id))
    }

    pub fn holding(&self, user: &Address, token: &Address) -> Option<&Holding> {
        self.holdings
            .get(user)
            .and_then(|by_token| by_token.get(token))
    }

    pub fn vault_market_config(
        &self,
        vault: &Address,
        market_id: &MarketId,
    ) -> Option<&VaultMarketConfig> {
        self.vault_market_configs
            .get(vault)
            .and_then(|by_market| by_market.get(market_id))
    }

    pub fn vault_user_config(&self, vault: &Address, user: &Address) -> Option<&VaultUserConfig> {
        self.vault_user_configs
            .get(vault)
            .and_then(|by_user| by_user.get(user))
    }
}
