//! In-memory state and entity builders for tests of crates that read lending state.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use alloy_primitives::U256;
use async_trait::async_trait;
use strum_macros::Display;

use crate::{
    math::{ORACLE_PRICE_SCALE, WAD},
    models::{
        error::StateReadError,
        market::{Market, MarketParams},
        token::Token,
        truncated,
        user::{Allowances, Holding, Position, User},
        vault::{Vault, VaultMarketConfig, VaultUserConfig},
        Address, BlockInfo, MarketId,
    },
    traits::StateProvider,
};

pub fn market_params(seed: u8) -> MarketParams {
    MarketParams {
        loan_token: Address::repeat_byte(seed),
        collateral_token: Address::repeat_byte(seed.wrapping_add(1)),
        oracle: Address::repeat_byte(seed.wrapping_add(2)),
        irm: Address::repeat_byte(seed.wrapping_add(3)),
        lltv: U256::from(860_000_000_000_000_000u64),
    }
}

/// A market with `supply` and `borrow` whole tokens, last updated at `1_000`.
pub fn market(seed: u8, supply: u64, borrow: u64) -> Market {
    let params = market_params(seed);
    Market {
        id: params.id(),
        params,
        total_supply_assets: U256::from(supply) * WAD,
        total_supply_shares: U256::from(supply) * WAD * U256::from(1_000_000),
        total_borrow_assets: U256::from(borrow) * WAD,
        total_borrow_shares: U256::from(borrow) * WAD * U256::from(1_000_000),
        last_update: 1_000,
        fee: U256::ZERO,
        // ~4% APR
        borrow_rate: U256::from(1_268_391_679u64),
        price: Some(ORACLE_PRICE_SCALE),
    }
}

pub fn vault(seed: u8, supply_queue: Vec<MarketId>, withdraw_queue: Vec<MarketId>) -> Vault {
    Vault {
        address: Address::repeat_byte(seed),
        asset: Address::repeat_byte(seed.wrapping_add(0x40)),
        decimals: 18,
        decimals_offset: 0,
        total_assets: U256::from(1_000) * WAD,
        total_supply: U256::from(1_000) * WAD,
        last_total_assets: U256::from(1_000) * WAD,
        fee: U256::ZERO,
        owner: Address::ZERO,
        curator: Address::ZERO,
        supply_queue,
        withdraw_queue,
    }
}

pub fn token(address: Address) -> Token {
    Token::new(address, "Token", "TKN", 18)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ReadKind {
    Block,
    Market,
    User,
    Position,
    Token,
    Vault,
    VaultMarketConfig,
    VaultUserConfig,
    Holding,
}

/// A [`StateProvider`] over fixed in-memory state at a single block.
///
/// Per-account reads of unknown keys return zeroed entities like the contracts do; unknown
/// markets, vaults and tokens are `NotFound`. Reads pinned to any other block fail. Every read
/// is counted per [`ReadKind`].
#[derive(Debug)]
pub struct InMemoryStateProvider {
    block: BlockInfo,
    markets: HashMap<MarketId, Market>,
    users: HashMap<Address, User>,
    tokens: HashMap<Address, Token>,
    vaults: HashMap<Address, Vault>,
    positions: HashMap<(Address, MarketId), Position>,
    holdings: HashMap<(Address, Address), Holding>,
    vault_market_configs: HashMap<(Address, MarketId), VaultMarketConfig>,
    vault_allowances: HashMap<(Address, Address, Address), U256>,
    failing_positions: HashSet<(Address, MarketId)>,
    reads: Mutex<HashMap<ReadKind, usize>>,
}

impl InMemoryStateProvider {
    pub fn new(block: BlockInfo) -> Self {
        Self {
            block,
            markets: HashMap::new(),
            users: HashMap::new(),
            tokens: HashMap::new(),
            vaults: HashMap::new(),
            positions: HashMap::new(),
            holdings: HashMap::new(),
            vault_market_configs: HashMap::new(),
            vault_allowances: HashMap::new(),
            failing_positions: HashSet::new(),
            reads: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_market(mut self, market: Market) -> Self {
        self.markets.insert(market.id, market);
        self
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.users.insert(user.address, user);
        self
    }

    pub fn with_token(mut self, token: Token) -> Self {
        self.tokens.insert(token.address, token);
        self
    }

    pub fn with_vault(mut self, vault: Vault) -> Self {
        self.vaults.insert(vault.address, vault);
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.positions
            .insert((position.user, position.market_id), position);
        self
    }

    pub fn with_holding(mut self, holding: Holding) -> Self {
        self.holdings
            .insert((holding.user, holding.token), holding);
        self
    }

    pub fn with_vault_market_config(mut self, config: VaultMarketConfig) -> Self {
        self.vault_market_configs
            .insert((config.vault, config.market_id), config);
        self
    }

    /// Allowance of `asset` granted by `user` to `vault`.
    pub fn with_vault_allowance(
        mut self,
        asset: Address,
        user: Address,
        vault: Address,
        amount: U256,
    ) -> Self {
        self.vault_allowances
            .insert((asset, user, vault), amount);
        self
    }

    /// Makes the position read for `(user, market_id)` fail.
    pub fn with_failing_position(mut self, user: Address, market_id: MarketId) -> Self {
        self.failing_positions
            .insert((user, market_id));
        self
    }

    /// Number of reads of `kind` served so far.
    pub fn reads(&self, kind: ReadKind) -> usize {
        self.reads
            .lock()
            .map(|reads| reads.get(&kind).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn record(&self, kind: ReadKind, block: Option<BlockInfo>) -> Result<(), StateReadError> {
        if let Ok(mut reads) = self.reads.lock() {
            *reads.entry(kind).or_default() += 1;
        }
        match block {
            Some(block) if block != self.block => Err(StateReadError::RequestFailed(format!(
                "{kind} read at {block}, state is at {}",
                self.block
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl StateProvider for InMemoryStateProvider {
    async fn fetch_block(&self) -> Result<BlockInfo, StateReadError> {
        self.record(ReadKind::Block, None)?;
        Ok(self.block)
    }

    async fn fetch_market(&self, id: MarketId, block: BlockInfo) -> Result<Market, StateReadError> {
        self.record(ReadKind::Market, Some(block))?;
        self.markets
            .get(&id)
            .cloned()
            .ok_or_else(|| StateReadError::not_found("Market", truncated(id)))
    }

    async fn fetch_user(&self, address: Address, block: BlockInfo) -> Result<User, StateReadError> {
        self.record(ReadKind::User, Some(block))?;
        Ok(self
            .users
            .get(&address)
            .cloned()
            .unwrap_or(User { address, is_adapter_authorized: false, nonce: U256::ZERO }))
    }

    async fn fetch_position(
        &self,
        user: Address,
        market_id: MarketId,
        block: BlockInfo,
    ) -> Result<Position, StateReadError> {
        self.record(ReadKind::Position, Some(block))?;
        if self
            .failing_positions
            .contains(&(user, market_id))
        {
            return Err(StateReadError::RequestFailed(format!(
                "position {}/{} unavailable",
                truncated(user),
                truncated(market_id)
            )));
        }
        Ok(self
            .positions
            .get(&(user, market_id))
            .cloned()
            .unwrap_or(Position {
                user,
                market_id,
                supply_shares: U256::ZERO,
                borrow_shares: U256::ZERO,
                collateral: U256::ZERO,
            }))
    }

    async fn fetch_token(
        &self,
        address: Address,
        block: BlockInfo,
    ) -> Result<Token, StateReadError> {
        self.record(ReadKind::Token, Some(block))?;
        self.tokens
            .get(&address)
            .cloned()
            .ok_or_else(|| StateReadError::not_found("Token", truncated(address)))
    }

    async fn fetch_vault(
        &self,
        address: Address,
        block: BlockInfo,
    ) -> Result<Vault, StateReadError> {
        self.record(ReadKind::Vault, Some(block))?;
        self.vaults
            .get(&address)
            .cloned()
            .ok_or_else(|| StateReadError::not_found("Vault", truncated(address)))
    }

    async fn fetch_vault_market_config(
        &self,
        vault: Address,
        market_id: MarketId,
        block: BlockInfo,
    ) -> Result<VaultMarketConfig, StateReadError> {
        self.record(ReadKind::VaultMarketConfig, Some(block))?;
        Ok(self
            .vault_market_configs
            .get(&(vault, market_id))
            .cloned()
            .unwrap_or(VaultMarketConfig {
                vault,
                market_id,
                cap: U256::ZERO,
                pending_cap: None,
                removable_at: 0,
                enabled: false,
                public_allocator_config: None,
            }))
    }

    async fn fetch_vault_user_config(
        &self,
        vault: Address,
        asset: Address,
        user: Address,
        block: BlockInfo,
    ) -> Result<VaultUserConfig, StateReadError> {
        self.record(ReadKind::VaultUserConfig, Some(block))?;
        let allowance = self
            .vault_allowances
            .get(&(asset, user, vault))
            .copied()
            .unwrap_or(U256::ZERO);
        Ok(VaultUserConfig { vault, user, is_allocator: false, allowance })
    }

    async fn fetch_holding(
        &self,
        user: Address,
        token: Address,
        block: BlockInfo,
    ) -> Result<Holding, StateReadError> {
        self.record(ReadKind::Holding, Some(block))?;
        Ok(self
            .holdings
            .get(&(user, token))
            .cloned()
            .unwrap_or(Holding {
                user,
                token,
                balance: U256::ZERO,
                allowances: Allowances::default(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_provider_counts_and_pins_reads() {
        let block = BlockInfo::new(10, 1_000);
        let market = market(1, 100, 10);
        let provider = InMemoryStateProvider::new(block).with_market(market.clone());

        assert_eq!(provider.fetch_block().await.unwrap(), block);
        assert_eq!(provider.fetch_market(market.id, block).await.unwrap(), market);
        assert!(matches!(
            provider
                .fetch_market(MarketId::repeat_byte(0xff), block)
                .await,
            Err(StateReadError::NotFound { entity: "Market", .. })
        ));
        assert!(provider
            .fetch_market(market.id, BlockInfo::new(11, 1_012))
            .await
            .is_err());

        let position = provider
            .fetch_position(Address::repeat_byte(0x11), market.id, block)
            .await
            .unwrap();
        assert!(position.is_empty());

        assert_eq!(provider.reads(ReadKind::Block), 1);
        assert_eq!(provider.reads(ReadKind::Market), 3);
        assert_eq!(provider.reads(ReadKind::Position), 1);
        assert_eq!(provider.reads(ReadKind::Holding), 0);
    }
}
