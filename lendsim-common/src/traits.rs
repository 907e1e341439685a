use async_trait::async_trait;

use crate::models::{
    error::StateReadError,
    market::Market,
    token::Token,
    user::{Holding, Position, User},
    vault::{Vault, VaultMarketConfig, VaultUserConfig},
    Address, BlockInfo, MarketId,
};

/// Per-entity reads of lending protocol state.
///
/// Every read except [`StateProvider::fetch_block`] is pinned to the given block, so a set of
/// reads sharing one `BlockInfo` describes one consistent chain state. Markets are returned as
/// stored on chain; accruing their interest to the block timestamp is up to the caller.
///
/// Reads of per-account state (positions, holdings, configs) return zeroed values for accounts
/// that never interacted with the entity, exactly as the contracts do.
#[cfg_attr(feature = "test-utils", mockall::automock)]
#[async_trait]
pub trait StateProvider: Send + Sync {
    /// The latest block, used to pin all subsequent reads.
    async fn fetch_block(&self) -> Result<BlockInfo, StateReadError>;

    async fn fetch_market(&self, id: MarketId, block: BlockInfo) -> Result<Market, StateReadError>;

    async fn fetch_user(&self, address: Address, block: BlockInfo) -> Result<User, StateReadError>;

    async fn fetch_position(
        &self,
        user: Address,
        market_id: MarketId,
        block: BlockInfo,
    ) -> Result<Position, StateReadError>;

    async fn fetch_token(&self, address: Address, block: BlockInfo)
        -> Result<Token, StateReadError>;

    async fn fetch_vault(&self, address: Address, block: BlockInfo)
        -> Result<Vault, StateReadError>;

    async fn fetch_vault_market_config(
        &self,
        vault: Address,
        market_id: MarketId,
        block: BlockInfo,
    ) -> Result<VaultMarketConfig, StateReadError>;

    /// Allocator role of `user` on `vault` and its allowance of the vault's `asset` to `vault`.
    async fn fetch_vault_user_config(
        &self,
        vault: Address,
        asset: Address,
        user: Address,
        block: BlockInfo,
    ) -> Result<VaultUserConfig, StateReadError>;

    /// Balance of `user` in `token` and its allowances to the bundling contracts.
    async fn fetch_holding(
        &self,
        user: Address,
        token: Address,
        block: BlockInfo,
    ) -> Result<Holding, StateReadError>;
}
