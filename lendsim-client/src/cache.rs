//! Request-scoped deduplication of state reads.
//!
//! A [`RequestCache`] lives for exactly one snapshot build. It is never shared between builds,
//! so entries cannot go stale and there is no eviction or TTL.

use std::{collections::HashMap, fmt::Debug, future::Future, hash::Hash, sync::Arc};

use async_trait::async_trait;
use lendsim_common::{
    models::{
        error::StateReadError,
        market::Market,
        token::Token,
        user::{Holding, Position, User},
        vault::{Vault, VaultMarketConfig, VaultUserConfig},
        Address, BlockInfo, MarketId,
    },
    traits::StateProvider,
};
use tokio::sync::{Mutex, OnceCell};
use tracing::{instrument, trace, Level};

/// Memoizes one read per key.
///
/// Concurrent callers asking for the same key share a single in-flight read: the first one runs
/// `fetch`, the others wait on the same cell. A failed read leaves the cell empty so a later
/// caller may try again.
pub struct RequestCache<K, V> {
    name: &'static str,
    entries: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> RequestCache<K, V>
where
    K: Clone + Hash + Eq + Debug + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new(name: &'static str) -> Self {
        Self { name, entries: Mutex::new(HashMap::new()) }
    }

    #[instrument(
        name = "request.cache.get",
        level = Level::TRACE,
        skip(self, fetch),
        fields(resource = self.name)
    )]
    pub async fn get_or_fetch<E, F, Fut>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries
                .entry(key.clone())
                .or_default()
                .clone()
        };
        if cell.initialized() {
            trace!("CacheHit");
        }
        let value = cell
            .get_or_try_init(|| fetch(key))
            .await?;
        Ok(value.clone())
    }

    /// Number of keys requested so far, including failed ones.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// A [`StateProvider`] that routes every read through per-entity [`RequestCache`]s.
///
/// Block lookups are not cached: the block is read once per build and then passed into every
/// other read, where it is part of the cache key.
pub struct CachedStateProvider<'a> {
    inner: &'a dyn StateProvider,
    markets: RequestCache<(MarketId, BlockInfo), Market>,
    users: RequestCache<(Address, BlockInfo), User>,
    positions: RequestCache<(Address, MarketId, BlockInfo), Position>,
    tokens: RequestCache<(Address, BlockInfo), Token>,
    vaults: RequestCache<(Address, BlockInfo), Vault>,
    vault_market_configs: RequestCache<(Address, MarketId, BlockInfo), VaultMarketConfig>,
    vault_user_configs: RequestCache<(Address, Address, BlockInfo), VaultUserConfig>,
    holdings: RequestCache<(Address, Address, BlockInfo), Holding>,
}

impl<'a> CachedStateProvider<'a> {
    pub fn new(inner: &'a dyn StateProvider) -> Self {
        Self {
            inner,
            markets: RequestCache::new("markets"),
            users: RequestCache::new("users"),
            positions: RequestCache::new("positions"),
            tokens: RequestCache::new("tokens"),
            vaults: RequestCache::new("vaults"),
            vault_market_configs: RequestCache::new("vault_market_configs"),
            vault_user_configs: RequestCache::new("vault_user_configs"),
            holdings: RequestCache::new("holdings"),
        }
    }
}

#[async_trait]
impl StateProvider for CachedStateProvider<'_> {
    async fn fetch_block(&self) -> Result<BlockInfo, StateReadError> {
        self.inner.fetch_block().await
    }

    async fn fetch_market(&self, id: MarketId, block: BlockInfo) -> Result<Market, StateReadError> {
        self.markets
            .get_or_fetch((id, block), |(id, block)| self.inner.fetch_market(id, block))
            .await
    }

    async fn fetch_user(&self, address: Address, block: BlockInfo) -> Result<User, StateReadError> {
        self.users
            .get_or_fetch((address, block), |(address, block)| {
                self.inner.fetch_user(address, block)
            })
            .await
    }

    async fn fetch_position(
        &self,
        user: Address,
        market_id: MarketId,
        block: BlockInfo,
    ) -> Result<Position, StateReadError> {
        self.positions
            .get_or_fetch((user, market_id, block), |(user, market_id, block)| {
                self.inner
                    .fetch_position(user, market_id, block)
            })
            .await
    }

    async fn fetch_token(
        &self,
        address: Address,
        block: BlockInfo,
    ) -> Result<Token, StateReadError> {
        self.tokens
            .get_or_fetch((address, block), |(address, block)| {
                self.inner.fetch_token(address, block)
            })
            .await
    }

    async fn fetch_vault(
        &self,
        address: Address,
        block: BlockInfo,
    ) -> Result<Vault, StateReadError> {
        self.vaults
            .get_or_fetch((address, block), |(address, block)| {
                self.inner.fetch_vault(address, block)
            })
            .await
    }

    async fn fetch_vault_market_config(
        &self,
        vault: Address,
        market_id: MarketId,
        block: BlockInfo,
    ) -> Result<VaultMarketConfig, StateReadError> {
        self.vault_market_configs
            .get_or_fetch((vault, market_id, block), |(vault, market_id, block)| {
                self.inner
                    .fetch_vault_market_config(vault, market_id, block)
            })
            .await
    }

    async fn fetch_vault_user_config(
        &self,
        vault: Address,
        asset: Address,
        user: Address,
        block: BlockInfo,
    ) -> Result<VaultUserConfig, StateReadError> {
        self.vault_user_configs
            .get_or_fetch((vault, user, block), |(vault, user, block)| {
                self.inner
                    .fetch_vault_user_config(vault, asset, user, block)
            })
            .await
    }

    async fn fetch_holding(
        &self,
        user: Address,
        token: Address,
        block: BlockInfo,
    ) -> Result<Holding, StateReadError> {
        self.holdings
            .get_or_fetch((user, token, block), |(user, token, block)| {
                self.inner.fetch_holding(user, token, block)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures03::future::try_join_all;
    use lendsim_common::test_fixtures::{market, InMemoryStateProvider, ReadKind};
    use tracing_test::traced_test;

    use super::*;

    async fn counted(counter: &AtomicUsize, value: u64) -> Result<u64, StateReadError> {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(value)
    }

    #[traced_test]
    #[tokio::test]
    async fn test_sequential_access() {
        let counter = AtomicUsize::new(0);
        let cache = RequestCache::<&str, u64>::new("test");

        let first = cache
            .get_or_fetch("k0", |_| counted(&counter, 1))
            .await
            .unwrap();
        let second = cache
            .get_or_fetch("k0", |_| counted(&counter, 2))
            .await
            .unwrap();

        assert_eq!((first, second), (1, 1));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_parallel_access_shares_in_flight_read() {
        let counter = AtomicUsize::new(0);
        let cache = RequestCache::<usize, u64>::new("test");

        let tasks: Vec<_> = (0..10)
            .map(|i| cache.get_or_fetch(i % 2, |key| counted(&counter, key as u64)))
            .collect();
        let values = try_join_all(tasks)
            .await
            .expect("a task failed");

        assert_eq!(values, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().await, 2);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_failed_read_is_not_cached() {
        let counter = AtomicUsize::new(0);
        let cache = RequestCache::<&str, u64>::new("test");

        let failed = cache
            .get_or_fetch("k0", |_| async {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StateReadError::RequestFailed("boom".to_string()))
            })
            .await;
        assert!(failed.is_err());

        let value = cache
            .get_or_fetch("k0", |_| counted(&counter, 7))
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cached_provider_deduplicates_reads() {
        let block = BlockInfo::new(10, 1_000);
        let market = market(1, 100, 10);
        let inner = InMemoryStateProvider::new(block).with_market(market.clone());
        let provider = CachedStateProvider::new(&inner);

        let reads = (0..5).map(|_| provider.fetch_market(market.id, block));
        let markets = try_join_all(reads).await.unwrap();
        provider
            .fetch_position(Address::repeat_byte(0x11), market.id, block)
            .await
            .unwrap();
        provider
            .fetch_position(Address::repeat_byte(0x22), market.id, block)
            .await
            .unwrap();

        assert!(markets.iter().all(|m| m == &market));
        assert_eq!(inner.reads(ReadKind::Market), 1);
        assert_eq!(inner.reads(ReadKind::Position), 2);
    }
}
