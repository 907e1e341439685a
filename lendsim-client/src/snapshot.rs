//! Assembly of a [`SimulationSnapshot`] for one action.
//!
//! A build runs in stages:
//! 0. read the latest block; every further read is pinned to it,
//! 1. derive the markets and vaults the action touches ([`EntitySets::for_action`]),
//! 2. fetch those vaults and add their supply and withdraw queues to the markets,
//! 3. derive the users: the account, the general adapter and the vaults,
//! 4. fetch markets, users, positions and vault configs as cross products,
//! 5. derive the tokens of the action,
//! 6. fetch token metadata and holdings,
//! 7. accrue every market's interest to the block timestamp,
//! 8. assemble the snapshot.
//!
//! Each batch is fetched concurrently, bounded by one semaphore per build. The first failed read
//! fails the build; there are no partial snapshots and no retries at this level.

use std::{future::Future, sync::Arc};

use futures03::future::try_join_all;
use indexmap::IndexSet;
use lendsim_common::{
    math::MathError,
    models::{
        action::{ActionContext, ActionRequest, EntitySets, Registry},
        error::StateReadError,
        market::Market,
        snapshot::{SimulationSnapshot, SnapshotParts},
        truncated,
        vault::Vault,
        Address, BlockInfo, MarketId,
    },
    traits::StateProvider,
};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument};

use crate::{cache::CachedStateProvider, config::DEFAULT_MAX_CONCURRENCY};

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error(transparent)]
    StateRead(#[from] StateReadError),
    #[error("Interest accrual failed for market {market}: {source}")]
    Accrual {
        market: String,
        #[source]
        source: MathError,
    },
    #[error("{entity} {key} is missing from the fetched state")]
    Missing { entity: &'static str, key: String },
    #[error("Concurrency limiter closed: {0}")]
    Concurrency(String),
}

/// Builds snapshots against one [`StateProvider`].
///
/// The builder is cheap to clone and holds no state between builds; every call to
/// [`SnapshotBuilder::build`] reads the chain afresh through its own request cache.
#[derive(Clone)]
pub struct SnapshotBuilder {
    provider: Arc<dyn StateProvider>,
    registry: Registry,
    general_adapter: Address,
    max_concurrency: usize,
}

impl SnapshotBuilder {
    pub fn new(
        provider: Arc<dyn StateProvider>,
        registry: Registry,
        general_adapter: Address,
    ) -> Self {
        Self { provider, registry, general_adapter, max_concurrency: DEFAULT_MAX_CONCURRENCY }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    #[instrument(
        name = "snapshot.build",
        skip(self, context),
        fields(action = context.action.kind(), account = %truncated(context.account), block)
    )]
    pub async fn build(
        &self,
        context: &ActionContext,
    ) -> Result<SimulationSnapshot, SnapshotError> {
        let provider = CachedStateProvider::new(self.provider.as_ref());
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));

        let block = provider.fetch_block().await?;
        tracing::Span::current().record("block", block.number);

        let mut sets = EntitySets::for_action(&context.action, &self.registry);
        debug!(markets = sets.markets.len(), vaults = sets.vaults.len(), "Derived entity sets");

        let vaults = fetch_all(&semaphore, sets.vaults.iter().copied(), |vault| {
            provider.fetch_vault(vault, block)
        })
        .await?;
        for vault in &vaults {
            sets.extend_markets(vault.queued_markets());
        }
        debug!(vaults = vaults.len(), markets = sets.markets.len(), "Expanded vault queues");

        let users = self.user_set(context.account, &sets.vaults);
        debug!(users = users.len(), "Derived user set");

        let vault_assets: IndexSet<(Address, Address)> = vaults
            .iter()
            .map(|vault| (vault.address, vault.asset))
            .collect();
        let (markets, user_states, positions, vault_market_configs, vault_user_configs) =
            tokio::try_join!(
                fetch_all(&semaphore, sets.markets.iter().copied(), |id| {
                    provider.fetch_market(id, block)
                }),
                fetch_all(&semaphore, users.iter().copied(), |user| {
                    provider.fetch_user(user, block)
                }),
                fetch_all(&semaphore, cross(&users, &sets.markets), |(user, id)| {
                    provider.fetch_position(user, id, block)
                }),
                fetch_all(&semaphore, cross(&sets.vaults, &sets.markets), |(vault, id)| {
                    provider.fetch_vault_market_config(vault, id, block)
                }),
                fetch_all(&semaphore, cross(&vault_assets, &users), |((vault, asset), user)| {
                    provider.fetch_vault_user_config(vault, asset, user, block)
                }),
            )?;
        debug!(
            markets = markets.len(),
            positions = positions.len(),
            vault_market_configs = vault_market_configs.len(),
            vault_user_configs = vault_user_configs.len(),
            "Fetched market and account state"
        );

        let tokens = token_set(&context.action, &markets, &vaults)?;
        debug!(tokens = tokens.len(), "Derived token set");

        let (token_states, holdings) = tokio::try_join!(
            fetch_all(&semaphore, tokens.iter().copied(), |token| {
                provider.fetch_token(token, block)
            }),
            fetch_all(&semaphore, cross(&users, &tokens), |(user, token)| {
                provider.fetch_holding(user, token, block)
            }),
        )?;
        debug!(tokens = token_states.len(), holdings = holdings.len(), "Fetched token state");

        let markets = accrue_all(markets, block)?;

        let snapshot = SimulationSnapshot::assemble(
            block,
            SnapshotParts {
                markets,
                users: user_states,
                tokens: token_states,
                vaults,
                positions,
                holdings,
                vault_market_configs,
                vault_user_configs,
            },
        );
        info!(
            block = %block,
            markets = snapshot.markets().len(),
            vaults = snapshot.vaults().len(),
            users = snapshot.users().len(),
            tokens = snapshot.tokens().len(),
            "Built simulation snapshot"
        );
        Ok(snapshot)
    }

    fn user_set(&self, account: Address, vaults: &IndexSet<Address>) -> IndexSet<Address> {
        let mut users = IndexSet::with_capacity(vaults.len() + 2);
        users.insert(account);
        users.insert(self.general_adapter);
        users.extend(vaults.iter().copied());
        users
    }
}

/// Builds the snapshot for `context` with the default concurrency.
pub async fn build_simulation_snapshot(
    provider: Arc<dyn StateProvider>,
    registry: Registry,
    general_adapter: Address,
    context: &ActionContext,
) -> Result<SimulationSnapshot, SnapshotError> {
    SnapshotBuilder::new(provider, registry, general_adapter)
        .build(context)
        .await
}

/// Runs `fetch` for every key, at most as many at once as the semaphore has permits.
async fn fetch_all<K, T, F, Fut>(
    semaphore: &Arc<Semaphore>,
    keys: impl IntoIterator<Item = K>,
    fetch: F,
) -> Result<Vec<T>, SnapshotError>
where
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<T, StateReadError>>,
{
    let tasks = keys.into_iter().map(|key| {
        let sem = semaphore.clone();
        let read = fetch(key);
        async move {
            let _permit = sem
                .acquire()
                .await
                .map_err(|err| SnapshotError::Concurrency(err.to_string()))?;
            Ok::<_, SnapshotError>(read.await?)
        }
    });
    try_join_all(tasks).await
}

fn cross<A: Copy, B: Copy>(left: &IndexSet<A>, right: &IndexSet<B>) -> Vec<(A, B)> {
    left.iter()
        .flat_map(|a| right.iter().map(move |b| (*a, *b)))
        .collect()
}

/// Vault actions move the vault's asset and its share token; market actions move the target
/// market's loan and collateral tokens.
fn token_set(
    action: &ActionRequest,
    markets: &[Market],
    vaults: &[Vault],
) -> Result<IndexSet<Address>, SnapshotError> {
    let mut tokens = IndexSet::new();
    if let Some(target) = action.target_vault() {
        let vault = vaults
            .iter()
            .find(|v| v.address == target)
            .ok_or_else(|| missing("Vault", target))?;
        tokens.insert(vault.asset);
        tokens.insert(vault.address);
    }
    if let Some(market_id) = action.target_market() {
        let market = find_market(markets, market_id)?;
        tokens.insert(market.params.loan_token);
        tokens.insert(market.params.collateral_token);
    }
    Ok(tokens)
}

fn find_market(markets: &[Market], id: MarketId) -> Result<&Market, SnapshotError> {
    markets
        .iter()
        .find(|m| m.id == id)
        .ok_or_else(|| missing("Market", id))
}

fn missing(entity: &'static str, key: impl std::fmt::Display) -> SnapshotError {
    SnapshotError::Missing { entity, key: truncated(key) }
}

fn accrue_all(markets: Vec<Market>, block: BlockInfo) -> Result<Vec<Market>, SnapshotError> {
    markets
        .into_iter()
        .map(|market| {
            market
                .accrue_interest(block.timestamp)
                .map_err(|source| SnapshotError::Accrual { market: truncated(market.id), source })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use lendsim_common::{
        models::user::{Holding, User},
        test_fixtures::{market, token, vault, InMemoryStateProvider, ReadKind},
        traits::MockStateProvider,
        U256,
    };
    use mockall::predicate::eq;
    use tracing_test::traced_test;

    use super::*;

    const YEAR: u64 = 365 * 24 * 3600;

    fn account() -> Address {
        Address::repeat_byte(0xaa)
    }

    fn adapter() -> Address {
        Address::repeat_byte(0xad)
    }

    fn block() -> BlockInfo {
        BlockInfo::new(21_000_000, 1_000 + YEAR)
    }

    fn ids(markets: &[Market]) -> Vec<MarketId> {
        markets.iter().map(|m| m.id).collect()
    }

    /// Four markets, vault 0xa0 queueing the first two and vault 0xb0 queueing the last.
    fn reallocation_state() -> (Vec<Market>, Arc<InMemoryStateProvider>) {
        let markets = vec![
            market(0x10, 1_000, 500),
            market(0x20, 2_000, 1_000),
            market(0x30, 3_000, 100),
            market(0x40, 500, 0),
        ];
        let vault_a = vault(0xa0, vec![markets[0].id, markets[1].id], vec![markets[1].id]);
        let vault_b = vault(0xb0, vec![markets[3].id], vec![]);

        let mut provider = InMemoryStateProvider::new(block())
            .with_vault(vault_a)
            .with_vault(vault_b);
        for market in &markets {
            provider = provider
                .with_market(market.clone())
                .with_token(token(market.params.loan_token))
                .with_token(token(market.params.collateral_token));
        }
        (markets, Arc::new(provider))
    }

    fn vault_supply_state() -> (Vault, Vec<Market>, Arc<InMemoryStateProvider>) {
        let markets = vec![market(0x10, 1_000, 500), market(0x20, 2_000, 1_000)];
        let target =
            vault(0xa0, vec![markets[0].id, markets[1].id], vec![markets[1].id, markets[0].id]);
        let provider = InMemoryStateProvider::new(block())
            .with_vault(target.clone())
            .with_market(markets[0].clone())
            .with_market(markets[1].clone())
            .with_token(token(target.asset))
            .with_token(token(target.address))
            .with_user(User {
                address: account(),
                is_adapter_authorized: true,
                nonce: U256::from(3),
            })
            .with_holding(Holding {
                user: account(),
                token: target.asset,
                balance: U256::from(42),
                allowances: Default::default(),
            })
            .with_vault_allowance(target.asset, account(), target.address, U256::from(9));
        (target, markets, Arc::new(provider))
    }

    #[traced_test]
    #[tokio::test]
    async fn test_vault_supply() {
        let (target, markets, provider) = vault_supply_state();
        let builder = SnapshotBuilder::new(provider.clone(), Registry::default(), adapter());
        let context =
            ActionContext::new(account(), ActionRequest::VaultSupply { vault: target.address });

        let snapshot = builder.build(&context).await.unwrap();

        assert_eq!(snapshot.block(), block());
        assert_eq!(
            snapshot.users().keys().copied().collect::<IndexSet<_>>(),
            IndexSet::from([account(), adapter(), target.address])
        );
        assert_eq!(
            snapshot.tokens().keys().copied().collect::<IndexSet<_>>(),
            IndexSet::from([target.asset, target.address])
        );
        assert_eq!(snapshot.vaults().len(), 1);
        assert_eq!(snapshot.markets().len(), 2);
        assert!(snapshot.user(&account()).unwrap().is_adapter_authorized);
        assert_eq!(snapshot.holding(&account(), &target.asset).unwrap().balance, U256::from(42));
        assert_eq!(snapshot.holding(&target.address, &target.address).unwrap().balance, U256::ZERO);
        assert!(snapshot.vault_market_config(&target.address, &markets[1].id).is_some());
        assert!(snapshot.vault_user_config(&target.address, &adapter()).is_some());
        assert_eq!(
            snapshot
                .vault_user_config(&target.address, &account())
                .unwrap()
                .allowance,
            U256::from(9)
        );

        // 3 users x 2 markets, 3 users x 2 tokens
        assert_eq!(provider.reads(ReadKind::Block), 1);
        assert_eq!(provider.reads(ReadKind::Vault), 1);
        assert_eq!(provider.reads(ReadKind::Market), 2);
        assert_eq!(provider.reads(ReadKind::Position), 6);
        assert_eq!(provider.reads(ReadKind::VaultMarketConfig), 2);
        assert_eq!(provider.reads(ReadKind::VaultUserConfig), 3);
        assert_eq!(provider.reads(ReadKind::Token), 2);
        assert_eq!(provider.reads(ReadKind::Holding), 6);
        assert!(logs_contain("Built simulation snapshot"));
    }

    #[tokio::test]
    async fn test_reallocation_fetches_registry_and_queues() {
        let (markets, provider) = reallocation_state();
        let registry = Registry {
            // unordered, with a duplicate; the target must come first regardless
            markets: vec![markets[2].id, markets[0].id, markets[2].id],
            vaults: vec![Address::repeat_byte(0xa0), Address::repeat_byte(0xb0)],
        };
        let builder =
            SnapshotBuilder::new(provider.clone(), registry, adapter()).with_max_concurrency(2);
        let context = ActionContext::new(
            account(),
            ActionRequest::MarketSupplyBorrow {
                market_id: markets[1].id,
                requires_reallocation: true,
            },
        );

        let snapshot = builder.build(&context).await.unwrap();

        // target, 2 distinct registry markets, 1 market reachable only through a vault queue
        assert_eq!(provider.reads(ReadKind::Market), 4);
        assert_eq!(provider.reads(ReadKind::Vault), 2);
        assert_eq!(snapshot.markets().len(), 4);
        assert_eq!(snapshot.vaults().len(), 2);
        // account, adapter, two vaults
        assert_eq!(snapshot.users().len(), 4);
        assert_eq!(provider.reads(ReadKind::Position), 16);
        assert_eq!(provider.reads(ReadKind::VaultMarketConfig), 8);
        assert_eq!(provider.reads(ReadKind::VaultUserConfig), 8);
        assert_eq!(
            snapshot.tokens().keys().copied().collect::<IndexSet<_>>(),
            IndexSet::from([markets[1].params.loan_token, markets[1].params.collateral_token])
        );
    }

    #[tokio::test]
    async fn test_without_reallocation_only_target_market() {
        let (markets, provider) = reallocation_state();
        let registry = Registry {
            markets: ids(&markets),
            vaults: vec![Address::repeat_byte(0xa0)],
        };
        let builder = SnapshotBuilder::new(provider.clone(), registry, adapter());
        let context = ActionContext::new(
            account(),
            ActionRequest::MarketSupplyBorrow {
                market_id: markets[2].id,
                requires_reallocation: false,
            },
        );

        let snapshot = builder.build(&context).await.unwrap();

        assert_eq!(snapshot.markets().keys().copied().collect::<Vec<_>>(), vec![markets[2].id]);
        assert!(snapshot.vaults().is_empty());
        assert!(snapshot.vault_market_configs().is_empty());
        assert_eq!(provider.reads(ReadKind::Vault), 0);
        assert_eq!(provider.reads(ReadKind::Position), 2);
    }

    #[tokio::test]
    async fn test_build_is_idempotent() {
        let (markets, provider) = reallocation_state();
        let registry =
            Registry { markets: ids(&markets), vaults: vec![Address::repeat_byte(0xa0)] };
        let builder = SnapshotBuilder::new(provider, registry, adapter());
        let context = ActionContext::new(
            account(),
            ActionRequest::MarketSupplyBorrow {
                market_id: markets[0].id,
                requires_reallocation: true,
            },
        );

        let first = builder.build(&context).await.unwrap();
        let second = builder.build(&context).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(serde_json::to_string(&first).unwrap(), serde_json::to_string(&second).unwrap());
    }

    #[tokio::test]
    async fn test_markets_are_accrued_to_block_timestamp() {
        let (markets, provider) = reallocation_state();
        let builder = SnapshotBuilder::new(provider, Registry::default(), adapter());
        let action = ActionRequest::MarketRepayWithdraw { market_id: markets[0].id };
        let context = ActionContext::new(account(), action);

        let snapshot = builder.build(&context).await.unwrap();
        let accrued = snapshot.market(&markets[0].id).unwrap();

        assert_eq!(accrued, &markets[0].accrue_interest(block().timestamp).unwrap());
        assert_eq!(accrued.last_update, block().timestamp);
        assert!(accrued.total_borrow_assets > markets[0].total_borrow_assets);
    }

    #[tokio::test]
    async fn test_single_failed_read_fails_build() {
        let (markets, provider) = reallocation_state();
        let provider = Arc::new(
            Arc::try_unwrap(provider)
                .unwrap()
                .with_failing_position(adapter(), markets[3].id),
        );
        let registry = Registry { markets: ids(&markets), vaults: vec![] };
        let builder = SnapshotBuilder::new(provider, registry, adapter());
        let context = ActionContext::new(
            account(),
            ActionRequest::MarketSupplyBorrow {
                market_id: markets[0].id,
                requires_reallocation: true,
            },
        );

        let result = builder.build(&context).await;

        assert!(matches!(
            result,
            Err(SnapshotError::StateRead(StateReadError::RequestFailed(_)))
        ));
    }

    #[tokio::test]
    async fn test_unknown_vault_fails_build() {
        let (_, provider) = reallocation_state();
        let builder = SnapshotBuilder::new(provider, Registry::default(), adapter());
        let action = ActionRequest::VaultWithdraw { vault: Address::repeat_byte(0xee) };
        let context = ActionContext::new(account(), action);

        let result = builder.build(&context).await;

        assert!(matches!(
            result,
            Err(SnapshotError::StateRead(StateReadError::NotFound { entity: "Vault", .. }))
        ));
    }

    #[tokio::test]
    async fn test_every_read_is_pinned_to_fetched_block() {
        let target = market(0x10, 1_000, 500);
        let pinned = block();
        let mut provider = MockStateProvider::new();
        provider
            .expect_fetch_block()
            .times(1)
            .returning(move || Ok(pinned));
        let fetched = target.clone();
        provider
            .expect_fetch_market()
            .with(eq(target.id), eq(pinned))
            .times(1)
            .returning(move |_, _| Ok(fetched.clone()));
        provider
            .expect_fetch_user()
            .withf(move |_, b| *b == pinned)
            .times(2)
            .returning(|address, _| {
                Ok(User { address, is_adapter_authorized: false, nonce: U256::ZERO })
            });
        provider
            .expect_fetch_position()
            .withf(move |_, _, b| *b == pinned)
            .times(2)
            .returning(|user, market_id, _| {
                Ok(lendsim_common::models::user::Position {
                    user,
                    market_id,
                    supply_shares: U256::ZERO,
                    borrow_shares: U256::ZERO,
                    collateral: U256::ZERO,
                })
            });
        provider
            .expect_fetch_token()
            .withf(move |_, b| *b == pinned)
            .times(2)
            .returning(|address, _| Ok(token(address)));
        provider
            .expect_fetch_holding()
            .withf(move |_, _, b| *b == pinned)
            .times(4)
            .returning(|user, token, _| {
                Ok(Holding { user, token, balance: U256::ZERO, allowances: Default::default() })
            });
        provider.expect_fetch_vault().never();

        let snapshot = build_simulation_snapshot(
            Arc::new(provider),
            Registry::default(),
            adapter(),
            &ActionContext::new(
                account(),
                ActionRequest::MarketRepayWithdraw { market_id: target.id },
            ),
        )
        .await
        .unwrap();

        assert_eq!(snapshot.block(), pinned);
        assert_eq!(snapshot.holdings().len(), 2);
    }

    #[test]
    fn test_cross_keeps_set_order() {
        let left = IndexSet::from([1u8, 2]);
        let right = IndexSet::from(['b', 'a']);

        assert_eq!(cross(&left, &right), vec![(1, 'b'), (1, 'a'), (2, 'b'), (2, 'a')]);
    }
}
