use alloy::{
    primitives::{Address, U256},
    rpc::types::BlockNumberOrTag,
    sol_types::SolCall,
};
use async_trait::async_trait;
use lendsim_common::{
    models::{
        error::StateReadError,
        market::{Market, MarketParams},
        token::Token,
        truncated,
        user::{Allowances, Holding, Position, User},
        vault::{PendingCap, PublicAllocatorMarketConfig, Vault, VaultMarketConfig, VaultUserConfig},
        BlockInfo, MarketId,
    },
    traits::StateProvider,
};
use serde::Deserialize;
use tracing::{instrument, trace};

use crate::{
    contracts::{call_request, IMetaMorpho, IMorpho, IOracle, IPublicAllocator, IERC20, IIrm},
    rpc::{errors::RPCError, EthereumRpcClient},
};

/// Addresses of the protocol contracts read by [`EthereumStateProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContractAddresses {
    pub morpho: Address,
    pub general_adapter: Address,
    pub permit2: Address,
    /// Without a public allocator, vault-market configs carry no flow caps.
    #[serde(default)]
    pub public_allocator: Option<Address>,
}

/// Reads lending state from one JSON-RPC endpoint with `eth_call`s pinned to the block number.
#[derive(Debug, Clone)]
pub struct EthereumStateProvider {
    client: EthereumRpcClient,
    contracts: ContractAddresses,
}

impl EthereumStateProvider {
    pub fn new(client: EthereumRpcClient, contracts: ContractAddresses) -> Self {
        Self { client, contracts }
    }

    pub fn contracts(&self) -> &ContractAddresses {
        &self.contracts
    }

    async fn call<C>(&self, to: Address, call: C, block: BlockInfo) -> Result<C::Return, RPCError>
    where
        C: SolCall + Send + Sync,
        C::Return: Send,
    {
        let output = self
            .client
            .eth_call(call_request(to, &call), BlockNumberOrTag::Number(block.number))
            .await?;
        trace!(signature = C::SIGNATURE, to = %truncated(to), "Decoding call output");
        C::abi_decode_returns_validate(&output)
            .map_err(|e| RPCError::DecodeError(format!("{} on {to}: {e}", C::SIGNATURE)))
    }

    /// Reads one entry of a vault queue per index, batched if the client batches.
    async fn queue<C>(
        &self,
        vault: Address,
        length: U256,
        call: impl Fn(U256) -> C,
        block: BlockInfo,
    ) -> Result<Vec<MarketId>, RPCError>
    where
        C: SolCall<Return = MarketId> + Send,
    {
        let length = usize::try_from(length)
            .map_err(|_| RPCError::DecodeError(format!("queue length {length} of {vault}")))?;
        let requests: Vec<_> = (0..length)
            .map(|index| call_request(vault, &call(U256::from(index))))
            .collect();
        self.client
            .eth_call_many(&requests, BlockNumberOrTag::Number(block.number))
            .await?
            .iter()
            .map(|output| {
                C::abi_decode_returns_validate(output).map_err(|e| {
                    RPCError::DecodeError(format!("{} on {vault}: {e}", C::SIGNATURE))
                })
            })
            .collect()
    }

    /// Oracle price, `None` for markets without an oracle or whose oracle reverts.
    async fn price(&self, oracle: Address, block: BlockInfo) -> Result<Option<U256>, RPCError> {
        if oracle.is_zero() {
            return Ok(None);
        }
        match self
            .call(oracle, IOracle::priceCall {}, block)
            .await
        {
            Ok(price) => Ok(Some(price)),
            Err(e) if e.is_revert() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn borrow_rate(
        &self,
        params: &MarketParams,
        state: &IMorpho::marketReturn,
        block: BlockInfo,
    ) -> Result<U256, RPCError> {
        if params.irm.is_zero() {
            return Ok(U256::ZERO);
        }
        let call = IIrm::borrowRateViewCall {
            marketParams: IIrm::MarketParams {
                loanToken: params.loan_token,
                collateralToken: params.collateral_token,
                oracle: params.oracle,
                irm: params.irm,
                lltv: params.lltv,
            },
            market: IIrm::Market {
                totalSupplyAssets: state.totalSupplyAssets,
                totalSupplyShares: state.totalSupplyShares,
                totalBorrowAssets: state.totalBorrowAssets,
                totalBorrowShares: state.totalBorrowShares,
                lastUpdate: state.lastUpdate,
                fee: state.fee,
            },
        };
        self.call(params.irm, call, block)
            .await
    }

    async fn flow_caps(
        &self,
        vault: Address,
        market_id: MarketId,
        block: BlockInfo,
    ) -> Result<Option<PublicAllocatorMarketConfig>, RPCError> {
        let Some(public_allocator) = self.contracts.public_allocator else {
            return Ok(None);
        };
        let caps = self
            .call(public_allocator, IPublicAllocator::flowCapsCall { vault, id: market_id }, block)
            .await?;
        if caps.maxIn == 0 && caps.maxOut == 0 {
            return Ok(None);
        }
        Ok(Some(PublicAllocatorMarketConfig {
            max_in: U256::from(caps.maxIn),
            max_out: U256::from(caps.maxOut),
        }))
    }
}

#[async_trait]
impl StateProvider for EthereumStateProvider {
    async fn fetch_block(&self) -> Result<BlockInfo, StateReadError> {
        Ok(self.client.get_latest_block().await?)
    }

    #[instrument(level = "debug", skip(self), fields(market = %truncated(id)))]
    async fn fetch_market(&self, id: MarketId, block: BlockInfo) -> Result<Market, StateReadError> {
        let morpho = self.contracts.morpho;
        let (state, params) = tokio::try_join!(
            self.call(morpho, IMorpho::marketCall { id }, block),
            self.call(morpho, IMorpho::idToMarketParamsCall { id }, block),
        )?;

        // Unknown ids decode to zeroed params.
        if params.loanToken.is_zero() {
            return Err(StateReadError::not_found("Market", truncated(id)));
        }
        let params = MarketParams {
            loan_token: params.loanToken,
            collateral_token: params.collateralToken,
            oracle: params.oracle,
            irm: params.irm,
            lltv: params.lltv,
        };

        let (borrow_rate, price) = tokio::try_join!(
            self.borrow_rate(&params, &state, block),
            self.price(params.oracle, block),
        )?;

        let last_update = u64::try_from(state.lastUpdate).map_err(|_| {
            StateReadError::DecodeError(format!("lastUpdate {} of {id}", state.lastUpdate))
        })?;

        Ok(Market {
            id,
            params,
            total_supply_assets: U256::from(state.totalSupplyAssets),
            total_supply_shares: U256::from(state.totalSupplyShares),
            total_borrow_assets: U256::from(state.totalBorrowAssets),
            total_borrow_shares: U256::from(state.totalBorrowShares),
            last_update,
            fee: U256::from(state.fee),
            borrow_rate,
            price,
        })
    }

    #[instrument(level = "debug", skip(self), fields(user = %truncated(address)))]
    async fn fetch_user(&self, address: Address, block: BlockInfo) -> Result<User, StateReadError> {
        let morpho = self.contracts.morpho;
        let (is_adapter_authorized, nonce) = tokio::try_join!(
            self.call(
                morpho,
                IMorpho::isAuthorizedCall {
                    authorizer: address,
                    authorized: self.contracts.general_adapter,
                },
                block,
            ),
            self.call(morpho, IMorpho::nonceCall { authorizer: address }, block),
        )?;
        Ok(User { address, is_adapter_authorized, nonce })
    }

    #[instrument(
        level = "debug",
        skip(self),
        fields(user = %truncated(user), market = %truncated(market_id))
    )]
    async fn fetch_position(
        &self,
        user: Address,
        market_id: MarketId,
        block: BlockInfo,
    ) -> Result<Position, StateReadError> {
        let position = self
            .call(self.contracts.morpho, IMorpho::positionCall { id: market_id, user }, block)
            .await?;
        Ok(Position {
            user,
            market_id,
            supply_shares: position.supplyShares,
            borrow_shares: U256::from(position.borrowShares),
            collateral: U256::from(position.collateral),
        })
    }

    #[instrument(level = "debug", skip(self), fields(token = %truncated(address)))]
    async fn fetch_token(
        &self,
        address: Address,
        block: BlockInfo,
    ) -> Result<Token, StateReadError> {
        let (name, symbol, decimals) = tokio::try_join!(
            self.call(address, IERC20::nameCall {}, block),
            self.call(address, IERC20::symbolCall {}, block),
            self.call(address, IERC20::decimalsCall {}, block),
        )?;
        Ok(Token { address, name, symbol, decimals })
    }

    #[instrument(level = "debug", skip(self), fields(vault = %truncated(address)))]
    async fn fetch_vault(
        &self,
        address: Address,
        block: BlockInfo,
    ) -> Result<Vault, StateReadError> {
        let (
            asset,
            decimals,
            decimals_offset,
            total_assets,
            total_supply,
            last_total_assets,
            fee,
            owner,
            curator,
            supply_queue_length,
            withdraw_queue_length,
        ) = tokio::try_join!(
            self.call(address, IMetaMorpho::assetCall {}, block),
            self.call(address, IMetaMorpho::decimalsCall {}, block),
            self.call(address, IMetaMorpho::DECIMALS_OFFSETCall {}, block),
            self.call(address, IMetaMorpho::totalAssetsCall {}, block),
            self.call(address, IMetaMorpho::totalSupplyCall {}, block),
            self.call(address, IMetaMorpho::lastTotalAssetsCall {}, block),
            self.call(address, IMetaMorpho::feeCall {}, block),
            self.call(address, IMetaMorpho::ownerCall {}, block),
            self.call(address, IMetaMorpho::curatorCall {}, block),
            self.call(address, IMetaMorpho::supplyQueueLengthCall {}, block),
            self.call(address, IMetaMorpho::withdrawQueueLengthCall {}, block),
        )?;

        let (supply_queue, withdraw_queue) = tokio::try_join!(
            self.queue(
                address,
                supply_queue_length,
                |index| IMetaMorpho::supplyQueueCall { index },
                block,
            ),
            self.queue(
                address,
                withdraw_queue_length,
                |index| IMetaMorpho::withdrawQueueCall { index },
                block,
            ),
        )?;

        Ok(Vault {
            address,
            asset,
            decimals,
            decimals_offset,
            total_assets,
            total_supply,
            last_total_assets,
            fee: U256::from(fee),
            owner,
            curator,
            supply_queue,
            withdraw_queue,
        })
    }

    #[instrument(
        level = "debug",
        skip(self),
        fields(vault = %truncated(vault), market = %truncated(market_id))
    )]
    async fn fetch_vault_market_config(
        &self,
        vault: Address,
        market_id: MarketId,
        block: BlockInfo,
    ) -> Result<VaultMarketConfig, StateReadError> {
        let (config, pending_cap, public_allocator_config) = tokio::try_join!(
            self.call(vault, IMetaMorpho::configCall { id: market_id }, block),
            self.call(vault, IMetaMorpho::pendingCapCall { id: market_id }, block),
            self.flow_caps(vault, market_id, block),
        )?;

        let pending_cap = (pending_cap.validAt != 0).then(|| PendingCap {
            value: U256::from(pending_cap.value),
            valid_at: pending_cap.validAt,
        });

        Ok(VaultMarketConfig {
            vault,
            market_id,
            cap: U256::from(config.cap),
            pending_cap,
            removable_at: config.removableAt,
            enabled: config.enabled,
            public_allocator_config,
        })
    }

    #[instrument(
        level = "debug",
        skip(self),
        fields(vault = %truncated(vault), user = %truncated(user))
    )]
    async fn fetch_vault_user_config(
        &self,
        vault: Address,
        asset: Address,
        user: Address,
        block: BlockInfo,
    ) -> Result<VaultUserConfig, StateReadError> {
        let (is_allocator, allowance) = tokio::try_join!(
            self.call(vault, IMetaMorpho::isAllocatorCall { target: user }, block),
            self.call(asset, IERC20::allowanceCall { owner: user, spender: vault }, block),
        )?;
        Ok(VaultUserConfig { vault, user, is_allocator, allowance })
    }

    #[instrument(
        level = "debug",
        skip(self),
        fields(user = %truncated(user), token = %truncated(token))
    )]
    async fn fetch_holding(
        &self,
        user: Address,
        token: Address,
        block: BlockInfo,
    ) -> Result<Holding, StateReadError> {
        let allowance = |spender| IERC20::allowanceCall { owner: user, spender };
        let (balance, morpho, general_adapter, permit2) = tokio::try_join!(
            self.call(token, IERC20::balanceOfCall { owner: user }, block),
            self.call(token, allowance(self.contracts.morpho), block),
            self.call(token, allowance(self.contracts.general_adapter), block),
            self.call(token, allowance(self.contracts.permit2), block),
        )?;
        Ok(Holding {
            user,
            token,
            balance,
            allowances: Allowances { morpho, general_adapter, permit2 },
        })
    }
}
