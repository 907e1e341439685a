//! ABIs of the contracts the state provider reads.

use alloy::{
    primitives::{Address, Bytes},
    rpc::types::{TransactionInput, TransactionRequest},
    sol,
    sol_types::SolCall,
};

sol! {
    /// The lending protocol core: isolated markets, positions and authorizations.
    interface IMorpho {
        function market(bytes32 id) external view returns (
            uint128 totalSupplyAssets,
            uint128 totalSupplyShares,
            uint128 totalBorrowAssets,
            uint128 totalBorrowShares,
            uint128 lastUpdate,
            uint128 fee
        );
        function idToMarketParams(bytes32 id) external view returns (
            address loanToken,
            address collateralToken,
            address oracle,
            address irm,
            uint256 lltv
        );
        function position(bytes32 id, address user) external view returns (
            uint256 supplyShares,
            uint128 borrowShares,
            uint128 collateral
        );
        function isAuthorized(address authorizer, address authorized) external view returns (bool);
        function nonce(address authorizer) external view returns (uint256);
    }

    interface IIrm {
        struct MarketParams {
            address loanToken;
            address collateralToken;
            address oracle;
            address irm;
            uint256 lltv;
        }

        struct Market {
            uint128 totalSupplyAssets;
            uint128 totalSupplyShares;
            uint128 totalBorrowAssets;
            uint128 totalBorrowShares;
            uint128 lastUpdate;
            uint128 fee;
        }

        function borrowRateView(MarketParams memory marketParams, Market memory market)
            external view returns (uint256);
    }

    interface IOracle {
        function price() external view returns (uint256);
    }

    /// Vault allocating deposits across markets.
    interface IMetaMorpho {
        function asset() external view returns (address);
        function decimals() external view returns (uint8);
        function DECIMALS_OFFSET() external view returns (uint8);
        function totalAssets() external view returns (uint256);
        function totalSupply() external view returns (uint256);
        function lastTotalAssets() external view returns (uint256);
        function fee() external view returns (uint96);
        function owner() external view returns (address);
        function curator() external view returns (address);
        function supplyQueueLength() external view returns (uint256);
        function supplyQueue(uint256 index) external view returns (bytes32);
        function withdrawQueueLength() external view returns (uint256);
        function withdrawQueue(uint256 index) external view returns (bytes32);
        function config(bytes32 id)
            external
            view
            returns (uint184 cap, bool enabled, uint64 removableAt);
        function pendingCap(bytes32 id) external view returns (uint192 value, uint64 validAt);
        function isAllocator(address target) external view returns (bool);
    }

    interface IPublicAllocator {
        function flowCaps(address vault, bytes32 id)
            external
            view
            returns (uint128 maxIn, uint128 maxOut);
    }

    // EIP-20: https://eips.ethereum.org/EIPS/eip-20
    interface IERC20 {
        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
    }
}

/// An `eth_call` request invoking `call` on `to`.
pub fn call_request<C: SolCall>(to: Address, call: &C) -> TransactionRequest {
    TransactionRequest::default()
        .to(to)
        .input(TransactionInput::both(Bytes::from(call.abi_encode())))
}
