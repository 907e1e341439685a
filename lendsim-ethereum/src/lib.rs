//! Ethereum JSON-RPC backend of the lendsim state reads.

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

pub mod contracts;
pub mod provider;
pub mod rpc;

pub use provider::{ContractAddresses, EthereumStateProvider};
pub use rpc::{
    config::{RPCBatchingConfig, RPCRetryConfig},
    errors::{RPCError, RequestError},
    EthereumRpcClient,
};
