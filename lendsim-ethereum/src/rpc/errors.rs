use std::fmt::Display;

use alloy::transports::{RpcError as AlloyRpcError, TransportErrorKind};
use lendsim_common::models::error::StateReadError;
use thiserror::Error;

pub(crate) type AlloyError = AlloyRpcError<TransportErrorKind>;

#[derive(Error, Debug)]
pub struct ReqwestError {
    pub msg: String,
    #[source]
    pub source: AlloyError,
}

impl Display for ReqwestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.msg, self.source)
    }
}

#[derive(Error, Debug)]
pub enum RequestError {
    Reqwest(ReqwestError),
    Other(String),
}

impl Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::Reqwest(e) => write!(f, "{}: {}", e.msg, e.source),
            RequestError::Other(e) => write!(f, "{e}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RPCError {
    #[error("RPC setup error: {0}")]
    SetupError(String),
    #[error("Request error: {0}")]
    RequestError(RequestError),
    #[error("Decode error: {0}")]
    DecodeError(String),
}

impl RPCError {
    pub(crate) fn from_alloy<S: ToString>(msg: S, error: AlloyError) -> Self {
        RPCError::RequestError(RequestError::Reqwest(ReqwestError {
            msg: msg.to_string(),
            source: error,
        }))
    }

    /// Whether the node executed the call and the contract reverted.
    pub fn is_revert(&self) -> bool {
        match self {
            RPCError::RequestError(RequestError::Reqwest(ReqwestError {
                source: AlloyRpcError::ErrorResp(payload),
                ..
            })) => payload.code == 3 || payload.message.contains("revert"),
            _ => false,
        }
    }
}

impl From<RPCError> for StateReadError {
    fn from(error: RPCError) -> Self {
        match error {
            RPCError::DecodeError(msg) => StateReadError::DecodeError(msg),
            other => StateReadError::RequestFailed(other.to_string()),
        }
    }
}

/// Adds context to alloy errors while converting them to [`RPCError`], like `anyhow::Context`.
pub(crate) trait RpcResultExt<T> {
    fn rpc_context<C: Display>(self, context: C) -> Result<T, RPCError>;

    fn with_rpc_context<C: Display, F: FnOnce() -> C>(self, f: F) -> Result<T, RPCError>;
}

impl<T> RpcResultExt<T> for Result<T, AlloyError> {
    fn rpc_context<C: Display>(self, context: C) -> Result<T, RPCError> {
        self.map_err(|e| RPCError::from_alloy(context.to_string(), e))
    }

    fn with_rpc_context<C: Display, F: FnOnce() -> C>(self, f: F) -> Result<T, RPCError> {
        self.map_err(|e| RPCError::from_alloy(f().to_string(), e))
    }
}
