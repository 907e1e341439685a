use std::time::Duration;

use alloy::{
    primitives::{Bytes, U64},
    rpc::{
        client::{ClientBuilder, ReqwestClient},
        types::{BlockNumberOrTag, TransactionRequest},
    },
    transports::{http::reqwest, RpcError, TransportErrorKind},
};
use futures03::future::try_join_all;
use lendsim_common::models::BlockInfo;
use serde::Deserialize;
use tracing::{debug, instrument};

pub mod config;
pub mod errors;
mod retry;

use crate::rpc::{
    config::{RPCBatchingConfig, RPCRetryConfig},
    errors::{RPCError, RequestError, RpcResultExt},
    retry::RetryPolicy,
};

/// The header fields of `eth_getBlockByNumber` a snapshot is pinned to.
#[derive(Debug, Deserialize)]
struct BlockHeader {
    number: U64,
    timestamp: U64,
}

/// Wraps the alloy `ReqwestClient` with the read methods the state provider needs, retrying
/// transient failures and optionally batching multi-call reads.
///
/// Cheap to clone: the inner client is reference counted.
#[derive(Clone, Debug)]
pub struct EthereumRpcClient {
    inner: ReqwestClient,
    batching: RPCBatchingConfig,
    retry_policy: RetryPolicy,
    url: String,
}

impl EthereumRpcClient {
    /// Creates a client with default retry and batching disabled.
    pub fn new(rpc_url: &str) -> Result<Self, RPCError> {
        let url = rpc_url
            .parse()
            .map_err(|e| RPCError::SetupError(format!("Invalid RPC URL: {e}")))?;

        let http_client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| RPCError::SetupError(format!("Failed to create HTTP client: {e}")))?;

        let rpc = ClientBuilder::default().http_with_client(http_client, url);

        Ok(Self {
            inner: rpc,
            batching: RPCBatchingConfig::default(),
            retry_policy: RPCRetryConfig::default().into(),
            url: rpc_url.to_string(),
        })
    }

    pub fn get_url(&self) -> &str {
        &self.url
    }

    pub fn get_retry_config(&self) -> RPCRetryConfig {
        (&self.retry_policy).into()
    }

    pub fn with_batching(mut self, batching_config: RPCBatchingConfig) -> Self {
        self.batching = batching_config;
        self
    }

    pub fn with_retry(mut self, retry_config: RPCRetryConfig) -> Self {
        self.retry_policy = retry_config.into();
        self
    }

    /// Number and timestamp of the latest block.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_latest_block(&self) -> Result<BlockInfo, RPCError> {
        let full_tx_objects = false;
        let header: Option<BlockHeader> = self
            .retry_policy
            .retry_request(|| async {
                self.inner
                    .request("eth_getBlockByNumber", (BlockNumberOrTag::Latest, full_tx_objects))
                    .await
            })
            .await
            .rpc_context("Failed to get latest block")?;

        let header = header.ok_or_else(|| {
            RPCError::RequestError(RequestError::Other(
                "Failed to get latest block: Block not found".to_string(),
            ))
        })?;
        Ok(BlockInfo::new(header.number.to::<u64>(), header.timestamp.to::<u64>()))
    }

    /// Executes a message call against the state at `block` without creating a transaction.
    /// See https://ethereum.org/en/developers/docs/apis/json-rpc/#eth_call
    #[instrument(level = "debug", skip(self, request))]
    pub async fn eth_call(
        &self,
        request: TransactionRequest,
        block: BlockNumberOrTag,
    ) -> Result<Bytes, RPCError> {
        self.retry_policy
            .retry_request(|| async {
                self.inner
                    .request("eth_call", (&request, block))
                    .await
            })
            .await
            .with_rpc_context(|| format!("Failed to send an eth_call request for block {block}"))
    }

    /// Executes several calls at the same block, returning outputs in request order.
    ///
    /// With batching enabled the calls are sent in JSON-RPC batches of at most
    /// `max_batch_size`; otherwise they run concurrently as individual requests.
    #[instrument(level = "debug", skip(self, requests), fields(call_count = requests.len()))]
    pub async fn eth_call_many(
        &self,
        requests: &[TransactionRequest],
        block: BlockNumberOrTag,
    ) -> Result<Vec<Bytes>, RPCError> {
        match self.batching.max_batch_size() {
            Some(max_batch_size) => {
                self.batch_eth_call(requests, block, max_batch_size)
                    .await
            }
            None => {
                try_join_all(
                    requests
                        .iter()
                        .map(|request| self.eth_call(request.clone(), block)),
                )
                .await
            }
        }
    }

    async fn batch_eth_call(
        &self,
        requests: &[TransactionRequest],
        block: BlockNumberOrTag,
        batch_size: usize,
    ) -> Result<Vec<Bytes>, RPCError> {
        if batch_size == 0 {
            return Err(RPCError::SetupError(
                "BatchingConfig max_batch_size must be at least 1".to_string(),
            ));
        }

        let mut outputs = Vec::with_capacity(requests.len());
        for chunk in requests.chunks(batch_size) {
            let batch_call = || async {
                let mut batch = self.inner.new_batch();
                let calls = chunk
                    .iter()
                    .map(|request| batch.add_call::<_, Bytes>("eth_call", &(request, block)))
                    .collect::<Result<Vec<_>, RpcError<TransportErrorKind>>>()?;

                debug!(chunk_size = chunk.len(), %block, "Sending eth_call batch");
                batch.send().await?;

                let mut chunk_outputs = Vec::with_capacity(calls.len());
                for call in calls {
                    chunk_outputs.push(call.await?);
                }
                Ok::<_, RpcError<TransportErrorKind>>(chunk_outputs)
            };

            // A retriable failure of any call retries the whole chunk.
            let chunk_outputs = self
                .retry_policy
                .retry_request(batch_call)
                .await
                .with_rpc_context(|| {
                    format!(
                        "Failed to send eth_call batch of {} calls for block {block}",
                        chunk.len()
                    )
                })?;
            outputs.extend(chunk_outputs);
        }
        Ok(outputs)
    }
}
