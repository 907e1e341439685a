//! Retry of transient JSON-RPC failures with exponential backoff.

use std::time::Duration;

use alloy::{
    rpc::json_rpc::ErrorPayload,
    transports::{RpcError, TransportErrorKind},
};
use backoff::{exponential::ExponentialBackoffBuilder, ExponentialBackoff};
use serde::Deserialize;
use serde_json::value::RawValue;
use tracing::debug;

use crate::rpc::config::RPCRetryConfig;

/// Classification of alloy RPC errors into transient and permanent failures.
///
/// Adapted from alloy-transport:
/// https://github.com/alloy-rs/alloy/blob/a3899575fbc0c789275f95661516b99e9a92838d/crates/transport/src/error.rs#L156
/// License: MIT OR Apache-2.0
pub(crate) trait RpcErrorExt {
    /// `true` for rate limiting (429), unavailable (503), null responses and retryable
    /// JSON-RPC error codes. Serialization errors and reverts are permanent.
    fn is_retryable(&self) -> bool;

    /// Backoff suggested by the provider under `data.rate.backoff_seconds`, if any.
    fn backoff_hint(&self) -> Option<Duration>;

    fn classify_error(self) -> backoff::Error<Self>
    where
        Self: Sized;
}

impl<E: std::borrow::Borrow<RawValue>> RpcErrorExt for RpcError<TransportErrorKind, E> {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_retry_err(),
            Self::SerError(_) => false,
            Self::DeserError { text, .. } => {
                if let Ok(resp) = serde_json::from_str::<ErrorPayload>(text) {
                    return resp.is_retry_err();
                }

                // some providers answer errors without an `id`
                #[derive(Deserialize)]
                struct Resp {
                    error: ErrorPayload,
                }

                serde_json::from_str::<Resp>(text)
                    .map(|resp| resp.error.is_retry_err())
                    .unwrap_or(false)
            }
            Self::ErrorResp(err) => err.is_retry_err(),
            Self::NullResp => true,
            _ => false,
        }
    }

    fn backoff_hint(&self) -> Option<Duration> {
        let Self::ErrorResp(resp) = self else {
            return None;
        };
        let data = resp
            .try_data_as::<serde_json::Value>()?
            .ok()?;
        let backoff_seconds = &data["rate"]["backoff_seconds"];
        if let Some(seconds) = backoff_seconds.as_u64() {
            return Some(Duration::from_secs(seconds));
        }
        backoff_seconds
            .as_f64()
            .map(|seconds| Duration::from_secs(seconds.ceil() as u64))
    }

    fn classify_error(self) -> backoff::Error<Self> {
        if self.is_retryable() {
            if let Some(hint) = self.backoff_hint() {
                backoff::Error::retry_after(self, hint)
            } else {
                backoff::Error::transient(self)
            }
        } else {
            backoff::Error::permanent(self)
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    backoff: ExponentialBackoff,
    max_retries: usize,
}

impl From<RPCRetryConfig> for RetryPolicy {
    fn from(config: RPCRetryConfig) -> Self {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(config.initial_backoff_ms))
            .with_multiplier(2.0)
            .with_max_interval(Duration::from_millis(config.max_backoff_ms))
            .with_max_elapsed_time(None)
            .build();
        Self { backoff, max_retries: config.max_retries }
    }
}

impl From<&RetryPolicy> for RPCRetryConfig {
    fn from(policy: &RetryPolicy) -> Self {
        RPCRetryConfig {
            max_retries: policy.max_retries,
            initial_backoff_ms: policy.backoff.initial_interval.as_millis() as u64,
            max_backoff_ms: policy.backoff.max_interval.as_millis() as u64,
        }
    }
}

impl RetryPolicy {
    /// Runs `operation`, retrying transient failures until it succeeds, a permanent error
    /// occurs or `max_retries` retries were made.
    ///
    /// Attempts are counted here: errors carrying a provider backoff hint skip `next_backoff`.
    pub(crate) async fn retry_request<F, Fut, T>(
        &self,
        mut operation: F,
    ) -> Result<T, RpcError<TransportErrorKind>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let max_retries = self.max_retries;
        let mut attempt = 0usize;
        backoff::future::retry_notify(
            self.backoff.clone(),
            || {
                let retries_left = attempt < max_retries;
                attempt += 1;
                let fut = operation();
                async move {
                    fut.await.map_err(|error| {
                        if retries_left {
                            error.classify_error()
                        } else {
                            backoff::Error::permanent(error)
                        }
                    })
                }
            },
            |error: RpcError<TransportErrorKind>, wait: Duration| {
                debug!(%error, wait_ms = wait.as_millis() as u64, "Retrying RPC request");
            },
        )
        .await
    }
}
