use serde::Deserialize;

/// Retry behaviour of the RPC transport.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RPCRetryConfig {
    /// Maximum number of retry attempts for failed requests (default: 3)
    pub max_retries: usize,
    /// Initial backoff delay in milliseconds (default: 100ms)
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds (default: 5000ms)
    pub max_backoff_ms: u64,
}

impl RPCRetryConfig {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self { max_retries, initial_backoff_ms, max_backoff_ms }
    }
}

impl Default for RPCRetryConfig {
    fn default() -> Self {
        Self { max_retries: 3, initial_backoff_ms: 100, max_backoff_ms: 5000 }
    }
}

/// Whether multi-call reads are sent as JSON-RPC batches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RPCBatchingConfig {
    #[default]
    Disabled,
    Enabled {
        /// Maximum number of calls per batch.
        max_batch_size: usize,
    },
}

impl RPCBatchingConfig {
    pub fn enabled_with_defaults() -> Self {
        Self::Enabled { max_batch_size: 50 }
    }

    /// Returns the max batch size if batching is enabled, `None` otherwise.
    pub fn max_batch_size(&self) -> Option<usize> {
        match self {
            Self::Enabled { max_batch_size } => Some(*max_batch_size),
            Self::Disabled => None,
        }
    }
}
