use std::{fs, path::Path};

use lendsim_common::models::action::Registry;
use lendsim_ethereum::{ContractAddresses, RPCBatchingConfig, RPCRetryConfig};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Missing RPC URL: set `rpc_url` in the config or pass --rpc-url")]
    MissingRpcUrl,
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Client configuration, usually loaded from a YAML file.
///
/// ```yaml
/// rpc_url: https://eth.example.org
/// chain_id: 1
/// contracts:
///   morpho: "0xBBBBBbbBBb9cC5e90e3b3Af64bdAF62C37EEFFCb"
///   general_adapter: "0x4A6c312ec70E8747a587EE860a0353cd42Be0aE0"
///   permit2: "0x000000000022D473030F116dDEE9F6B43aC78BA3"
///   public_allocator: "0xfd32fA2ca22c76dD6E550706Ad913FC6CE91c75D"
/// registry:
///   markets: ["0xb323...86cc"]
///   vaults: ["0xBEEF01735c132Ada46AA9aA4c54623cAA92A64CB"]
/// max_concurrency: 16
/// retry:
///   max_retries: 3
/// batching:
///   mode: enabled
///   max_batch_size: 50
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    pub contracts: ContractAddresses,
    /// Markets and vaults considered for public reallocation.
    #[serde(default)]
    pub registry: Registry,
    /// Upper bound on in-flight reads per snapshot build.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub retry: RPCRetryConfig,
    #[serde(default)]
    pub batching: RPCBatchingConfig,
}

fn default_chain_id() -> u64 {
    1
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

impl ClientConfig {
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        Self::from_yaml_str(&contents)
    }

    /// Replaces the configured RPC URL, if `rpc_url` is set.
    pub fn with_rpc_url(mut self, rpc_url: Option<String>) -> Self {
        if rpc_url.is_some() {
            self.rpc_url = rpc_url;
        }
        self
    }

    pub fn rpc_url(&self) -> Result<&str, ConfigError> {
        self.rpc_url
            .as_deref()
            .ok_or(ConfigError::MissingRpcUrl)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let rpc_url = self.rpc_url()?;
        if !(rpc_url.starts_with("http://") || rpc_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "rpc_url must be an http(s) URL, got {rpc_url}"
            )));
        }
        if self.chain_id == 0 {
            return Err(ConfigError::Invalid("chain_id must be non-zero".to_string()));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be at least 1".to_string()));
        }
        if self.batching.max_batch_size() == Some(0) {
            return Err(ConfigError::Invalid(
                "batching.max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }
}
