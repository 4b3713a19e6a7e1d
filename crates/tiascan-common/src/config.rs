//! Configuration for the tiascan indexer

use {
    crate::errors::{Error, Result},
    serde::{Deserialize, Serialize},
    std::{env, fs, path::Path},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub indexer: IndexerConfig,
    pub node: NodeConfig,
    pub database: DatabaseConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Name under which the durable state row is kept.
    pub name: String,
    /// Number of parallel fetch workers.
    pub threads_count: usize,
    /// Head-poll period in seconds.
    pub block_period: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Tendermint-style RPC endpoint, e.g. "http://localhost:26657".
    pub url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub connection_string: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub create_tables: bool,
}

/// Credentials for the auxiliary blob storage, taken from the environment
/// rather than the config file.
#[derive(Debug, Clone, Default)]
pub struct BlobStorageCredentials {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl BlobStorageCredentials {
    pub fn from_env() -> Self {
        Self {
            access_key: env::var("TIASCAN_BLOB_ACCESS_KEY").ok(),
            secret_key: env::var("TIASCAN_BLOB_SECRET_KEY").ok(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    10
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.indexer.threads_count == 0 {
            return Err(Error::Config("threads_count must be at least 1".into()));
        }
        if self.indexer.block_period == 0 {
            return Err(Error::Config("block_period must be at least 1".into()));
        }
        if self.node.url.is_empty() {
            return Err(Error::Config("node url must not be empty".into()));
        }
        Ok(())
    }
}
