//! Core configuration loaded from environment variables.

use crate::errors::{CoreError, Result};

/// Default staleness window (ms) shared by the balance cache and the
/// reconciliation watcher.
pub const DEFAULT_STALE_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Soroban/Horizon RPC endpoint the escrow client talks to
    pub rpc_url: String,
    /// Account used as the read signer for balance queries (Strkey format)
    pub signer_address: String,
    /// Staleness window in milliseconds for cached balance reads and
    /// resolution checks
    pub stale_ms: u64,
    /// Whether the reconciliation watcher is active
    pub watcher_enabled: bool,
    /// Request timeout for outbound RPC calls, in seconds
    pub rpc_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            rpc_url: env_var("RPC_URL")
                .unwrap_or_else(|_| "https://soroban-testnet.stellar.org".to_string()),
            signer_address: env_var("SIGNER_ADDRESS").map_err(|_| {
                CoreError::Config("SIGNER_ADDRESS environment variable is required".to_string())
            })?,
            stale_ms: env_var("STALE_MS")
                .unwrap_or_else(|_| DEFAULT_STALE_MS.to_string())
                .parse()
                .map_err(|_| CoreError::Config("Invalid STALE_MS".to_string()))?,
            watcher_enabled: env_var("WATCHER_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .map_err(|_| CoreError::Config("Invalid WATCHER_ENABLED".to_string()))?,
            rpc_timeout_secs: env_var("RPC_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| CoreError::Config("Invalid RPC_TIMEOUT_SECS".to_string()))?,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| CoreError::Config(format!("Missing env var: {key}")))
}
