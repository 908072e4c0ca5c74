//! Environment-driven server configuration.

use std::env;
use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use assetsync_core::SyncConfig;

/// Everything the daemon needs, read from the process environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// JSON-RPC endpoint of the chain node.
    pub rpc_url: String,
    /// WebSocket endpoint for live log subscriptions; omit to run
    /// backfill-only.
    pub ws_url: Option<String>,
    /// Address of the asset registry contract.
    pub contract_address: String,
    /// SQLite path or `postgres://` URL.
    pub database_url: String,
    /// Listen address for the HTTP API.
    pub bind: SocketAddr,
    pub poll_interval_secs: u64,
    pub max_block_range: u64,
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any key/value source. `from_env` is a thin
    /// wrapper; tests pass a closure instead of mutating process state.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let rpc_url = get("RPC_URL").context("RPC_URL is required")?;
        let contract_address =
            get("CONTRACT_ADDRESS").context("CONTRACT_ADDRESS is required")?;
        if !contract_address.starts_with("0x") {
            bail!("CONTRACT_ADDRESS must be a 0x-prefixed address");
        }

        let host = get("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = match get("PORT") {
            Some(raw) => raw.parse().context("PORT must be a number")?,
            None => 3001,
        };
        let bind = format!("{host}:{port}")
            .parse()
            .context("HOST/PORT do not form a valid listen address")?;

        let parse_u64 = |key: &str, default: u64| -> Result<u64> {
            match get(key) {
                Some(raw) => raw.parse().with_context(|| format!("{key} must be a number")),
                None => Ok(default),
            }
        };

        Ok(Self {
            rpc_url,
            ws_url: get("WS_URL"),
            contract_address,
            database_url: get("DATABASE_URL").unwrap_or_else(|| "assetsync.db".into()),
            bind,
            poll_interval_secs: parse_u64("POLL_INTERVAL_SECS", 5)?,
            max_block_range: parse_u64("MAX_BLOCK_RANGE", 10_000)?,
            request_timeout_secs: parse_u64("REQUEST_TIMEOUT_SECS", 30)?,
        })
    }

    /// The engine-facing subset of this config.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            contract_address: self.contract_address.clone(),
            poll_interval_secs: self.poll_interval_secs,
            max_block_range: self.max_block_range,
            request_timeout_secs: self.request_timeout_secs,
        }
    }
}
