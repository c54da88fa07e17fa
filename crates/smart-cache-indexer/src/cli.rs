//! Command-line configuration for the indexer binary.

use alloy_primitives::Address;
use anyhow::{
    Context,
    Result,
};
use clap::Parser;
use smart_cache_indexer::IndexerConfig;
use std::{
    path::PathBuf,
    time::Duration,
};
use url::Url;

/// Stylus cache manager on Arbitrum One.
const DEFAULT_CACHE_MANAGER: &str = "0x51dedbd2f190e0696afbee5e60bfde96d86464ec";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON-RPC endpoint of the chain node
    #[arg(long, env = "SMART_CACHE_RPC_URL")]
    pub rpc_url: Url,

    /// Address of the cache manager contract emitting `InsertBid`
    #[arg(long, env = "SMART_CACHE_CACHE_MANAGER", default_value = DEFAULT_CACHE_MANAGER)]
    pub cache_manager: Address,

    /// Base URL of the per-program gas oracle
    #[arg(long, env = "SMART_CACHE_ORACLE_URL")]
    pub oracle_url: String,

    /// Path of the cache database, defaults to the platform data directory
    #[arg(long, env = "SMART_CACHE_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// First block that can contain bid events
    #[arg(long, env = "SMART_CACHE_GENESIS_BLOCK", default_value = "0")]
    pub genesis_block: u64,

    /// Block span of one log request after a full-range request is rejected
    #[arg(long, env = "SMART_CACHE_CHUNK_SIZE", default_value = "10000")]
    pub chunk_size: u64,

    /// Seconds between catch-up cycles
    #[arg(long, env = "SMART_CACHE_POLL_INTERVAL_SECS", default_value = "60")]
    pub poll_interval_secs: u64,

    /// Log filter, overridden by `RUST_LOG`
    #[arg(long, env = "SMART_CACHE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            genesis_block: self.genesis_block,
            chunk_size: self.chunk_size,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            ..IndexerConfig::default()
        }
    }

    /// The configured database path, or `<data dir>/db`.
    pub fn db_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.db_path {
            return Ok(path.clone());
        }
        let dirs = directories::ProjectDirs::from("io", "stylus", "smart-cache-indexer")
            .context("failed to determine the platform data directory")?;
        Ok(dirs.data_dir().join("db"))
    }
}
