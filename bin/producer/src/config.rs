use ethers::types::Address;
use std::time::Duration;
use std::{env, path::PathBuf};
use structopt::StructOpt;

// TODO: migrate to clap; clap 3.0 incorporates most of StructOpt
#[derive(Debug, StructOpt)]
#[structopt(
    name = "Block Indexer",
    about = "Tails a chain, filters logs by topic, decodes known events, and publishes them to the message bus"
)]
pub struct ProducerOptions {
    /// URL for the Ethers HTTP provider.
    #[structopt(long, env = "RPC_URL")]
    pub rpc_url: String,

    /// Optional WebSocket URL; when set, new blocks are pushed rather than
    /// polled (spec §4.2).
    #[structopt(long, env = "WS_URL")]
    pub ws_url: Option<String>,

    /// Chain ID this producer indexes.
    #[structopt(long, env = "CHAIN_ID")]
    pub chain_id: u64,

    /// Human-readable chain name, carried in every published message.
    #[structopt(long, env = "CHAIN_NAME", default_value = "mainnet")]
    pub chain_name: String,

    /// Vault entry-point contract address; the six ledger events are
    /// scoped to this address.
    #[structopt(long, env = "VAULT_ADDRESS")]
    pub vault_address: Address,

    /// Block number to start indexing from; absent means "pick up where
    /// the persisted ledger left off, or the chain tip (minus
    /// `block_confirmations`) if this is a fresh store".
    #[structopt(long, env = "START_BLOCK")]
    pub start_block: Option<u64>,

    /// Blocks to lag behind the observed chain head before a block becomes
    /// eligible for discovery (spec §4.6 step 1, §6 `BLOCK_CONFIRMATIONS`).
    #[structopt(long, env = "BLOCK_CONFIRMATIONS", default_value = "2")]
    pub block_confirmations: u64,

    /// Blocks fetched and enqueued per discovery tick (spec §6
    /// `INDEXING_BATCH_SIZE`).
    #[structopt(long, env = "INDEXING_BATCH_SIZE", default_value = "25")]
    pub indexing_batch_size: u64,

    /// How often the latest-block refresh task polls when no push (WS)
    /// subscription is available (spec §6
    /// `LATEST_BLOCK_UPDATE_INTERVAL_MS`).
    #[structopt(long, env = "LATEST_BLOCK_UPDATE_INTERVAL_MS", default_value = "2000")]
    pub latest_block_update_interval_ms: u64,

    /// How often the continuous-indexing tick runs when there is no new
    /// work (spec §6 `CONTINUOUS_INDEXING_INTERVAL_MS`).
    #[structopt(long, env = "CONTINUOUS_INDEXING_INTERVAL_MS", default_value = "1000")]
    pub continuous_indexing_interval_ms: u64,

    /// Backoff applied after a discovery/processing tick fails (spec §6
    /// `RETRY_DELAY_MS`).
    #[structopt(long, env = "RETRY_DELAY_MS", default_value = "1000")]
    pub retry_delay_ms: u64,

    /// Ceiling on `BlockLedger` retry attempts before a failed block is
    /// withheld from reprocessing (spec §6 `MAX_RETRIES`).
    #[structopt(long, env = "MAX_RETRIES", default_value = "5")]
    pub max_retries: u32,

    /// Interval between health checks (spec §6
    /// `HEALTH_CHECK_INTERVAL_MS`).
    #[structopt(long, env = "HEALTH_CHECK_INTERVAL_MS", default_value = "60000")]
    pub health_check_interval_ms: u64,

    /// Path to persistence files.
    #[structopt(long, env = "STORE_PATH", default_value = "")]
    pub store_path: String,

    /// Flag to reset persisted block-ledger state.
    #[structopt(long)]
    pub reset_store_state: bool,

    /// Starting concurrent-RPC-request limit; the indexer adapts this up
    /// or down at runtime (spec §4.4).
    #[structopt(long, env = "CONCURRENT_TRANSACTION_LIMIT", default_value = "10")]
    pub concurrent_transaction_limit: usize,

    /// Capacity of the in-memory transaction/receipt cache.
    #[structopt(long, env = "TX_CACHE_CAPACITY", default_value = "2048")]
    pub tx_cache_capacity: usize,

    /// Redis connection URL.
    #[structopt(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Redis pub/sub channel to publish to.
    #[structopt(long, env = "REDIS_CHANNEL", default_value = "pipeline")]
    pub redis_channel: String,
}

fn default_data_path() -> PathBuf {
    let mut data_dir = dirs::data_local_dir()
        .unwrap_or_else(|| env::current_dir().unwrap_or_else(|_| PathBuf::from("./")));
    data_dir.push("espresso");
    data_dir.push("pipeline_producer");
    data_dir
}

impl ProducerOptions {
    pub(crate) fn store_path(&self) -> PathBuf {
        if self.store_path.is_empty() {
            let mut path = default_data_path();
            path.push("store");
            path
        } else {
            PathBuf::from(&self.store_path)
        }
    }

    pub(crate) fn key_tag(&self) -> String {
        format!("producer-{}", self.chain_id)
    }

    pub(crate) fn reset_state(&self) -> bool {
        self.reset_store_state
    }

    pub(crate) fn latest_block_update_interval(&self) -> Duration {
        Duration::from_millis(self.latest_block_update_interval_ms)
    }

    pub(crate) fn continuous_indexing_interval(&self) -> Duration {
        Duration::from_millis(self.continuous_indexing_interval_ms)
    }

    pub(crate) fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub(crate) fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}
