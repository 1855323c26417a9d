use ethers::types::Address;
use std::{env, path::PathBuf};
use structopt::StructOpt;

// TODO: migrate to clap; clap 3.0 incorporates most of StructOpt
#[derive(Debug, StructOpt)]
#[structopt(
    name = "Collateral Ledger Consumer",
    about = "Subscribes to the message bus and drives the ownership-Merkle engine and collateral ledger"
)]
pub struct ConsumerOptions {
    /// Chain ID this consumer services (single-chain per process, matching
    /// the producer).
    #[structopt(long, env = "CHAIN_ID")]
    pub chain_id: u64,

    /// URL for the Ethers HTTP provider, used for the relayer's writes and
    /// any configured on-chain lending-pool reads.
    #[structopt(long, env = "RPC_URL")]
    pub rpc_url: String,

    /// Vault/relayer entry-point contract address this consumer submits
    /// writes to (`updateNFTOwnershipRoot`, `processRequest`,
    /// `completeWithdraw`).
    #[structopt(long, env = "VAULT_ADDRESS")]
    pub vault_address: Address,

    /// NFT contract address whose decoded `Transfer` events feed the
    /// ownership-Merkle engine.
    #[structopt(long, env = "NFT_ADDRESS")]
    pub nft_address: Address,

    /// BIP-39 mnemonic for the relayer's signing wallet.
    #[structopt(long, env = "PRIVATE_KEY")]
    pub relayer_mnemonic: String,

    /// Per-chain asset entries: `SYMBOL=ADDRESS=DECIMALS=LTV_PERCENT=USD_PRICE_PER_UNIT`.
    /// `LTV_PERCENT` may be empty to mean "no LTV configured" (spec §6).
    #[structopt(long, env = "ASSETS", use_delimiter = true, value_delimiter = ",")]
    pub assets: Vec<String>,

    /// Per-chain lending-pool protocol addresses this consumer's
    /// `LendingPoolRegistry` resolves utilization against.
    #[structopt(long, env = "LENDING_POOLS", use_delimiter = true, value_delimiter = ",")]
    pub lending_pools: Vec<Address>,

    /// Alchemy API key, reserved for a future `PriceOracle` backed by a
    /// live pricing API; the shipped oracle reads the configured static
    /// price table instead (spec §1 Non-goals: pricing-API integration).
    #[structopt(long, env = "ALCHEMY_API_KEY", default_value = "")]
    pub alchemy_api_key: String,

    /// Redis connection URL.
    #[structopt(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Redis pub/sub channel to subscribe to.
    #[structopt(long, env = "REDIS_CHANNEL", default_value = "pipeline")]
    pub redis_channel: String,

    /// Path to persistence files.
    #[structopt(long, env = "STORE_PATH", default_value = "")]
    pub store_path: String,

    /// Flag to reset persisted ledger/Merkle state.
    #[structopt(long)]
    pub reset_store_state: bool,
}

fn default_data_path() -> PathBuf {
    let mut data_dir = dirs::data_local_dir()
        .unwrap_or_else(|| env::current_dir().unwrap_or_else(|_| PathBuf::from("./")));
    data_dir.push("espresso");
    data_dir.push("pipeline_consumer");
    data_dir
}

impl ConsumerOptions {
    pub(crate) fn store_path(&self) -> PathBuf {
        if self.store_path.is_empty() {
            let mut path = default_data_path();
            path.push("store");
            path
        } else {
            PathBuf::from(&self.store_path)
        }
    }

    pub(crate) fn ledger_key_tag(&self) -> String {
        format!("ledger-{}", self.chain_id)
    }

    pub(crate) fn merkle_key_tag(&self) -> String {
        format!("merkle-{}", self.chain_id)
    }

    pub(crate) fn reset_state(&self) -> bool {
        self.reset_store_state
    }
}
