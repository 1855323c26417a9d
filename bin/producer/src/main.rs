mod config;
mod decode;
mod publisher;

use std::sync::Arc;

use async_std::sync::{Mutex, RwLock};
use chain_client::{ChainClient, EthersHttpClient, EthersWsClient, TopicMatcher, TxCache};
use indexer_core::{AdaptiveConcurrencyConfig, BlockLedger, Indexer, IndexerConfig};
use message_bus::{Publisher, RedisPublisher};
use structopt::StructOpt;

use crate::config::ProducerOptions;
use crate::publisher::DecodingPublisher;

#[async_std::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt().pretty().init();
    let options = ProducerOptions::from_args();
    run_producer(options).await.map_err(|err| {
        tracing::error!(%err, "producer exited");
        std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
    })
}

async fn run_producer(options: ProducerOptions) -> Result<(), Box<dyn std::error::Error>> {
    let chain_client: Arc<dyn ChainClient> = if let Some(ws_url) = &options.ws_url {
        Arc::new(EthersWsClient::connect(ws_url).await?)
    } else {
        Arc::new(EthersHttpClient::connect(&options.rpc_url).await?)
    };

    let store_path = options.store_path();
    std::fs::create_dir_all(&store_path)?;
    let key_tag = options.key_tag();
    let ledger = if options.reset_state() {
        Arc::new(BlockLedger::create(&store_path, &key_tag)?)
    } else {
        match BlockLedger::load(&store_path, &key_tag) {
            Ok(ledger) => Arc::new(ledger),
            Err(_) => Arc::new(BlockLedger::create(&store_path, &key_tag)?),
        }
    };

    let cache = Arc::new(RwLock::new(TxCache::new(options.tx_cache_capacity)));
    let matcher = Arc::new(TopicMatcher::from_filters(decode::topic_filters(options.vault_address)));

    let redis_publisher = RedisPublisher::connect(&options.redis_url).await?;
    let decorated = DecodingPublisher::new(redis_publisher);
    let publisher: Arc<Mutex<dyn Publisher>> = Arc::new(Mutex::new(decorated));

    let concurrency_config = AdaptiveConcurrencyConfig {
        initial_limit: options.concurrent_transaction_limit,
        ..AdaptiveConcurrencyConfig::default()
    };

    let indexer_config = IndexerConfig {
        chain_id: options.chain_id,
        chain_name: options.chain_name.clone(),
        channel: options.redis_channel.clone(),
        start_block: options.start_block,
        block_confirmations: options.block_confirmations,
        batch_size: options.indexing_batch_size,
        latest_block_update_interval: options.latest_block_update_interval(),
        continuous_indexing_interval: options.continuous_indexing_interval(),
        retry_delay: options.retry_delay(),
        max_retries: options.max_retries,
        health_check_interval: options.health_check_interval(),
    };

    let indexer = Arc::new(Indexer::new(
        indexer_config,
        chain_client,
        ledger,
        cache,
        matcher,
        publisher,
        concurrency_config,
    ));

    tracing::info!(chain_id = options.chain_id, "starting producer");
    indexer.run().await?;
    Ok(())
}
