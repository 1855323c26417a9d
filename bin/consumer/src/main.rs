mod adapters;
mod assets;
mod config;
mod dispatch;

use std::collections::HashMap;
use std::sync::Arc;

use ethers::providers::{Http, Provider};
use ledger_core::{AssetTable, CachedPriceOracle, Ledger, LendingPoolRegistry, PriceOracle};
use merkle_engine::{MerkleEngine, OwnershipStore};
use message_bus::{RedisSubscriber, Subscriber};
use relayer_client::RelayerClient;
use structopt::StructOpt;

use crate::adapters::{ChainLendingPool, TablePriceOracle};
use crate::config::ConsumerOptions;

#[async_std::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt().pretty().init();
    let options = ConsumerOptions::from_args();
    run_consumer(options).await.map_err(|err| {
        tracing::error!(%err, "consumer exited");
        std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
    })
}

/// Builds the asset table, price table (wrapped into a `PriceOracle`), and
/// lending-pool registry this single-chain process is configured for. Cheap
/// enough to rebuild on demand, since `Ledger::create`/`load` each consume
/// their own owned copies rather than sharing one (spec §4.9 single-chain
/// per process, matching the producer).
fn build_ledger_deps(
    options: &ConsumerOptions,
    provider: &Arc<Provider<Http>>,
) -> Result<(AssetTable, Arc<dyn PriceOracle>, LendingPoolRegistry), Box<dyn std::error::Error>> {
    let (assets, prices) = assets::parse_asset_entries(options.chain_id, &options.assets)
        .map_err(|err| Box::<dyn std::error::Error>::from(err.to_string()))?;
    let (assets_for_oracle, _) = assets::parse_asset_entries(options.chain_id, &options.assets)
        .map_err(|err| Box::<dyn std::error::Error>::from(err.to_string()))?;
    let oracle: Arc<dyn PriceOracle> = Arc::new(CachedPriceOracle::new(TablePriceOracle::new(
        Arc::new(assets_for_oracle),
        prices,
    )));
    let mut lending_pools = LendingPoolRegistry::new();
    for address in &options.lending_pools {
        lending_pools.register(*address, Arc::new(ChainLendingPool::new(provider.clone(), *address)));
    }
    Ok((assets, oracle, lending_pools))
}

async fn run_consumer(options: ConsumerOptions) -> Result<(), Box<dyn std::error::Error>> {
    let store_path = options.store_path();
    std::fs::create_dir_all(&store_path)?;

    let provider = Arc::new(Provider::<Http>::try_from(options.rpc_url.as_str())?);

    let relayer = Arc::new(
        RelayerClient::connect(&options.rpc_url, options.vault_address, &options.relayer_mnemonic).await?,
    );
    let mut relayers = HashMap::new();
    relayers.insert(options.chain_id, relayer);
    let mut handlers = HashMap::new();
    handlers.insert(options.chain_id, options.vault_address);

    let merkle_key_tag = options.merkle_key_tag();
    let ownership_store = if options.reset_state() {
        OwnershipStore::create(&store_path, &merkle_key_tag)?
    } else {
        match OwnershipStore::load(&store_path, &merkle_key_tag) {
            Ok(store) => store,
            Err(_) => OwnershipStore::create(&store_path, &merkle_key_tag)?,
        }
    };
    let merkle = Arc::new(MerkleEngine::new(ownership_store, relayers.clone()).await);

    let ledger_key_tag = options.ledger_key_tag();
    let (assets, oracle, lending_pools) = build_ledger_deps(&options, &provider)?;
    let ledger = if options.reset_state() {
        Ledger::create(
            &store_path,
            &ledger_key_tag,
            oracle,
            lending_pools,
            assets,
            merkle.clone(),
            relayers,
            handlers,
        )?
    } else {
        match Ledger::load(
            &store_path,
            &ledger_key_tag,
            oracle.clone(),
            lending_pools,
            assets,
            merkle.clone(),
            relayers.clone(),
            handlers.clone(),
        ) {
            Ok(ledger) => ledger,
            Err(_) => {
                let (assets, _oracle, lending_pools) = build_ledger_deps(&options, &provider)?;
                Ledger::create(
                    &store_path,
                    &ledger_key_tag,
                    oracle,
                    lending_pools,
                    assets,
                    merkle.clone(),
                    relayers,
                    handlers,
                )?
            }
        }
    };

    let mut subscriber = RedisSubscriber::connect(&options.redis_url).await?;
    subscriber.subscribe(&options.redis_channel).await?;

    tracing::info!(chain_id = options.chain_id, "starting consumer");
    loop {
        match subscriber.next_message().await {
            Ok(Some(message)) => {
                dispatch::dispatch_message(&message, &merkle, &ledger, options.nft_address).await;
            }
            Ok(None) => {
                async_std::task::sleep(std::time::Duration::from_millis(50)).await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to read next message");
            }
        }
    }
}
