//! `Indexer` — spec §4.6. Orchestrates four concurrent loops per chain:
//! a latest-block refresh (push via `ChainClient::subscribe_new_blocks`
//! when available, polled on `latest_block_update_interval` otherwise),
//! discovery (fetch new heads up to the confirmed tip, detect reorgs,
//! enqueue unprocessed blocks) on `continuous_indexing_interval`,
//! processing (run `BlockProcessor` over queued blocks and publish), and a
//! periodic health check, generalizing the single `loop { check; sleep }`
//! driver in the teacher's `entry::run`.

use crate::adaptive::{AdaptiveConcurrency, AdaptiveConcurrencyConfig};
use crate::block_ledger::{BlockLedger, BlockLedgerError, REORG_DEPTH};
use crate::block_processor::{AbortSignal, BlockProcessor};
use async_std::sync::{Mutex, RwLock};
use async_std::task::sleep;
use chain_client::{ChainClient, ChainClientError, TopicMatcher, TxCache};
use futures_util::StreamExt;
use message_bus::{MessageBusError, Publisher};
use snafu::{ResultExt, Snafu};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{event, Level};

#[derive(Debug, Snafu)]
pub enum IndexerError {
    #[snafu(display("chain client error: {}", source))]
    Chain { source: ChainClientError },
    #[snafu(display("block ledger error: {}", source))]
    Ledger { source: BlockLedgerError },
    #[snafu(display("publish error: {}", source))]
    Publish { source: MessageBusError },
}

pub struct IndexerConfig {
    pub chain_id: u64,
    pub chain_name: String,
    pub channel: String,
    /// Block to start from when the ledger has no history for this chain.
    /// `None` means "start from the current chain head, minus
    /// `block_confirmations`" (no backfill).
    pub start_block: Option<u64>,
    /// Blocks to lag behind the observed chain head before a block is
    /// eligible for discovery, so a reorg within this depth of the tip
    /// never reaches the unprocessed queue (spec §4.6 step 1, §6
    /// `BLOCK_CONFIRMATIONS`).
    pub block_confirmations: u64,
    /// Blocks fetched and enqueued per discovery tick (spec §6
    /// `INDEXING_BATCH_SIZE`).
    pub batch_size: u64,
    /// How often the latest-block refresh task polls `ChainClient` when no
    /// push subscription is available (spec §6
    /// `LATEST_BLOCK_UPDATE_INTERVAL_MS`, default 2s).
    pub latest_block_update_interval: Duration,
    /// How often the continuous-indexing tick (discovery) runs when there
    /// is no new work (spec §6 `CONTINUOUS_INDEXING_INTERVAL_MS`, default
    /// 1s).
    pub continuous_indexing_interval: Duration,
    /// Backoff applied after a discovery/processing tick fails (spec §6
    /// `RETRY_DELAY_MS`).
    pub retry_delay: Duration,
    /// Ceiling on `BlockLedger` retry attempts before a failed block is
    /// withheld from reprocessing (spec §6 `MAX_RETRIES`).
    pub max_retries: u32,
    /// Interval between health checks (spec §6
    /// `HEALTH_CHECK_INTERVAL_MS`, default 60s).
    pub health_check_interval: Duration,
}

pub struct Indexer {
    config: IndexerConfig,
    chain_client: Arc<dyn ChainClient>,
    ledger: Arc<BlockLedger>,
    processor: BlockProcessor,
    matcher: Arc<TopicMatcher>,
    publisher: Arc<Mutex<dyn Publisher>>,
    next_fetch: AtomicU64,
    /// Cached chain head, refreshed by `latest_block_loop`; `discover_tick`
    /// reads this rather than calling the RPC on every tick.
    latest_seen: AtomicU64,
    current_abort: RwLock<AbortSignal>,
    running: AtomicBool,
    paused: AtomicBool,
    in_flight: AtomicBool,
}

impl Indexer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: IndexerConfig,
        chain_client: Arc<dyn ChainClient>,
        ledger: Arc<BlockLedger>,
        cache: Arc<RwLock<TxCache>>,
        matcher: Arc<TopicMatcher>,
        publisher: Arc<Mutex<dyn Publisher>>,
        concurrency_config: AdaptiveConcurrencyConfig,
    ) -> Self {
        let concurrency = Arc::new(AdaptiveConcurrency::new(concurrency_config));
        let processor = BlockProcessor::new(
            config.chain_id,
            config.chain_name.clone(),
            chain_client.clone(),
            cache,
            concurrency,
        );
        Indexer {
            config,
            chain_client,
            ledger,
            processor,
            matcher,
            publisher,
            next_fetch: AtomicU64::new(0),
            latest_seen: AtomicU64::new(0),
            current_abort: RwLock::new(AbortSignal::new()),
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Determine the resume cursor, then spawn and await the latest-block,
    /// discovery, processing, and health-check loops. Never returns under
    /// normal operation.
    pub async fn run(self: Arc<Self>) -> Result<(), IndexerError> {
        self.bootstrap().await?;

        let latest_block = async_std::task::spawn({
            let indexer = self.clone();
            async move { indexer.latest_block_loop().await }
        });
        let discover = async_std::task::spawn({
            let indexer = self.clone();
            async move { indexer.discover_loop().await }
        });
        let process = async_std::task::spawn({
            let indexer = self.clone();
            async move { indexer.process_loop().await }
        });
        let health = async_std::task::spawn({
            let indexer = self.clone();
            async move { indexer.health_loop().await }
        });
        latest_block.await;
        discover.await;
        process.await;
        health.await;
        Ok(())
    }

    /// Current state snapshot, per spec §4.6's
    /// `{latestSeen, latestProcessed, running, paused, inFlight}` model.
    pub async fn state(&self) -> IndexerState {
        IndexerState {
            latest_seen: self.latest_seen.load(Ordering::SeqCst),
            latest_processed: self
                .ledger
                .latest_processed(self.config.chain_id)
                .await
                .map(|row| row.number),
            running: self.running.load(Ordering::SeqCst),
            paused: self.paused.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
        }
    }

    /// Suspend discovery/processing without tearing down the loops:
    /// cancels whatever is mid-flight and makes every tick a no-op until
    /// `start()` is called (spec §4.6/§5).
    pub async fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.current_abort.read().await.cancel();
        event!(Level::INFO, chain_id = self.config.chain_id, "indexer paused");
    }

    /// Like `pause`, but also signals the loops to exit. Used by the
    /// health check's auto-recovery and by an operator-driven shutdown.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.paused.store(true, Ordering::SeqCst);
        self.current_abort.read().await.cancel();
        event!(Level::WARN, chain_id = self.config.chain_id, "indexer stopped");
    }

    /// Clears `paused`/`running` so loops resume ticking.
    pub fn start(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        event!(Level::INFO, chain_id = self.config.chain_id, "indexer started");
    }

    async fn bootstrap(&self) -> Result<(), IndexerError> {
        let head = self
            .chain_client
            .latest_block_number()
            .await
            .context(ChainSnafu)?;
        self.latest_seen.store(head, Ordering::SeqCst);

        let resume_from = match self.ledger.highest_known(self.config.chain_id).await {
            Some(highest) => highest + 1,
            None => self
                .config
                .start_block
                .unwrap_or_else(|| head.saturating_sub(self.config.block_confirmations)),
        };
        self.next_fetch.store(resume_from, Ordering::SeqCst);
        event!(
            Level::INFO,
            chain_id = self.config.chain_id,
            resume_from,
            head,
            "indexer bootstrapped"
        );
        Ok(())
    }

    /// Keeps `latest_seen` fresh: consumes `ChainClient::subscribe_new_blocks`
    /// when it hands back a genuine push feed (WS), otherwise falls back to
    /// polling `latest_block_number` on `latest_block_update_interval`
    /// (spec §4.1/§4.6, §6 `WS_URL`/`LATEST_BLOCK_UPDATE_INTERVAL_MS`).
    async fn latest_block_loop(&self) {
        match self.chain_client.subscribe_new_blocks().await {
            Ok(subscription) if subscription.is_push => {
                let mut stream = subscription.stream;
                while let Some(number) = stream.next().await {
                    if !self.running.load(Ordering::SeqCst) {
                        return;
                    }
                    self.latest_seen.store(number, Ordering::SeqCst);
                }
            }
            other => {
                if let Err(error) = other {
                    event!(Level::WARN, %error, "no push block subscription available, polling instead");
                }
                loop {
                    if !self.running.load(Ordering::SeqCst) {
                        return;
                    }
                    match self.chain_client.latest_block_number().await {
                        Ok(number) => self.latest_seen.store(number, Ordering::SeqCst),
                        Err(error) => {
                            event!(Level::WARN, %error, "failed to refresh latest block number");
                        }
                    }
                    sleep(self.config.latest_block_update_interval).await;
                }
            }
        }
    }

    async fn discover_loop(&self) {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            if self.paused.load(Ordering::SeqCst) {
                sleep(self.config.continuous_indexing_interval).await;
                continue;
            }
            match self.discover_tick().await {
                Ok(true) => continue,
                Ok(false) => sleep(self.config.continuous_indexing_interval).await,
                Err(error) => {
                    event!(Level::WARN, %error, "discovery tick failed, retrying");
                    sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    /// Fetch up to `batch_size` new blocks below the confirmed tip
    /// (`latest_seen - block_confirmations`), checking each for a reorg
    /// against the prior observation at `number - 1` before enqueuing it as
    /// unprocessed work. Returns whether any progress was made.
    async fn discover_tick(&self) -> Result<bool, IndexerError> {
        let head = self.latest_seen.load(Ordering::SeqCst);
        let confirmed_head = head.saturating_sub(self.config.block_confirmations);
        let next = self.next_fetch.load(Ordering::SeqCst);
        if head == 0 || next > confirmed_head {
            return Ok(false);
        }
        let end = confirmed_head.min(next + self.config.batch_size.max(1) - 1);

        let mut progressed = false;
        for number in next..=end {
            let Some(block) = self
                .chain_client
                .get_block(number)
                .await
                .context(ChainSnafu)?
            else {
                break;
            };

            if let Some(prior_hash) = self.ledger.hash_at(self.config.chain_id, number.saturating_sub(1)).await {
                if number > 0 && prior_hash != block.parent_hash {
                    self.handle_reorg(number).await?;
                    self.next_fetch.store(
                        number.saturating_sub(REORG_DEPTH).min(number),
                        Ordering::SeqCst,
                    );
                    return Ok(true);
                }
            }

            self.ledger
                .add_unprocessed(block)
                .await
                .context(LedgerSnafu)?;
            progressed = true;
        }
        if progressed {
            self.next_fetch.store(end + 1, Ordering::SeqCst);
        }
        Ok(progressed)
    }

    /// Roll back the last `REORG_DEPTH` blocks and cancel whatever the
    /// process loop is mid-flight on, per spec §4.6.
    async fn handle_reorg(&self, divergent_at: u64) -> Result<(), IndexerError> {
        let range = reorg_rollback_range(divergent_at);
        event!(
            Level::WARN,
            chain_id = self.config.chain_id,
            from = *range.start(),
            to = *range.end(),
            "reorg detected, rolling back"
        );
        self.current_abort.read().await.cancel();
        let numbers: Vec<u64> = range.collect();
        self.ledger
            .mark_reorged(self.config.chain_id, &numbers)
            .await
            .context(LedgerSnafu)
    }

    async fn process_loop(&self) {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            if self.paused.load(Ordering::SeqCst) {
                sleep(self.config.continuous_indexing_interval).await;
                continue;
            }
            match self.process_tick().await {
                Ok(true) => continue,
                Ok(false) => sleep(self.config.continuous_indexing_interval).await,
                Err(error) => {
                    event!(Level::WARN, %error, "processing tick failed, retrying");
                    sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    async fn process_tick(&self) -> Result<bool, IndexerError> {
        let Some(row) = self
            .ledger
            .blocks_to_process(self.config.chain_id, self.config.max_retries)
            .await
            .into_iter()
            .next()
        else {
            return Ok(false);
        };

        self.in_flight.store(true, Ordering::SeqCst);
        let result = self.process_row(row).await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn process_row(&self, row: pipeline_types::UnprocessedBlock) -> Result<bool, IndexerError> {
        let abort = AbortSignal::new();
        *self.current_abort.write().await = abort.clone();
        self.ledger.mark_processing(&row).await.context(LedgerSnafu)?;

        let block_with_txs = match self
            .chain_client
            .get_block_with_transactions(row.number)
            .await
            .context(ChainSnafu)?
        {
            Some(block) if block.block.hash == row.hash => block,
            _ => {
                self.ledger
                    .mark_failed(&row, "block unavailable or hash changed before processing")
                    .await
                    .context(LedgerSnafu)?;
                return Ok(true);
            }
        };

        let matched = self
            .processor
            .process(&block_with_txs, &self.matcher, &abort)
            .await;

        if abort.is_cancelled() {
            self.ledger
                .mark_failed(&row, "canceled by a concurrent reorg")
                .await
                .context(LedgerSnafu)?;
            return Ok(true);
        }

        if !matched.is_empty() {
            let block_timestamp = block_with_txs.block.timestamp;
            let mut messages: Vec<_> = matched
                .into_iter()
                .map(|tx| tx.into_message(block_timestamp))
                .collect();
            self.publisher
                .lock()
                .await
                .publish_batch(&self.config.channel, &mut messages)
                .await
                .context(PublishSnafu)?;
        }

        self.ledger
            .add_processed(block_with_txs.block)
            .await
            .context(LedgerSnafu)?;
        self.ledger.mark_completed(&row).await.context(LedgerSnafu)?;
        Ok(true)
    }

    /// Checks `chainClient.healthy() && messageBus.connected()` on
    /// `health_check_interval`; an unhealthy result auto-restarts the
    /// indexer unless it is already paused (spec §4.6).
    async fn health_loop(&self) {
        loop {
            sleep(self.config.health_check_interval).await;
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            let start = Instant::now();
            let chain_healthy = self.chain_client.healthy().await;
            let bus_connected = self.publisher.lock().await.connected().await;
            let healthy = chain_healthy && bus_connected;
            let stats = self.ledger.stats(self.config.chain_id).await;
            event!(
                Level::INFO,
                chain_id = self.config.chain_id,
                healthy,
                chain_healthy,
                bus_connected,
                pending = stats.pending,
                failed = stats.failed,
                check_duration_ms = start.elapsed().as_millis() as u64,
                "health check"
            );
            if !healthy {
                event!(
                    Level::ERROR,
                    chain_id = self.config.chain_id,
                    chain_healthy,
                    bus_connected,
                    "indexer unhealthy"
                );
                if !self.paused.load(Ordering::SeqCst) {
                    event!(Level::WARN, chain_id = self.config.chain_id, "auto-restarting after unhealthy check");
                    self.stop().await;
                    self.start();
                }
            }
        }
    }
}

/// Point-in-time view of spec §4.6's indexer state model.
#[derive(Clone, Copy, Debug)]
pub struct IndexerState {
    pub latest_seen: u64,
    pub latest_processed: Option<u64>,
    pub running: bool,
    pub paused: bool,
    pub in_flight: bool,
}

/// The `[divergentAt - REORG_DEPTH, divergentAt - 1]` range to roll back and
/// re-scan on a detected reorg, per spec §4.6. Saturates at 0 near genesis.
fn reorg_rollback_range(divergent_at: u64) -> std::ops::RangeInclusive<u64> {
    let start = divergent_at.saturating_sub(REORG_DEPTH);
    let end = divergent_at.saturating_sub(1);
    start..=end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reorg_rollback_covers_exactly_reorg_depth_blocks() {
        let range = reorg_rollback_range(500);
        assert_eq!(*range.start(), 490);
        assert_eq!(*range.end(), 499);
        assert_eq!(range.count(), 10);
    }

    #[test]
    fn reorg_rollback_saturates_near_genesis() {
        let range = reorg_rollback_range(3);
        assert_eq!(*range.start(), 0);
        assert_eq!(*range.end(), 2);
    }
}
