//! `BlockProcessor` — spec §4.4, the core of C1a.

use crate::adaptive::AdaptiveConcurrency;
use async_std::sync::RwLock;
use chain_client::{BlockWithTransactions, ChainClient, TopicMatcher, TxCache};
use ethers::types::{Transaction, H256};
use futures_util::stream::{self, StreamExt};
use pipeline_types::{FilteredTransaction, MatchedLog};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{event, Level};

/// Fraction of a 5-tx sample that must be contract calls before the
/// no-contract-constraint fallback pre-filter bothers filtering at all
/// (spec §4.4 step 3).
const SAMPLE_SIZE: usize = 5;
const SAMPLE_CONTRACT_RATIO_THRESHOLD: f64 = 0.2;

/// Cancellation token for one block's in-flight receipt fetches. A new
/// block cancels the previous one's token (spec §4.4/§5); canceled fetches
/// must not write partial data to the cache.
#[derive(Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        AbortSignal(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct BlockProcessor {
    chain_id: u64,
    chain_name: String,
    chain_client: Arc<dyn ChainClient>,
    cache: Arc<RwLock<TxCache>>,
    concurrency: Arc<AdaptiveConcurrency>,
}

impl BlockProcessor {
    pub fn new(
        chain_id: u64,
        chain_name: String,
        chain_client: Arc<dyn ChainClient>,
        cache: Arc<RwLock<TxCache>>,
        concurrency: Arc<AdaptiveConcurrency>,
    ) -> Self {
        BlockProcessor {
            chain_id,
            chain_name,
            chain_client,
            cache,
            concurrency,
        }
    }

    /// Run the full algorithm from spec §4.4 over one block, returning
    /// matched transactions in block order. Cancellation via `abort` stops
    /// further receipt fetches but always returns whatever was completed
    /// before the signal was raised.
    pub async fn process(
        &self,
        block: &BlockWithTransactions,
        matcher: &TopicMatcher,
        abort: &AbortSignal,
    ) -> Vec<FilteredTransaction> {
        let start = Instant::now();
        let total_txs = block.transactions.len();

        if matcher.is_empty() || block.transactions.is_empty() {
            self.concurrency.record_block(start.elapsed(), total_txs, 0);
            return Vec::new();
        }

        let candidates = Self::pre_filter(&block.transactions, matcher);

        let limit = self.concurrency.current_limit();
        let cache = self.cache.clone();
        let chain_client = self.chain_client.clone();
        let chain_id = self.chain_id;
        let chain_name = self.chain_name.clone();
        let block_hash = block.block.hash;
        let block_number = block.block.number;

        let results: Vec<Option<FilteredTransaction>> = stream::iter(candidates)
            .map(|tx| {
                let cache = cache.clone();
                let chain_client = chain_client.clone();
                let chain_name = chain_name.clone();
                let abort = abort.clone();
                async move {
                    if abort.is_cancelled() {
                        return None;
                    }
                    Self::process_one(
                        chain_id,
                        chain_name,
                        block_hash,
                        block_number,
                        tx,
                        matcher,
                        &cache,
                        chain_client.as_ref(),
                        &abort,
                    )
                    .await
                }
            })
            .buffer_unordered(limit.max(1))
            .collect()
            .await;

        let mut filtered: Vec<FilteredTransaction> = results.into_iter().flatten().collect();
        filtered.sort_by_key(|tx| tx.ordering_key());

        self.concurrency
            .record_block(start.elapsed(), total_txs, filtered.len());
        filtered
    }

    /// Step 3: pre-filter candidate transactions before fetching receipts.
    fn pre_filter(transactions: &[Transaction], matcher: &TopicMatcher) -> Vec<Transaction> {
        if matcher.has_contract_constraints() {
            let constrained: HashSet<_> = matcher.constrained_contracts().into_iter().collect();
            transactions
                .iter()
                .filter(|tx| {
                    let to_matches = tx.to.map_or(false, |to| constrained.contains(&to));
                    let has_calldata = !tx.input.0.is_empty();
                    to_matches || has_calldata
                })
                .cloned()
                .collect()
        } else {
            // Cost-optimization heuristic (spec §4.4 step 3): only bother
            // pre-filtering by calldata presence if a small sample shows the
            // block is mostly simple value transfers.
            let sample_size = transactions.len().min(SAMPLE_SIZE);
            let sample_contract_calls = transactions[..sample_size]
                .iter()
                .filter(|tx| !tx.input.0.is_empty())
                .count();
            let contract_ratio = if sample_size == 0 {
                1.0
            } else {
                sample_contract_calls as f64 / sample_size as f64
            };
            if contract_ratio < SAMPLE_CONTRACT_RATIO_THRESHOLD {
                transactions
                    .iter()
                    .filter(|tx| !tx.input.0.is_empty())
                    .cloned()
                    .collect()
            } else {
                transactions.to_vec()
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_one(
        chain_id: u64,
        chain_name: String,
        block_hash: H256,
        block_number: u64,
        tx: Transaction,
        matcher: &TopicMatcher,
        cache: &Arc<RwLock<TxCache>>,
        chain_client: &dyn ChainClient,
        abort: &AbortSignal,
    ) -> Option<FilteredTransaction> {
        let cached_receipt = {
            let guard = cache.read().await;
            guard.get(&tx.hash).and_then(|entry| entry.receipt.clone())
        };

        let receipt = match cached_receipt {
            Some(receipt) => Some(receipt),
            None => {
                if abort.is_cancelled() {
                    return None;
                }
                match chain_client.get_receipt(tx.hash).await {
                    Ok(receipt) => {
                        if abort.is_cancelled() {
                            // Don't let a late-arriving fetch write into the
                            // cache after this block was cancelled.
                            return None;
                        }
                        let mut guard = cache.write().await;
                        guard.put_receipt(tx.hash, receipt.clone());
                        receipt
                    }
                    Err(error) => {
                        event!(
                            Level::WARN,
                            tx_hash = %tx.hash,
                            %error,
                            "failed to fetch transaction receipt; omitting transaction"
                        );
                        return None;
                    }
                }
            }
        };

        let receipt = receipt?;
        let mut matched_topics = Vec::new();
        let mut logs = Vec::new();
        for log in &receipt.logs {
            let Some(topic0) = log.topics.first() else {
                continue;
            };
            if !matcher.may_match(topic0) {
                continue;
            }
            if let Some(matched_topic) = matcher.match_log(log) {
                matched_topics.push(matched_topic);
                logs.push(MatchedLog {
                    address: log.address,
                    topics: log.topics.clone(),
                    data: log.data.clone(),
                    log_index: log.log_index.map(|idx| idx.as_u64()).unwrap_or_default(),
                });
            }
        }

        if logs.is_empty() {
            return None;
        }
        logs.sort_by_key(|log| log.log_index);

        Some(FilteredTransaction {
            chain_id,
            chain_name,
            block_hash,
            block_number,
            hash: tx.hash,
            from: tx.from,
            to: tx.to,
            value: tx.value.into(),
            data: if tx.input.0.is_empty() {
                None
            } else {
                Some(tx.input.clone())
            },
            status: receipt.status.map(|s| s.as_u64()),
            gas_used: receipt.gas_used.map(Into::into),
            gas_price: tx.gas_price.map(Into::into),
            matched_topics,
            logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Bytes;

    fn tx_with(to: Option<ethers::types::Address>, input: Bytes) -> Transaction {
        Transaction {
            to,
            input,
            ..Default::default()
        }
    }

    #[test]
    fn pre_filter_keeps_calls_to_constrained_contract_or_with_calldata() {
        let contract = ethers::types::Address::repeat_byte(0xAB);
        let matcher = TopicMatcher::from_filters(vec![pipeline_types::TopicFilter::scoped(
            H256::repeat_byte(1),
            contract,
        )]);
        let transactions = vec![
            tx_with(Some(contract), Bytes::default()),
            tx_with(Some(ethers::types::Address::repeat_byte(2)), Bytes::from(vec![1, 2, 3])),
            tx_with(Some(ethers::types::Address::repeat_byte(3)), Bytes::default()),
        ];
        let candidates = BlockProcessor::pre_filter(&transactions, &matcher);
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn pre_filter_applies_calldata_heuristic_when_unconstrained_and_sparse() {
        let matcher = TopicMatcher::from_filters(vec![pipeline_types::TopicFilter::new(
            H256::repeat_byte(1),
        )]);
        // 5-tx sample: only one has calldata -> ratio 0.2, not < threshold,
        // so the heuristic should NOT engage and all txs pass through.
        let transactions: Vec<Transaction> = (0..5)
            .map(|i| tx_with(None, if i == 0 { Bytes::from(vec![1]) } else { Bytes::default() }))
            .collect();
        let candidates = BlockProcessor::pre_filter(&transactions, &matcher);
        assert_eq!(candidates.len(), 5);
    }

    #[test]
    fn pre_filter_heuristic_drops_calldata_free_txs_when_contract_ratio_is_low() {
        let matcher = TopicMatcher::from_filters(vec![pipeline_types::TopicFilter::new(
            H256::repeat_byte(1),
        )]);
        // The lone calldata-bearing tx sits outside the first-5 sample, so
        // the sample sees a 0% contract-call ratio and the heuristic
        // engages, dropping the other calldata-free transactions.
        let transactions: Vec<Transaction> = (0..10)
            .map(|i| tx_with(None, if i == 7 { Bytes::from(vec![1]) } else { Bytes::default() }))
            .collect();
        let candidates = BlockProcessor::pre_filter(&transactions, &matcher);
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn ordering_key_sorts_by_block_then_log_index() {
        let mk = |block: u64, log_index: u64| FilteredTransaction {
            chain_id: 1,
            chain_name: "test".into(),
            block_hash: H256::zero(),
            block_number: block,
            hash: H256::zero(),
            from: Default::default(),
            to: None,
            value: Default::default(),
            data: None,
            status: None,
            gas_used: None,
            gas_price: None,
            matched_topics: vec![],
            logs: vec![MatchedLog {
                address: Default::default(),
                topics: vec![],
                data: Bytes::default(),
                log_index,
            }],
        };
        let mut txs = vec![mk(2, 1), mk(1, 5), mk(1, 2)];
        txs.sort_by_key(|tx| tx.ordering_key());
        assert_eq!(
            txs.iter().map(|t| (t.block_number, t.logs[0].log_index)).collect::<Vec<_>>(),
            vec![(1, 2), (1, 5), (2, 1)]
        );
    }
}
