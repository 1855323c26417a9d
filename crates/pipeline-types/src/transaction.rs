use crate::message::{BlockchainMessage, MessageMetadata, MessageTransaction};
use crate::wide_int::U256Dec;
use ethers::types::{Address, Bytes, H256};
use serde::{Deserialize, Serialize};

/// A single log entry that matched the active `TopicMatcher`, carried in
/// block (i.e. log index) order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedLog {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Bytes,
    pub log_index: u64,
}

/// `FilteredTransaction` — spec §3. Only the logs that matched the active
/// topic set are retained; a transaction with zero matched logs is never
/// constructed (BlockProcessor only emits transactions with >=1 match).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredTransaction {
    pub chain_id: u64,
    pub chain_name: String,
    pub block_hash: H256,
    pub block_number: u64,
    pub hash: H256,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256Dec,
    pub data: Option<Bytes>,
    pub status: Option<u64>,
    pub gas_used: Option<U256Dec>,
    pub gas_price: Option<U256Dec>,
    pub matched_topics: Vec<H256>,
    pub logs: Vec<MatchedLog>,
}

impl FilteredTransaction {
    /// Ordering key used when batching matched transactions for publish:
    /// `(blockNumber, logIndex)` ascending, per spec §4.6's publish
    /// contract. Ties within a transaction use its first matched log.
    pub fn ordering_key(&self) -> (u64, u64) {
        let first_log_index = self.logs.first().map(|log| log.log_index).unwrap_or(0);
        (self.block_number, first_log_index)
    }

    /// Lift an indexed transaction into the canonical pub/sub message shape
    /// (spec §6). `events` is left empty here; ABI decoding into named
    /// `DecodedEvent`s is layered on by callers that carry contract ABIs.
    pub fn into_message(self, block_timestamp: u64) -> BlockchainMessage {
        let topics = self.matched_topics.clone();
        BlockchainMessage {
            transaction: MessageTransaction {
                hash: self.hash,
                block_number: self.block_number,
                chain_id: self.chain_id,
                chain_name: self.chain_name.clone(),
                from: self.from,
                to: self.to,
                value: self.value,
                gas_used: self.gas_used,
                gas_price: self.gas_price,
                status: self.status,
                logs: self.logs,
                timestamp: block_timestamp,
                block_hash: self.block_hash,
                data: self.data,
                topics,
            },
            events: Vec::new(),
            timestamp: block_timestamp,
            metadata: MessageMetadata {
                chain_id: self.chain_id,
                chain_name: self.chain_name,
                block_number: self.block_number,
                transaction_hash: self.hash,
                timestamp: block_timestamp,
            },
        }
    }
}
