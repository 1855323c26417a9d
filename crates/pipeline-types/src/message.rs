//! Pub/sub wire contract (spec §6) and its normalization into the canonical
//! internal shape.
//!
//! The consumer accepts two shapes on the channel: the "enhanced" shape this
//! pipeline's own producer emits, and a "legacy" flat shape left over from an
//! earlier producer generation. Per the design note in spec §9, this is
//! modeled as an explicit sum type with a normalization step, rather than
//! threading `serde_json::Value` through the consumer.

use crate::transaction::MatchedLog;
use crate::wide_int::U256Dec;
use ethers::types::{Address, Bytes, H256};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTransaction {
    pub hash: H256,
    pub block_number: u64,
    pub chain_id: u64,
    pub chain_name: String,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256Dec,
    pub gas_used: Option<U256Dec>,
    pub gas_price: Option<U256Dec>,
    pub status: Option<u64>,
    pub logs: Vec<MatchedLog>,
    pub timestamp: u64,
    pub block_hash: H256,
    pub data: Option<Bytes>,
    pub topics: Vec<H256>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedEvent {
    pub name: String,
    pub contract: Address,
    pub args: serde_json::Value,
    pub address: Address,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    pub chain_id: u64,
    pub chain_name: String,
    pub block_number: u64,
    pub transaction_hash: H256,
    pub timestamp: u64,
}

/// The canonical, internal message shape every consumer handler operates on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainMessage {
    pub transaction: MessageTransaction,
    pub events: Vec<DecodedEvent>,
    pub timestamp: u64,
    pub metadata: MessageMetadata,
}

impl BlockchainMessage {
    /// Ascending `(blockNumber, logIndex)` ordering key for batch publish,
    /// per spec §4.6/§4.7.
    pub fn ordering_key(&self) -> (u64, u64) {
        let first_log_index = self
            .transaction
            .logs
            .first()
            .map(|log| log.log_index)
            .unwrap_or(0);
        (self.transaction.block_number, first_log_index)
    }
}

/// The legacy flat shape, documented in spec §6, that older producers may
/// still emit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyTransaction {
    pub block_hash: H256,
    pub block_number: u64,
    pub hash: H256,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256Dec,
    pub data: Option<Bytes>,
    pub chain_id: u64,
    pub chain_name: String,
    pub topics: Vec<H256>,
    #[serde(default)]
    pub logs: Option<Vec<MatchedLog>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyMessage {
    pub transaction: LegacyTransaction,
    pub timestamp: u64,
    pub topics: Vec<H256>,
}

impl LegacyMessage {
    fn normalize(self) -> BlockchainMessage {
        let tx = self.transaction;
        let logs = tx.logs.unwrap_or_default();
        let matched_topics = if tx.topics.is_empty() {
            self.topics.clone()
        } else {
            tx.topics.clone()
        };
        BlockchainMessage {
            transaction: MessageTransaction {
                hash: tx.hash,
                block_number: tx.block_number,
                chain_id: tx.chain_id,
                chain_name: tx.chain_name.clone(),
                from: tx.from,
                to: tx.to,
                value: tx.value,
                gas_used: None,
                gas_price: None,
                status: None,
                logs,
                timestamp: self.timestamp,
                block_hash: tx.block_hash,
                data: tx.data,
                topics: matched_topics,
            },
            events: Vec::new(),
            timestamp: self.timestamp,
            metadata: MessageMetadata {
                chain_id: tx.chain_id,
                chain_name: tx.chain_name,
                block_number: tx.block_number,
                transaction_hash: tx.hash,
                timestamp: self.timestamp,
            },
        }
    }
}

/// Either wire shape the channel may carry. `#[serde(untagged)]` tries each
/// variant in declaration order, so the richer `Enhanced` shape is attempted
/// first; a payload missing its `events`/`metadata` fields falls through to
/// `Legacy`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireMessage {
    Enhanced(BlockchainMessage),
    Legacy(LegacyMessage),
}

impl WireMessage {
    pub fn normalize(self) -> BlockchainMessage {
        match self {
            WireMessage::Enhanced(message) => message,
            WireMessage::Legacy(legacy) => legacy.normalize(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_legacy_json() -> serde_json::Value {
        serde_json::json!({
            "transaction": {
                "blockHash": format!("{:#x}", H256::zero()),
                "blockNumber": 10,
                "hash": format!("{:#x}", H256::repeat_byte(1)),
                "from": format!("{:#x}", Address::repeat_byte(2)),
                "value": "0",
                "data": "0x",
                "chainId": 1,
                "chainName": "ethereum",
                "topics": [format!("{:#x}", H256::repeat_byte(3))],
            },
            "timestamp": 123,
            "topics": [format!("{:#x}", H256::repeat_byte(3))],
        })
    }

    #[test]
    fn legacy_shape_normalizes_into_canonical_message() {
        let wire: WireMessage = serde_json::from_value(sample_legacy_json()).unwrap();
        let normalized = wire.normalize();
        assert_eq!(normalized.transaction.block_number, 10);
        assert_eq!(normalized.metadata.block_number, 10);
        assert!(normalized.events.is_empty());
    }
}
