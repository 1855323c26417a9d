use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

/// `TopicFilter` — spec §3. `contract` scopes the match to logs emitted by
/// that address; when absent the filter matches the topic0 on any contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicFilter {
    pub hash: H256,
    pub contract: Option<Address>,
    pub description: Option<String>,
}

impl TopicFilter {
    pub fn new(hash: H256) -> Self {
        TopicFilter {
            hash,
            contract: None,
            description: None,
        }
    }

    pub fn scoped(hash: H256, contract: Address) -> Self {
        TopicFilter {
            hash,
            contract: Some(contract),
            description: None,
        }
    }
}

/// `Block` — spec §3. Immutable once confirmed; `(chainId, number)` is the
/// logical identity, `hash` detects divergence from a prior observation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub chain_id: u64,
    pub number: u64,
    pub hash: H256,
    pub parent_hash: H256,
    pub timestamp: u64,
    pub transactions: Vec<H256>,
}

/// State machine for a block awaiting indexing — spec §3.
/// `PENDING -> PROCESSING -> {COMPLETED, FAILED}`; any state can transition
/// to `REORGED` on a hash mismatch against a freshly observed chain head.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Reorged,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnprocessedBlock {
    pub chain_id: u64,
    pub number: u64,
    pub hash: H256,
    pub parent_hash: H256,
    pub status: BlockStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub block_data: Block,
}

impl UnprocessedBlock {
    pub fn new_pending(block: Block) -> Self {
        UnprocessedBlock {
            chain_id: block.chain_id,
            number: block.number,
            hash: block.hash,
            parent_hash: block.parent_hash,
            status: BlockStatus::Pending,
            retry_count: 0,
            error_message: None,
            block_data: block,
        }
    }
}

/// Progress marker for resume — spec §3. `latestProcessed(chainId)` is
/// `max(number) where not isReorged`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedBlock {
    pub chain_id: u64,
    pub number: u64,
    pub hash: H256,
    pub parent_hash: H256,
    pub block_data: Block,
    pub is_reorged: bool,
}

/// Aggregate counters returned by `BlockLedger::stats`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLedgerStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub reorged: u64,
}
