//! The block indexer (C1): adaptive-concurrency receipt fetching
//! (`adaptive`), per-block pre-filter + fetch pipeline (`block_processor`),
//! durable reorg-aware bookkeeping (`block_ledger`), and the orchestrator
//! that ties them to a `ChainClient` and a `message_bus::Publisher`
//! (`indexer`).

pub mod adaptive;
pub mod block_ledger;
pub mod block_processor;
pub mod indexer;

pub use adaptive::{AdaptiveConcurrency, AdaptiveConcurrencyConfig};
pub use block_ledger::{BlockLedger, BlockLedgerError, MAX_RETRIES, REORG_DEPTH};
pub use block_processor::{AbortSignal, BlockProcessor};
pub use indexer::{Indexer, IndexerConfig, IndexerError, IndexerState};
