//! Shared domain types for the block indexer / ownership-Merkle /
//! collateral-ledger pipeline. Nothing in this crate talks to a chain, a
//! database, or a wire transport — it is the vocabulary the other crates
//! share.

pub mod block;
pub mod decimal;
pub mod error;
pub mod ledger_entities;
pub mod message;
pub mod nft;
pub mod transaction;
pub mod wide_int;

pub use block::{Block, BlockLedgerStats, BlockStatus, ProcessedBlock, TopicFilter, UnprocessedBlock};
pub use decimal::UsdAmount;
pub use error::Kind;
pub use ledger_entities::{
    Borrow, BorrowStatus, Deposit, RelayerEvent, RelayerEventKey, RelayerEventStatus,
    RelayerEventType, User, VaultEvent, VaultEventKey, VaultEventType, Withdrawal,
    WithdrawalStatus,
};
pub use message::{BlockchainMessage, DecodedEvent, LegacyMessage, MessageMetadata, MessageTransaction, WireMessage};
pub use nft::{fold_ownership_snapshot, NftTransfer, OwnershipSnapshot};
pub use transaction::{FilteredTransaction, MatchedLog};
pub use wide_int::U256Dec;
