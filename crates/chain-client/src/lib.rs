//! Abstract EVM RPC access (spec §4.1), a bounded transaction/receipt cache
//! (§4.2), and the topic-matching pre-filter (§4.3).

pub mod cache;
pub mod client;
pub mod topics;

pub use cache::{CacheEntry, TxCache};
pub use client::{
    BlockSubscription, BlockWithTransactions, ChainClient, ChainClientError, EthersHttpClient,
    EthersWsClient,
};
pub use topics::TopicMatcher;
