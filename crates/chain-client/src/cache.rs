//! Bounded mapping `hash -> {receipt?, transaction?}` — spec §4.2.
//!
//! A `None` receipt is a legitimate cached value: it records "previously
//! fetched, turned out to be a non-contract call", sparing a re-fetch. The
//! pruning policy keeps the most recently inserted 75% of the cap whenever
//! the cache overflows, mirroring an LRU without needing access-time
//! bookkeeping on every read.

use ethers::types::{Transaction, TransactionReceipt, H256};
use indexmap::IndexMap;

#[derive(Clone, Debug, Default)]
pub struct CacheEntry {
    pub transaction: Option<Transaction>,
    pub receipt: Option<TransactionReceipt>,
}

pub struct TxCache {
    capacity: usize,
    entries: IndexMap<H256, CacheEntry>,
}

impl TxCache {
    pub fn new(capacity: usize) -> Self {
        TxCache {
            capacity: capacity.max(1),
            entries: IndexMap::new(),
        }
    }

    pub fn get(&self, hash: &H256) -> Option<&CacheEntry> {
        self.entries.get(hash)
    }

    pub fn put_transaction(&mut self, hash: H256, transaction: Transaction) {
        let entry = self.entries.entry(hash).or_default();
        entry.transaction = Some(transaction);
        self.prune_if_needed();
    }

    pub fn put_receipt(&mut self, hash: H256, receipt: Option<TransactionReceipt>) {
        let entry = self.entries.entry(hash).or_default();
        entry.receipt = receipt;
        self.prune_if_needed();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Retain the most recently inserted 75% of `capacity` once the cache
    /// overflows. `IndexMap` preserves insertion order, so the oldest
    /// entries sit at the front and `shift_remove` keeps the remaining map
    /// in its original relative order.
    fn prune_if_needed(&mut self) {
        if self.entries.len() <= self.capacity {
            return;
        }
        let target = (self.capacity * 3) / 4;
        let overflow = self.entries.len() - target;
        for _ in 0..overflow {
            self.entries.shift_remove_index(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_receipt_is_a_legitimate_cache_hit() {
        let mut cache = TxCache::new(10);
        let hash = H256::repeat_byte(1);
        cache.put_receipt(hash, None);
        let entry = cache.get(&hash).expect("entry should exist");
        assert!(entry.receipt.is_none());
    }

    #[test]
    fn overflow_prunes_oldest_entries_first() {
        let mut cache = TxCache::new(4);
        for i in 0..6u8 {
            cache.put_receipt(H256::repeat_byte(i), None);
        }
        assert!(cache.len() <= 4);
        // the most recently inserted hashes should remain
        assert!(cache.get(&H256::repeat_byte(5)).is_some());
        assert!(cache.get(&H256::repeat_byte(4)).is_some());
        // the oldest insertions should have been pruned
        assert!(cache.get(&H256::repeat_byte(0)).is_none());
        assert!(cache.get(&H256::repeat_byte(1)).is_none());
    }
}
