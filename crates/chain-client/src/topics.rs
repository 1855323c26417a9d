//! `TopicMatcher` — spec §4.3: a Bloom pre-filter backed by an exact set of
//! topic0 hashes, each optionally scoped to an emitting contract.

use ethers::types::{Address, Log, H256};
use ethers::utils::keccak256;
use pipeline_types::TopicFilter;
use std::collections::{HashMap, HashSet};

const BLOOM_BITS: usize = 2048;
const BLOOM_BYTES: usize = BLOOM_BITS / 8;
const BLOOM_HASHES: usize = 3;

/// A small Bloom filter over lowercased topic0 hex strings. Three bit
/// indices are derived from non-overlapping 16-bit windows of a single
/// `keccak256` digest of the topic bytes — the same construction the EVM
/// itself uses for per-log/per-block blooms, just sized down to ~2048 bits.
#[derive(Clone)]
struct Bloom {
    bits: [u8; BLOOM_BYTES],
}

impl Bloom {
    fn empty() -> Self {
        Bloom {
            bits: [0u8; BLOOM_BYTES],
        }
    }

    fn indices(topic0: &H256) -> [usize; BLOOM_HASHES] {
        let digest = keccak256(topic0.as_bytes());
        let mut indices = [0usize; BLOOM_HASHES];
        for (i, idx) in indices.iter_mut().enumerate() {
            let hi = digest[i * 2] as usize;
            let lo = digest[i * 2 + 1] as usize;
            *idx = ((hi << 8) | lo) % BLOOM_BITS;
        }
        indices
    }

    fn insert(&mut self, topic0: &H256) {
        for idx in Self::indices(topic0) {
            self.bits[idx / 8] |= 1 << (idx % 8);
        }
    }

    fn may_contain(&self, topic0: &H256) -> bool {
        Self::indices(topic0)
            .iter()
            .all(|idx| self.bits[idx / 8] & (1 << (idx % 8)) != 0)
    }
}

pub struct TopicMatcher {
    filters: Vec<TopicFilter>,
    bloom: Bloom,
    exact: HashSet<H256>,
    by_contract: HashMap<Address, Vec<H256>>,
}

impl TopicMatcher {
    pub fn new() -> Self {
        TopicMatcher {
            filters: Vec::new(),
            bloom: Bloom::empty(),
            exact: HashSet::new(),
            by_contract: HashMap::new(),
        }
    }

    pub fn from_filters(filters: Vec<TopicFilter>) -> Self {
        let mut matcher = TopicMatcher::new();
        for filter in filters {
            matcher.add(filter);
        }
        matcher
    }

    pub fn add(&mut self, filter: TopicFilter) {
        self.bloom.insert(&filter.hash);
        self.exact.insert(filter.hash);
        if let Some(contract) = filter.contract {
            self.by_contract.entry(contract).or_default().push(filter.hash);
        }
        self.filters.push(filter);
    }

    pub fn remove(&mut self, hash: H256) {
        self.filters.retain(|filter| filter.hash != hash);
        self.rebuild();
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn filters(&self) -> &[TopicFilter] {
        &self.filters
    }

    /// The set of contract addresses any active filter constrains matches
    /// to. Empty iff no filter names a contract.
    pub fn constrained_contracts(&self) -> Vec<Address> {
        self.by_contract.keys().copied().collect()
    }

    pub fn has_contract_constraints(&self) -> bool {
        !self.by_contract.is_empty()
    }

    /// Cheap negative pre-filter: `false` means "definitely not a match".
    pub fn may_match(&self, topic0: &H256) -> bool {
        self.bloom.may_contain(topic0)
    }

    /// Exact match against a decoded log. Returns the matched topic0 iff
    /// `log.topics[0]` is in the exact set and either the filter carries no
    /// contract constraint or `log.address == filter.contract`.
    pub fn match_log(&self, log: &Log) -> Option<H256> {
        let topic0 = *log.topics.first()?;
        if !self.exact.contains(&topic0) {
            return None;
        }
        let matches = self.filters.iter().any(|filter| {
            filter.hash == topic0 && filter.contract.map_or(true, |c| c == log.address)
        });
        matches.then_some(topic0)
    }

    fn rebuild(&mut self) {
        let filters = std::mem::take(&mut self.filters);
        *self = TopicMatcher::new();
        for filter in filters {
            self.add(filter);
        }
    }
}

impl Default for TopicMatcher {
    fn default() -> Self {
        TopicMatcher::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with(topic0: H256, address: Address) -> Log {
        Log {
            address,
            topics: vec![topic0],
            ..Default::default()
        }
    }

    #[test]
    fn matches_unscoped_filter_on_any_contract() {
        let topic0 = H256::repeat_byte(7);
        let matcher = TopicMatcher::from_filters(vec![TopicFilter::new(topic0)]);
        assert!(matcher.may_match(&topic0));
        let log = log_with(topic0, Address::repeat_byte(1));
        assert_eq!(matcher.match_log(&log), Some(topic0));
    }

    #[test]
    fn scoped_filter_rejects_logs_from_other_contracts() {
        let topic0 = H256::repeat_byte(7);
        let contract = Address::repeat_byte(9);
        let matcher = TopicMatcher::from_filters(vec![TopicFilter::scoped(topic0, contract)]);
        let wrong_contract = log_with(topic0, Address::repeat_byte(1));
        assert!(matcher.match_log(&wrong_contract).is_none());
        let right_contract = log_with(topic0, contract);
        assert_eq!(matcher.match_log(&right_contract), Some(topic0));
    }

    #[test]
    fn bloom_never_false_negatives_on_inserted_topics() {
        let mut matcher = TopicMatcher::new();
        let topics: Vec<H256> = (0..50u8).map(H256::repeat_byte).collect();
        for topic in &topics {
            matcher.add(TopicFilter::new(*topic));
        }
        for topic in &topics {
            assert!(matcher.may_match(topic));
        }
    }
}
