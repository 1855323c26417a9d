//! `PriceOracle` — spec §4.9/§6: "Given (chainId, tokenAddress, amount) →
//! USD value; cached briefly." The concrete Alchemy-backed implementation is
//! explicitly out of scope (spec §1 Non-goals: "pricing-API integration,
//! treated as an opaque PriceOracle"); this crate only defines the
//! capability and a decorator that adds the "cached briefly" behavior,
//! following the `ChainClient`/`TopicMatcher` trait-at-the-seam idiom in
//! `chain-client`.

use async_std::sync::RwLock;
use async_trait::async_trait;
use ethers::types::{Address, U256};
use pipeline_types::UsdAmount;
use snafu::Snafu;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Snafu)]
pub enum OracleError {
    #[snafu(display("price lookup for {:#x} on chain {} failed: {}", token_address, chain_id, reason))]
    Lookup {
        chain_id: u64,
        token_address: Address,
        reason: String,
    },
}

impl OracleError {
    pub fn kind(&self) -> pipeline_types::Kind {
        pipeline_types::Kind::Transient
    }
}

#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn usd_value(
        &self,
        chain_id: u64,
        token_address: Address,
        amount: U256,
    ) -> Result<UsdAmount, OracleError>;
}

/// TTL defining "cached briefly" in spec §6's PriceOracle row — long enough
/// to absorb the handful of oracle calls a single COLLATERAL_REQUEST makes
/// across its LTV computation, short enough that a stale price never
/// survives past the next block.
const CACHE_TTL: Duration = Duration::from_secs(5);

/// Decorates any `PriceOracle` with a short-lived cache keyed on the exact
/// `(chainId, tokenAddress, amount)` triple, per spec §6.
pub struct CachedPriceOracle<O> {
    inner: O,
    ttl: Duration,
    cache: RwLock<HashMap<(u64, Address, U256), (UsdAmount, Instant)>>,
}

impl<O: PriceOracle> CachedPriceOracle<O> {
    pub fn new(inner: O) -> Self {
        CachedPriceOracle {
            inner,
            ttl: CACHE_TTL,
            cache: RwLock::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn with_ttl(inner: O, ttl: Duration) -> Self {
        CachedPriceOracle {
            inner,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<O: PriceOracle> PriceOracle for CachedPriceOracle<O> {
    async fn usd_value(
        &self,
        chain_id: u64,
        token_address: Address,
        amount: U256,
    ) -> Result<UsdAmount, OracleError> {
        let key = (chain_id, token_address, amount);
        if let Some((value, fetched_at)) = self.cache.read().await.get(&key) {
            if fetched_at.elapsed() < self.ttl {
                return Ok(*value);
            }
        }
        let value = self.inner.usd_value(chain_id, token_address, amount).await?;
        self.cache.write().await.insert(key, (value, Instant::now()));
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingOracle {
        calls: Arc<AtomicUsize>,
        value: UsdAmount,
    }

    #[async_trait]
    impl PriceOracle for CountingOracle {
        async fn usd_value(
            &self,
            _chain_id: u64,
            _token_address: Address,
            _amount: U256,
        ) -> Result<UsdAmount, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.value)
        }
    }

    #[async_std::test]
    async fn repeated_lookups_within_ttl_hit_the_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let oracle = CachedPriceOracle::with_ttl(
            CountingOracle {
                calls: calls.clone(),
                value: UsdAmount::from_scaled(100),
            },
            Duration::from_secs(60),
        );
        let token = Address::repeat_byte(1);
        for _ in 0..5 {
            oracle.usd_value(1, token, U256::from(10)).await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[async_std::test]
    async fn a_different_amount_is_a_separate_cache_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let oracle = CachedPriceOracle::with_ttl(
            CountingOracle {
                calls: calls.clone(),
                value: UsdAmount::from_scaled(100),
            },
            Duration::from_secs(60),
        );
        let token = Address::repeat_byte(1);
        oracle.usd_value(1, token, U256::from(10)).await.unwrap();
        oracle.usd_value(1, token, U256::from(20)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[async_std::test]
    async fn an_expired_entry_is_refetched() {
        let calls = Arc::new(AtomicUsize::new(0));
        let oracle = CachedPriceOracle::with_ttl(
            CountingOracle {
                calls: calls.clone(),
                value: UsdAmount::from_scaled(100),
            },
            Duration::from_millis(10),
        );
        let token = Address::repeat_byte(1);
        oracle.usd_value(1, token, U256::from(10)).await.unwrap();
        async_std::task::sleep(Duration::from_millis(30)).await;
        oracle.usd_value(1, token, U256::from(10)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
