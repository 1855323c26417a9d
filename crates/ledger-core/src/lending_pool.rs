//! `LendingPool` — spec §4.9: "Σ over approved borrows' distinct protocols
//! of `LendingPool(protocol).utilization(tokenId)/1_000_000`." One registry
//! entry per on-chain lending protocol address; like `PriceOracle`, the
//! concrete RPC-backed implementation lives outside this crate's scope.

use async_trait::async_trait;
use ethers::types::{Address, U256};
use snafu::Snafu;
use std::collections::HashMap;

#[derive(Debug, Snafu)]
pub enum LendingPoolError {
    #[snafu(display("utilization lookup for protocol {:#x} failed: {}", protocol, reason))]
    Lookup { protocol: Address, reason: String },
}

impl LendingPoolError {
    pub fn kind(&self) -> pipeline_types::Kind {
        pipeline_types::Kind::Transient
    }
}

#[async_trait]
pub trait LendingPool: Send + Sync {
    /// Raw on-chain utilization figure for `tokenId`, in micro-USD (1 unit
    /// = 1e-6 USD) — the scale spec §4.9's `/1_000_000` divisor implies.
    async fn utilization(&self, token_id: U256) -> Result<u64, LendingPoolError>;
}

/// Protocol address -> pool handle, looked up once per distinct protocol
/// among a token's approved borrows (spec §4.9 step 4).
#[derive(Default)]
pub struct LendingPoolRegistry {
    pools: HashMap<Address, std::sync::Arc<dyn LendingPool>>,
}

impl LendingPoolRegistry {
    pub fn new() -> Self {
        LendingPoolRegistry {
            pools: HashMap::new(),
        }
    }

    pub fn register(&mut self, protocol: Address, pool: std::sync::Arc<dyn LendingPool>) {
        self.pools.insert(protocol, pool);
    }

    pub fn get(&self, protocol: &Address) -> Option<&std::sync::Arc<dyn LendingPool>> {
        self.pools.get(protocol)
    }
}
