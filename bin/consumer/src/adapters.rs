//! Concrete `PriceOracle`/`LendingPool` adapters. Both capabilities are
//! explicitly out of scope for a live backing implementation (spec §1
//! Non-goals name "pricing-API integration" and leave `LendingPool`'s
//! RPC-backed implementation external) — these exist so the consumer
//! binary is actually runnable, not as a stand-in for the real thing.

use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::providers::{Http, Provider};
use ethers::types::{Address, U256};
use ledger_core::{AssetTable, LendingPool, LendingPoolError, OracleError, PriceOracle};
use pipeline_types::UsdAmount;
use std::collections::HashMap;
use std::sync::Arc;

abigen!(
    LendingPoolContract,
    r#"[
        function utilization(uint256 tokenId) external view returns (uint64)
    ]"#,
);

/// Reads utilization straight off the configured lending-pool contract.
pub struct ChainLendingPool {
    contract: LendingPoolContract<Provider<Http>>,
}

impl ChainLendingPool {
    pub fn new(provider: Arc<Provider<Http>>, address: Address) -> Self {
        ChainLendingPool {
            contract: LendingPoolContract::new(address, provider),
        }
    }
}

#[async_trait]
impl LendingPool for ChainLendingPool {
    async fn utilization(&self, token_id: U256) -> Result<u64, LendingPoolError> {
        self.contract
            .utilization(token_id)
            .call()
            .await
            .map_err(|source| LendingPoolError::Lookup {
                protocol: self.contract.address(),
                reason: source.to_string(),
            })
    }
}

/// A static per-`(chainId, tokenAddress)` USD price table, quoted per one
/// whole unit of the asset (i.e. per `10^decimals` base units). Computes
/// `usd_value` with integer arithmetic to avoid the float drift a real
/// pricing feed's output would otherwise need rounding rules for.
pub struct TablePriceOracle {
    assets: Arc<AssetTable>,
    prices: HashMap<(u64, Address), UsdAmount>,
}

impl TablePriceOracle {
    pub fn new(assets: Arc<AssetTable>, prices: HashMap<(u64, Address), UsdAmount>) -> Self {
        TablePriceOracle { assets, prices }
    }
}

#[async_trait]
impl PriceOracle for TablePriceOracle {
    async fn usd_value(&self, chain_id: u64, token_address: Address, amount: U256) -> Result<UsdAmount, OracleError> {
        let config = self.assets.get(chain_id, token_address).ok_or_else(|| OracleError::Lookup {
            chain_id,
            token_address,
            reason: "asset not configured".to_string(),
        })?;
        let price = self
            .prices
            .get(&(chain_id, token_address))
            .copied()
            .ok_or_else(|| OracleError::Lookup {
                chain_id,
                token_address,
                reason: "no configured price".to_string(),
            })?;
        // Assumes both the raw amount and the priced result fit in 128 bits,
        // true for any realistic on-chain balance at a realistic USD price.
        let base_units = amount.low_u128() as i128;
        let scale = 10i128.pow(config.decimals as u32);
        let usd_raw = base_units
            .checked_mul(price.raw())
            .and_then(|scaled| scaled.checked_div(scale))
            .ok_or_else(|| OracleError::Lookup {
                chain_id,
                token_address,
                reason: "usd value computation overflowed".to_string(),
            })?;
        Ok(UsdAmount::from_scaled(usd_raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::AssetConfig;

    #[async_std::test]
    async fn computes_usd_value_from_configured_price() {
        let usdc = Address::repeat_byte(7);
        let mut assets = AssetTable::new();
        assets.insert(
            1,
            AssetConfig {
                symbol: "USDC".into(),
                address: usdc,
                decimals: 6,
                ltv_percent: Some(80),
            },
        );
        let mut prices = HashMap::new();
        prices.insert((1, usdc), UsdAmount::from_scaled(100_000_000)); // $1.00
        let oracle = TablePriceOracle::new(Arc::new(assets), prices);
        let value = oracle.usd_value(1, usdc, U256::from(5_000_000u64)).await.unwrap();
        assert_eq!(value.to_string(), "5.00000000");
    }
}
