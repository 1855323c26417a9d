//! Per-chain asset configuration — spec §6: `{ symbol, address, decimals,
//! ltvPercent }`. A missing LTV entry contributes to `totalAssetValue` but
//! not to `totalLTV`, and is logged (spec §4.9 step 3; REDESIGN note in
//! spec §9 treats it strictly as zero-LTV, never a default).

use ethers::types::Address;
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetConfig {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
    /// Whole-percent LTV ratio (e.g. `75` for 75%). `None` means "no LTV
    /// configured for this asset" — logged and treated as contributing
    /// zero to `totalLTV`, never defaulted to some other ratio.
    pub ltv_percent: Option<u32>,
}

#[derive(Default)]
pub struct AssetTable {
    assets: HashMap<(u64, Address), AssetConfig>,
}

impl AssetTable {
    pub fn new() -> Self {
        AssetTable {
            assets: HashMap::new(),
        }
    }

    pub fn insert(&mut self, chain_id: u64, config: AssetConfig) {
        self.assets.insert((chain_id, config.address), config);
    }

    pub fn get(&self, chain_id: u64, address: Address) -> Option<&AssetConfig> {
        self.assets.get(&(chain_id, address))
    }
}
