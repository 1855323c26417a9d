//! Parses `ConsumerOptions.assets` entries of the form
//! `SYMBOL=ADDRESS=DECIMALS=LTV_PERCENT=USD_PRICE_PER_UNIT` into the
//! `AssetTable` and `TablePriceOracle` price map this process is configured
//! for one chain with. `LTV_PERCENT` may be empty, per spec §6.

use ethers::types::Address;
use ledger_core::AssetConfig;
use pipeline_types::UsdAmount;
use snafu::Snafu;
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Snafu)]
pub enum AssetEntrySnafu {
    #[snafu(display("asset entry '{}' does not have 5 '='-delimited fields", entry))]
    Shape { entry: String },
    #[snafu(display("asset entry '{}' has an invalid address: {}", entry, reason))]
    Address { entry: String, reason: String },
    #[snafu(display("asset entry '{}' has an invalid decimals field: {}", entry, reason))]
    Decimals { entry: String, reason: String },
    #[snafu(display("asset entry '{}' has an invalid LTV percent: {}", entry, reason))]
    Ltv { entry: String, reason: String },
    #[snafu(display("asset entry '{}' has an invalid USD price: {}", entry, reason))]
    Price { entry: String, reason: String },
}

pub struct ParsedAsset {
    pub config: AssetConfig,
    pub price: UsdAmount,
}

pub fn parse_asset_entry(entry: &str) -> Result<ParsedAsset, AssetEntrySnafu> {
    let fields: Vec<&str> = entry.split('=').collect();
    let [symbol, address, decimals, ltv, price] = fields.as_slice() else {
        return Err(AssetEntrySnafu::Shape {
            entry: entry.to_string(),
        });
    };
    let address = Address::from_str(address).map_err(|err| AssetEntrySnafu::Address {
        entry: entry.to_string(),
        reason: err.to_string(),
    })?;
    let decimals: u8 = decimals.parse().map_err(|err: std::num::ParseIntError| AssetEntrySnafu::Decimals {
        entry: entry.to_string(),
        reason: err.to_string(),
    })?;
    let ltv_percent = if ltv.is_empty() {
        None
    } else {
        Some(
            ltv.parse()
                .map_err(|err: std::num::ParseIntError| AssetEntrySnafu::Ltv {
                    entry: entry.to_string(),
                    reason: err.to_string(),
                })?,
        )
    };
    let price: UsdAmount = price.parse().map_err(|err| AssetEntrySnafu::Price {
        entry: entry.to_string(),
        reason: format!("{:?}", err),
    })?;
    Ok(ParsedAsset {
        config: AssetConfig {
            symbol: symbol.to_string(),
            address,
            decimals,
            ltv_percent,
        },
        price,
    })
}

pub fn parse_asset_entries(
    chain_id: u64,
    entries: &[String],
) -> Result<(ledger_core::AssetTable, HashMap<(u64, Address), UsdAmount>), AssetEntrySnafu> {
    let mut assets = ledger_core::AssetTable::new();
    let mut prices = HashMap::new();
    for entry in entries {
        let parsed = parse_asset_entry(entry)?;
        prices.insert((chain_id, parsed.config.address), parsed.price);
        assets.insert(chain_id, parsed.config);
    }
    Ok((assets, prices))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_entry() {
        let entry = "USDC=0x0000000000000000000000000000000000000007=6=80=1.00000000";
        let parsed = parse_asset_entry(entry).unwrap();
        assert_eq!(parsed.config.symbol, "USDC");
        assert_eq!(parsed.config.decimals, 6);
        assert_eq!(parsed.config.ltv_percent, Some(80));
        assert_eq!(parsed.price.to_string(), "1.00000000");
    }

    #[test]
    fn empty_ltv_field_means_unconfigured() {
        let entry = "WETH=0x0000000000000000000000000000000000000008=18==3000.00000000";
        let parsed = parse_asset_entry(entry).unwrap();
        assert_eq!(parsed.config.ltv_percent, None);
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        let entry = "USDC=0x0000000000000000000000000000000000000007=6";
        assert!(parse_asset_entry(entry).is_err());
    }
}
