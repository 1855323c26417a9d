//! Collateral-ledger state machine (C3, spec §4.9): consumes decoded
//! vault/relayer events off the message bus and maintains each user's
//! balances, deposits, withdrawals, and borrows.

pub mod asset_table;
pub mod events;
pub mod ledger;
pub mod lending_pool;
pub mod oracle;
mod state;

pub use asset_table::{AssetConfig, AssetTable};
pub use events::{LedgerEvent, TRANSFER_TOPIC0};
pub use ledger::{Ledger, LedgerError};
pub use lending_pool::{LendingPool, LendingPoolError, LendingPoolRegistry};
pub use oracle::{CachedPriceOracle, OracleError, PriceOracle};
