use crate::decimal::UsdAmount;
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

/// `User` — spec §3. `walletAddress` is unique and lowercase; invariant:
/// `floatingUsdBalance = totalUsdBalance - borrowedUsdAmount -
/// Sum(pendingWithdrawals.usdValue)`, checked by `ledger-core`'s test suite
/// rather than enforced structurally here (the Ledger is the sole writer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub wallet_address: Address,
    pub total_usd_balance: UsdAmount,
    pub floating_usd_balance: UsdAmount,
    pub borrowed_usd_amount: UsdAmount,
}

impl User {
    pub fn new(wallet_address: Address) -> Self {
        User {
            wallet_address,
            total_usd_balance: UsdAmount::ZERO,
            floating_usd_balance: UsdAmount::ZERO,
            borrowed_usd_amount: UsdAmount::ZERO,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub id: u64,
    pub wallet_address: Address,
    pub asset: Address,
    pub vault: Address,
    pub amount: U256,
    pub token_id: U256,
    pub chain_id: u64,
    pub usd_value: UsdAmount,
    pub tx_hash: H256,
    pub timestamp: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    Pending,
    Completed,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: u64,
    pub request_id: H256,
    pub wallet_address: Address,
    pub asset: Address,
    pub amount: U256,
    pub token_id: U256,
    pub chain_id: u64,
    pub usd_value: UsdAmount,
    pub status: WithdrawalStatus,
    pub timestamp: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BorrowStatus {
    Active,
    Repaid,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Borrow {
    pub id: u64,
    pub wallet_address: Address,
    pub protocol: Address,
    pub token_id: U256,
    pub asset: Address,
    pub chain_id: u64,
    pub usd_value: UsdAmount,
    pub status: BorrowStatus,
    pub opened_at: u64,
    pub loan_end_date: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VaultEventType {
    Deposit,
    WithdrawRequest,
    Withdraw,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEvent {
    pub event_type: VaultEventType,
    pub chain_id: u64,
    pub tx_hash: H256,
    pub log_index: u64,
    pub sender: Address,
    pub asset: Address,
    pub vault: Address,
    pub amount: U256,
    pub token_id: U256,
    pub request_id: Option<H256>,
    pub usd_value: UsdAmount,
    pub timestamp: u64,
}

/// Dedup key from spec §3: `(txHash, type, tokenId, asset)`.
pub type VaultEventKey = (H256, VaultEventType, U256, Address);

impl VaultEvent {
    pub fn dedup_key(&self) -> VaultEventKey {
        (self.tx_hash, self.event_type, self.token_id, self.asset)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelayerEventType {
    CollateralRequest,
    CollateralProcess,
    Repay,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayerEventStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayerEvent {
    pub event_type: RelayerEventType,
    pub request_id: H256,
    pub chain_id: u64,
    pub token_id: U256,
    pub protocol: Address,
    pub asset: Address,
    pub sender: Address,
    pub amount: U256,
    pub deadline: u64,
    pub data: Bytes,
    pub signature: Bytes,
    pub status: RelayerEventStatus,
    pub error_data: Option<Bytes>,
    pub process_tx_hash: Option<H256>,
}

/// Dedup key from spec §3: `(requestId, chainId, type)`.
pub type RelayerEventKey = (H256, u64, RelayerEventType);

impl RelayerEvent {
    pub fn dedup_key(&self) -> RelayerEventKey {
        (self.request_id, self.chain_id, self.event_type)
    }
}
