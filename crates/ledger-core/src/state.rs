//! Durable ledger state — spec §3/§6. One `Persisted<LedgerState>` snapshot
//! per consumer process, with an in-memory index over the entity tables
//! sufficient for every query in spec §4.9 (the "relational-shaped
//! secondary index" called out in spec §1.A, since full SQL schemas are an
//! explicit Non-goal).

use ethers::types::{Address, H256};
use pipeline_types::{
    Borrow, BorrowStatus, Deposit, RelayerEvent, RelayerEventKey, RelayerEventType, User,
    VaultEvent, VaultEventKey, Withdrawal, WithdrawalStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LedgerState {
    pub users: HashMap<Address, User>,
    pub deposits: Vec<Deposit>,
    pub withdrawals: Vec<Withdrawal>,
    pub borrows: Vec<Borrow>,
    pub vault_events: Vec<VaultEvent>,
    pub relayer_events: Vec<RelayerEvent>,
    pub next_entity_id: u64,
}

/// Secondary indices rebuilt from `LedgerState` on load, never persisted
/// directly (cheap to recompute, and keeping them out of the snapshot
/// avoids a second source of truth).
#[derive(Default)]
pub struct Index {
    pub vault_event_keys: HashSet<VaultEventKey>,
    pub relayer_event_keys: HashSet<RelayerEventKey>,
    /// `requestId -> index into state.relayer_events` for the most recent
    /// row of `RelayerEventType::CollateralRequest`, used by
    /// COLLATERAL_PROCESS to find the request it resolves.
    pub collateral_request_by_id: HashMap<H256, usize>,
    /// `requestId -> index into state.withdrawals` for the still-pending
    /// withdrawal, used by WITHDRAW to resolve its request.
    pub pending_withdrawal_by_request: HashMap<H256, usize>,
}

impl Index {
    pub fn rebuild(state: &LedgerState) -> Self {
        let mut index = Index::default();
        for event in &state.vault_events {
            index.vault_event_keys.insert(event.dedup_key());
        }
        for (i, event) in state.relayer_events.iter().enumerate() {
            index.relayer_event_keys.insert(event.dedup_key());
            if event.event_type == RelayerEventType::CollateralRequest {
                index.collateral_request_by_id.insert(event.request_id, i);
            }
        }
        for (i, withdrawal) in state.withdrawals.iter().enumerate() {
            if withdrawal.status == WithdrawalStatus::Pending {
                index
                    .pending_withdrawal_by_request
                    .insert(withdrawal.request_id, i);
            }
        }
        index
    }
}

impl LedgerState {
    pub fn user_mut(&mut self, wallet_address: Address) -> &mut User {
        self.users
            .entry(wallet_address)
            .or_insert_with(|| User::new(wallet_address))
    }

    pub fn next_id(&mut self) -> u64 {
        self.next_entity_id += 1;
        self.next_entity_id
    }

    /// Active borrows for `sender`'s wallet across all tokens, oldest-first
    /// — REPAY resolves the payer by wallet, not by a specific tokenId.
    pub fn active_borrows_for_wallet_oldest_first(&self, wallet_address: Address) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .borrows
            .iter()
            .enumerate()
            .filter(|(_, b)| b.wallet_address == wallet_address && b.status == BorrowStatus::Active)
            .map(|(i, _)| i)
            .collect();
        indices.sort_by_key(|&i| self.borrows[i].opened_at);
        indices
    }
}
