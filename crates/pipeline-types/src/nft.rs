use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `NftTransfer` — spec §3. `txHash` is unique; once `includedInMerkle` flips
/// true its `merkleRoot` is immutable (the MerkleEngine is the sole owner of
/// both fields).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftTransfer {
    pub chain_id: u64,
    pub tx_hash: H256,
    pub block_number: u64,
    pub log_index: u64,
    pub block_hash: H256,
    pub token_address: Address,
    pub token_id: U256,
    pub from: Address,
    pub to: Address,
    pub timestamp: u64,
    pub included_in_merkle: bool,
    pub merkle_root: Option<H256>,
}

impl NftTransfer {
    /// Ordering used by `OwnershipSnapshot` folding: `blockNumber` ascending,
    /// tie-broken by `logIndex` then insertion order (spec §3). Callers
    /// insert in observed order, so a stable sort on this key reproduces the
    /// tie-break exactly.
    pub fn snapshot_order_key(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// `Map<tokenId, owner>` — spec §3: "for each tokenId, the `to` address of
/// the Transfer with greatest `blockNumber` (tie-break: log index, then
/// insertion order)". A `BTreeMap` keeps iteration deterministic, which the
/// MerkleEngine relies on for reproducible leaf ordering.
pub type OwnershipSnapshot = BTreeMap<U256, Address>;

/// Pure fold implementing the snapshot function verbatim from spec §3. Input
/// order does not matter: transfers are first stably sorted by
/// `snapshot_order_key`, then folded left-to-right so the last write for a
/// given `tokenId` wins.
pub fn fold_ownership_snapshot<'a>(
    transfers: impl Iterator<Item = &'a NftTransfer>,
) -> OwnershipSnapshot {
    let mut ordered: Vec<&NftTransfer> = transfers.collect();
    ordered.sort_by_key(|transfer| transfer.snapshot_order_key());
    let mut snapshot = OwnershipSnapshot::new();
    for transfer in ordered {
        snapshot.insert(transfer.token_id, transfer.to);
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(token_id: u64, block: u64, log_index: u64, to: Address) -> NftTransfer {
        NftTransfer {
            chain_id: 1,
            tx_hash: H256::repeat_byte(block as u8),
            block_number: block,
            log_index,
            block_hash: H256::zero(),
            token_address: Address::zero(),
            token_id: U256::from(token_id),
            from: Address::zero(),
            to,
            timestamp: block,
            included_in_merkle: false,
            merkle_root: None,
        }
    }

    #[test]
    fn snapshot_keeps_latest_transfer_per_token() {
        let a = Address::repeat_byte(0xA);
        let b = Address::repeat_byte(0xB);
        let transfers = vec![
            transfer(1, 100, 0, a),
            transfer(1, 200, 0, b),
            transfer(2, 150, 0, a),
        ];
        let snapshot = fold_ownership_snapshot(transfers.iter());
        assert_eq!(snapshot.get(&U256::from(1)), Some(&b));
        assert_eq!(snapshot.get(&U256::from(2)), Some(&a));
    }

    #[test]
    fn snapshot_tie_breaks_by_log_index_then_insertion_order() {
        let a = Address::repeat_byte(0xA);
        let b = Address::repeat_byte(0xB);
        let transfers = vec![transfer(1, 100, 5, a), transfer(1, 100, 2, b)];
        let snapshot = fold_ownership_snapshot(transfers.iter());
        assert_eq!(snapshot.get(&U256::from(1)), Some(&a));
    }
}
