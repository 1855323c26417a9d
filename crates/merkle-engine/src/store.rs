//! `OwnershipStore` — durable log of `NftTransfer`s, persisted the same way
//! `BlockLedger` persists its rows (one `Persisted<T>` snapshot, rewritten
//! wholesale on every mutation).

use async_std::sync::RwLock;
use persistence::{Persisted, PersistenceError};
use pipeline_types::NftTransfer;
use snafu::{ResultExt, Snafu};
use std::path::Path;

#[derive(Debug, Snafu)]
pub enum OwnershipStoreError {
    #[snafu(display("persistence failure: {}", source))]
    Persistence { source: PersistenceError },
}

pub struct OwnershipStore {
    inner: RwLock<Vec<NftTransfer>>,
    persisted: RwLock<Persisted<Vec<NftTransfer>>>,
}

impl OwnershipStore {
    pub fn create(base_path: &Path, key_tag: &str) -> Result<Self, OwnershipStoreError> {
        let persisted = Persisted::create(base_path, key_tag).context(PersistenceSnafu)?;
        Ok(OwnershipStore {
            inner: RwLock::new(Vec::new()),
            persisted: RwLock::new(persisted),
        })
    }

    pub fn load(base_path: &Path, key_tag: &str) -> Result<Self, OwnershipStoreError> {
        let persisted = Persisted::load(base_path, key_tag).context(PersistenceSnafu)?;
        let state = persisted.load_latest().context(PersistenceSnafu)?;
        Ok(OwnershipStore {
            inner: RwLock::new(state),
            persisted: RwLock::new(persisted),
        })
    }

    async fn commit(&self, state: &[NftTransfer]) -> Result<(), OwnershipStoreError> {
        self.persisted
            .write()
            .await
            .commit(&state.to_vec())
            .context(PersistenceSnafu)
    }

    /// Appends `transfer` unless a row with the same `txHash` is already
    /// present (the spec's uniqueness invariant for this entity). Returns
    /// `true` if the transfer was newly recorded.
    pub async fn add_transfer(&self, transfer: NftTransfer) -> Result<bool, OwnershipStoreError> {
        let mut guard = self.inner.write().await;
        if guard.iter().any(|existing| existing.tx_hash == transfer.tx_hash) {
            return Ok(false);
        }
        guard.push(transfer);
        let state = guard.clone();
        drop(guard);
        self.commit(&state).await?;
        Ok(true)
    }

    /// All transfers, stably ordered by `(blockNumber, logIndex)` ascending
    /// — the order the snapshot fold and tree build both require.
    pub async fn all_ordered(&self) -> Vec<NftTransfer> {
        let mut transfers = self.inner.read().await.clone();
        transfers.sort_by_key(|t| t.snapshot_order_key());
        transfers
    }

    /// Transfers with `blockNumber <= at_or_before`, same ordering as
    /// `all_ordered` — used to reconstruct the tree as of a past root.
    pub async fn transfers_up_to(&self, at_or_before: u64) -> Vec<NftTransfer> {
        self.all_ordered()
            .await
            .into_iter()
            .filter(|t| t.block_number <= at_or_before)
            .collect()
    }

    /// The transfer with the greatest `blockNumber` among those carrying a
    /// populated `merkleRoot`, i.e. the most recent successful tree build.
    pub async fn latest_with_root(&self) -> Option<NftTransfer> {
        self.inner
            .read()
            .await
            .iter()
            .filter(|t| t.merkle_root.is_some())
            .max_by_key(|t| t.block_number)
            .cloned()
    }

    /// Marks every transfer not yet included in a Merkle root as included
    /// under `root`, per spec §4.8 step 4. Leaves already-included rows
    /// untouched — an earlier root is never clobbered.
    pub async fn mark_not_included_with_root(
        &self,
        root: ethers::types::H256,
    ) -> Result<(), OwnershipStoreError> {
        let mut guard = self.inner.write().await;
        for transfer in guard.iter_mut().filter(|t| !t.included_in_merkle) {
            transfer.included_in_merkle = true;
            transfer.merkle_root = Some(root);
        }
        let state = guard.clone();
        drop(guard);
        self.commit(&state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Address, H256, U256};

    fn transfer(tx: u8, block: u64, log_index: u64, token_id: u64, to: Address) -> NftTransfer {
        NftTransfer {
            chain_id: 1,
            tx_hash: H256::repeat_byte(tx),
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

    #[async_std::test]
    async fn adding_the_same_tx_hash_twice_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = OwnershipStore::create(dir.path(), "ownership").unwrap();
        let t = transfer(1, 10, 0, 1, Address::repeat_byte(0xA));
        assert!(store.add_transfer(t.clone()).await.unwrap());
        assert!(!store.add_transfer(t).await.unwrap());
        assert_eq!(store.all_ordered().await.len(), 1);
    }

    #[async_std::test]
    async fn marking_not_included_never_touches_already_included_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = OwnershipStore::create(dir.path(), "ownership").unwrap();
        let mut already = transfer(1, 10, 0, 1, Address::repeat_byte(0xA));
        let old_root = H256::repeat_byte(0x11);
        already.included_in_merkle = true;
        already.merkle_root = Some(old_root);
        store.add_transfer(already).await.unwrap();
        store
            .add_transfer(transfer(2, 20, 0, 2, Address::repeat_byte(0xB)))
            .await
            .unwrap();

        let new_root = H256::repeat_byte(0x22);
        store.mark_not_included_with_root(new_root).await.unwrap();

        let rows = store.all_ordered().await;
        assert_eq!(rows[0].merkle_root, Some(old_root));
        assert_eq!(rows[1].merkle_root, Some(new_root));
    }
}
