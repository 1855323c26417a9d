//! `MerkleEngine` (C2) — spec §4.8. Owns the `OwnershipStore`, rebuilds the
//! tree on every new transfer, and fans the new root out to whichever
//! chains have a configured `RelayerClient`.
//!
//! Per the design note in spec §9 ("the original code's auto-per-transfer
//! Merkle rebuild is quadratic in transfer count"), ownership is maintained
//! as an incremental map rather than re-folded from the full transfer log on
//! every write: each new transfer only updates the one `tokenId` entry it
//! concerns (last-writer-wins by `(blockNumber, logIndex)`, exactly the
//! per-token projection of the pure fold in `fold_ownership_snapshot`), and
//! the tree is rebuilt from that live map. The full store is only re-scanned
//! for historical `getProof` reconstruction, an occasional query-path
//! operation, not the per-transfer write path.

use crate::store::{OwnershipStore, OwnershipStoreError};
use crate::tree::{leaf_hash, verify_proof, Tree};
use async_std::sync::RwLock;
use ethers::types::{Address, H256, U256};
use pipeline_types::{fold_ownership_snapshot, NftTransfer};
use relayer_client::RelayerClient;
use snafu::{ResultExt, Snafu};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{event, Level};

#[derive(Debug, Snafu)]
pub enum MerkleEngineError {
    #[snafu(display("ownership store error: {}", source))]
    Store { source: OwnershipStoreError },
}

/// Result of a successful `getProof` query, self-verified before return.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofResult {
    pub proof: Vec<H256>,
    pub root: H256,
    pub verified: bool,
}

/// Outcome of `verify_ownership`. `RootUnavailable` is the signal spec
/// §4.9's COLLATERAL_REQUEST handler (in `ledger-core`) uses to fall back to
/// a "has prior deposit" lookup instead of treating the caller as unowned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationOutcome {
    Confirmed,
    Denied,
    RootUnavailable,
}

#[derive(Clone, Copy, Debug)]
struct SnapshotEntry {
    owner: Address,
    order_key: (u64, u64),
}

/// Builds leaves (and the tokenId ordering that produced them) from a
/// `tokenId -> owner` map; `BTreeMap`/`Vec` iteration order is
/// deterministic, which callers rely on to map a proof index back to a
/// `tokenId`.
fn leaves_from_snapshot(snapshot: &BTreeMap<U256, Address>) -> (Vec<H256>, Vec<U256>) {
    let token_ids: Vec<U256> = snapshot.keys().copied().collect();
    let leaves = snapshot
        .iter()
        .map(|(token_id, owner)| leaf_hash(*owner, *token_id))
        .collect();
    (leaves, token_ids)
}

pub struct MerkleEngine {
    store: OwnershipStore,
    relayers: HashMap<u64, Arc<RelayerClient>>,
    snapshot: RwLock<BTreeMap<U256, SnapshotEntry>>,
    rebuild_lock: RwLock<()>,
}

impl MerkleEngine {
    /// Scans the store once to seed the incremental ownership map — cheap
    /// for a fresh store, a one-time cost on resume from a persisted one.
    /// All subsequent updates are incremental (see module docs).
    pub async fn new(store: OwnershipStore, relayers: HashMap<u64, Arc<RelayerClient>>) -> Self {
        let transfers = store.all_ordered().await;
        let folded = fold_ownership_snapshot(transfers.iter());
        let snapshot = folded
            .into_iter()
            .map(|(token_id, owner)| {
                let order_key = transfers
                    .iter()
                    .filter(|t| t.token_id == token_id)
                    .map(|t| t.snapshot_order_key())
                    .max()
                    .unwrap_or((0, 0));
                (token_id, SnapshotEntry { owner, order_key })
            })
            .collect();
        MerkleEngine {
            store,
            relayers,
            snapshot: RwLock::new(snapshot),
            rebuild_lock: RwLock::new(()),
        }
    }

    /// Applies `transfer` to the incremental snapshot, last-writer-wins by
    /// `(blockNumber, logIndex)` — the per-token projection of
    /// `fold_ownership_snapshot`. Returns whether the live owner changed.
    async fn apply_to_snapshot(&self, transfer: &NftTransfer) -> bool {
        let mut guard = self.snapshot.write().await;
        let order_key = transfer.snapshot_order_key();
        match guard.get(&transfer.token_id) {
            Some(entry) if entry.order_key >= order_key => false,
            Some(entry) => {
                let changed = entry.owner != transfer.to;
                guard.insert(
                    transfer.token_id,
                    SnapshotEntry {
                        owner: transfer.to,
                        order_key,
                    },
                );
                changed
            }
            None => {
                guard.insert(
                    transfer.token_id,
                    SnapshotEntry {
                        owner: transfer.to,
                        order_key,
                    },
                );
                true
            }
        }
    }

    /// Records a new transfer and, if it changed the live ownership
    /// snapshot, rebuilds the tree and fans the new root out to configured
    /// relayers (spec §4.8 "auto mode").
    pub async fn record_transfer(&self, transfer: NftTransfer) -> Result<(), MerkleEngineError> {
        let is_new = self
            .store
            .add_transfer(transfer.clone())
            .await
            .context(StoreSnafu)?;
        if !is_new {
            return Ok(());
        }
        if self.apply_to_snapshot(&transfer).await {
            self.rebuild_and_submit().await?;
        }
        Ok(())
    }

    /// Rebuild the tree from the current incremental ownership snapshot and
    /// submit the new root to each configured chain. An empty snapshot (no
    /// live tokens) is a no-op, per spec §4.8 "tree construction failure ...
    /// does not clobber prior roots". A relayer submission failure is
    /// logged and does not prevent the others, nor the root from being
    /// recorded locally — it is retried on the next triggering transfer.
    pub async fn rebuild_and_submit(&self) -> Result<Option<H256>, MerkleEngineError> {
        let _guard = self.rebuild_lock.write().await;
        let snapshot: BTreeMap<U256, Address> = self
            .snapshot
            .read()
            .await
            .iter()
            .map(|(token_id, entry)| (*token_id, entry.owner))
            .collect();
        let (leaves, _) = leaves_from_snapshot(&snapshot);
        let Some(tree) = Tree::build(leaves) else {
            event!(Level::DEBUG, "ownership snapshot empty, skipping tree rebuild");
            return Ok(None);
        };
        let root = tree.root();
        self.store
            .mark_not_included_with_root(root)
            .await
            .context(StoreSnafu)?;

        for (&chain_id, relayer) in self.relayers.iter() {
            if let Err(error) = relayer.update_nft_ownership_root(chain_id, root).await {
                event!(
                    Level::WARN,
                    chain_id,
                    %root,
                    %error,
                    "failed to submit NFT ownership root, will retry on next transfer"
                );
            }
        }
        Ok(Some(root))
    }

    /// spec §4.8 `getProof`: reconstructs the tree as of the most recent
    /// submitted root and returns a self-verified proof, or `None` if
    /// `owner` does not hold `tokenId` in that snapshot (or no root has
    /// ever been submitted). This is the one path that still scans the
    /// full store, since it must reproduce a *historical* snapshot rather
    /// than the current live one.
    pub async fn get_proof(&self, owner: Address, token_id: U256) -> Option<ProofResult> {
        let anchor = self.store.latest_with_root().await?;
        let root = anchor.merkle_root?;
        let transfers = self.store.transfers_up_to(anchor.block_number).await;
        let historical_snapshot = fold_ownership_snapshot(transfers.iter());
        if historical_snapshot.is_empty() {
            return None;
        }

        if historical_snapshot.get(&token_id) != Some(&owner) {
            return None;
        }
        let (leaves, token_ids) = leaves_from_snapshot(&historical_snapshot);
        let tree = Tree::build(leaves)?;
        let index = token_ids.iter().position(|id| *id == token_id)?;
        let proof = tree.proof(index);
        let leaf = leaf_hash(owner, token_id);
        let verified = verify_proof(leaf, &proof, root);
        if !verified {
            event!(
                Level::ERROR,
                %owner,
                %token_id,
                %root,
                "reconstructed proof failed self-verification"
            );
            return None;
        }
        Some(ProofResult {
            proof,
            root,
            verified,
        })
    }

    /// spec §4.8 `verifyOwnership`: `true` iff `getProof` would succeed;
    /// `RootUnavailable` when no root has been submitted yet, so the caller
    /// can decide whether to consult a fallback.
    pub async fn verify_ownership(&self, owner: Address, token_id: U256) -> VerificationOutcome {
        if self.store.latest_with_root().await.is_none() {
            return VerificationOutcome::RootUnavailable;
        }
        match self.get_proof(owner, token_id).await {
            Some(_) => VerificationOutcome::Confirmed,
            None => VerificationOutcome::Denied,
        }
    }
}
