//! Pure Merkle tree primitives — spec §4.8. No I/O, no persistence; the
//! `OwnershipStore`/`MerkleEngine` layers decide when to call these.

use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;

/// `keccak256(solidityPack("address", "uint256", ownerLowercase, tokenId))`.
/// `Address` in ethers is already a raw 20-byte value regardless of checksum
/// casing, so no separate lowercasing step is needed.
pub fn leaf_hash(owner: Address, token_id: U256) -> H256 {
    let mut packed = Vec::with_capacity(52);
    packed.extend_from_slice(owner.as_bytes());
    let mut token_bytes = [0u8; 32];
    token_id.to_big_endian(&mut token_bytes);
    packed.extend_from_slice(&token_bytes);
    H256::from(keccak256(packed))
}

/// `sortPairs` combine: the two 32-byte inputs are sorted ascending before
/// hashing, so `combine(a, b) == combine(b, a)`.
fn combine(a: H256, b: H256) -> H256 {
    let (lo, hi) = if a.as_bytes() <= b.as_bytes() {
        (a, b)
    } else {
        (b, a)
    };
    let mut packed = Vec::with_capacity(64);
    packed.extend_from_slice(lo.as_bytes());
    packed.extend_from_slice(hi.as_bytes());
    H256::from(keccak256(packed))
}

/// A built tree, bottom-up: `levels[0]` is the leaf layer, `levels.last()`
/// is `[root]`. Odd layers carry their last element up unchanged.
pub struct Tree {
    levels: Vec<Vec<H256>>,
}

impl Tree {
    /// `None` if `leaves` is empty — tree construction failure is a no-op
    /// per spec §4.8, never a panic.
    pub fn build(leaves: Vec<H256>) -> Option<Self> {
        if leaves.is_empty() {
            return None;
        }
        let mut levels = vec![leaves];
        while levels.last().unwrap().len() > 1 {
            let current = levels.last().unwrap();
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            let mut i = 0;
            while i < current.len() {
                if i + 1 < current.len() {
                    next.push(combine(current[i], current[i + 1]));
                } else {
                    next.push(current[i]);
                }
                i += 2;
            }
            levels.push(next);
        }
        Some(Tree { levels })
    }

    pub fn root(&self) -> H256 {
        self.levels.last().unwrap()[0]
    }

    /// Sibling path for the leaf at `index`, bottom-up. Levels where the
    /// index's node was carried up unchanged (odd count, last element)
    /// contribute no sibling.
    pub fn proof(&self, mut index: usize) -> Vec<H256> {
        let mut proof = Vec::new();
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_index = if index % 2 == 0 { index + 1 } else { index - 1 };
            if sibling_index < level.len() {
                proof.push(level[sibling_index]);
            }
            index /= 2;
        }
        proof
    }
}

/// Recomputes the root by folding `leaf` up through `proof` and compares
/// against `root`. Used both by `Tree::proof`'s caller (self-verification
/// before returning a proof) and by consumers verifying a proof later.
pub fn verify_proof(leaf: H256, proof: &[H256], root: H256) -> bool {
    let folded = proof.iter().fold(leaf, |acc, sibling| combine(acc, *sibling));
    folded == root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(byte: u8) -> H256 {
        H256::repeat_byte(byte)
    }

    #[test]
    fn single_leaf_tree_is_its_own_root() {
        let tree = Tree::build(vec![h(1)]).unwrap();
        assert_eq!(tree.root(), h(1));
        assert!(tree.proof(0).is_empty());
    }

    #[test]
    fn odd_leaf_count_carries_last_leaf_up() {
        let tree = Tree::build(vec![h(1), h(2), h(3)]).unwrap();
        // level1 = [combine(1,2), 3], root = combine(combine(1,2), 3)
        let proof = tree.proof(2);
        assert!(verify_proof(h(3), &proof, tree.root()));
    }

    #[test]
    fn every_leaf_proof_self_verifies_against_the_root() {
        let leaves: Vec<H256> = (1u8..=7).map(h).collect();
        let tree = Tree::build(leaves.clone()).unwrap();
        for (i, leaf) in leaves.into_iter().enumerate() {
            let proof = tree.proof(i);
            assert!(verify_proof(leaf, &proof, tree.root()), "leaf {} failed", i);
        }
    }

    #[test]
    fn combine_is_order_independent() {
        assert_eq!(combine(h(1), h(2)), combine(h(2), h(1)));
    }

    #[test]
    fn empty_leaves_build_to_none() {
        assert!(Tree::build(vec![]).is_none());
    }
}
