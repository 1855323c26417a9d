//! Ownership-Merkle engine (C2): durable transfer log, sorted-pair keccak256
//! tree, and on-chain root submission (spec §4.8).

pub mod engine;
pub mod store;
pub mod tree;

pub use engine::{MerkleEngine, MerkleEngineError, ProofResult, VerificationOutcome};
pub use store::{OwnershipStore, OwnershipStoreError};
pub use tree::{leaf_hash, verify_proof, Tree};
