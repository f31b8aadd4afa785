//! Deterministic Merkle tree construction, inclusion proof generation and
//! verification over SHA-256.
//!
//! Hashing follows the RFC 6962 (Certificate Transparency) conventions:
//! leaves are hashed with a `0x00` prefix and internal nodes with a `0x01`
//! prefix, which prevents second-preimage attacks between the two levels.
//! An unpaired rightmost node is promoted to the next level unchanged, never
//! duplicated. All hashes cross the API boundary as lowercase hex strings.

use thiserror::Error;

pub mod hash;
pub mod proof;
pub mod tree;

pub use hash::{compute_leaf_hash, compute_parent_hash};
pub use proof::{
    compute_root_from_proof, verify_against_root, verify_proof, MerkleProof, ProofDirection,
    ProofElement,
};
pub use tree::MerkleTree;

/// Errors produced by tree construction and proof handling.
#[derive(Debug, Error)]
pub enum MerkleError {
    #[error("cannot build a merkle tree from empty input")]
    EmptyInput,

    #[error("leaf index {index} out of bounds for tree of {size} leaves")]
    OutOfBounds { index: usize, size: usize },

    #[error("invalid hex encoding: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("malformed proof path element: {0}")]
    MalformedPath(String),
}
