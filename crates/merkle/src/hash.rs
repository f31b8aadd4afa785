//! Domain-separated SHA-256 hashing for leaves and internal nodes.

use sha2::{Digest, Sha256};

use crate::MerkleError;

/// Prefix byte for leaf hashes (RFC 6962).
pub const LEAF_PREFIX: u8 = 0x00;
/// Prefix byte for internal node hashes (RFC 6962).
pub const NODE_PREFIX: u8 = 0x01;

pub(crate) fn leaf_hash_bytes(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub(crate) fn parent_hash_bytes(left: &[u8], right: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().to_vec()
}

/// Hash leaf data with the leaf prefix, returning lowercase hex.
pub fn compute_leaf_hash(data: &[u8]) -> String {
    hex::encode(leaf_hash_bytes(data))
}

/// Combine two child hashes (hex) into their parent hash (hex).
///
/// Fails if either input is not valid hex.
pub fn compute_parent_hash(left_hex: &str, right_hex: &str) -> Result<String, MerkleError> {
    let left = hex::decode(left_hex)?;
    let right = hex::decode(right_hex)?;
    Ok(hex::encode(parent_hash_bytes(&left, &right)))
}
