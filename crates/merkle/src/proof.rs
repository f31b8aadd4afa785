//! Inclusion proofs: an ordered path of sibling hashes, each tagged with the
//! side the sibling sits on, that folds a leaf hash back up to the root.

use serde::{Deserialize, Serialize};

use crate::hash::parent_hash_bytes;
use crate::MerkleError;

/// Which side of the current node a proof sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofDirection {
    #[serde(rename = "L")]
    Left,
    #[serde(rename = "R")]
    Right,
}

impl ProofDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofDirection::Left => "L",
            ProofDirection::Right => "R",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "L" => Some(ProofDirection::Left),
            "R" => Some(ProofDirection::Right),
            _ => None,
        }
    }
}

/// Single element of a proof path: a sibling hash and its side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofElement {
    pub hash: String,
    pub direction: ProofDirection,
}

/// Merkle inclusion proof for one leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Hash of the leaf being proven (hex).
    pub leaf_hash: String,
    /// Index of the leaf in the original ordering.
    pub leaf_index: usize,
    /// Sibling hashes from the leaf level upward.
    pub proof_path: Vec<ProofElement>,
    /// Expected Merkle root (hex).
    pub root_hash: String,
    /// Number of leaves in the tree the proof was generated from.
    pub tree_size: usize,
}

impl MerkleProof {
    /// Serialize the path to its compact storage form: `["L:<hex>", "R:<hex>", ...]`.
    pub fn to_compact(&self) -> Vec<String> {
        self.proof_path
            .iter()
            .map(|e| format!("{}:{}", e.direction.as_str(), e.hash))
            .collect()
    }

    /// Rebuild a proof from the compact path form plus its context.
    ///
    /// Fails on items missing the `L:`/`R:` tag.
    pub fn from_compact(
        leaf_hash: &str,
        leaf_index: usize,
        compact_path: &[String],
        root_hash: &str,
        tree_size: usize,
    ) -> Result<Self, MerkleError> {
        let proof_path = parse_compact_path(compact_path)?;
        Ok(Self {
            leaf_hash: leaf_hash.to_string(),
            leaf_index,
            proof_path,
            root_hash: root_hash.to_string(),
            tree_size,
        })
    }

    /// Recompute the root from this proof and compare against `root_hash`.
    pub fn verify(&self) -> Result<bool, MerkleError> {
        verify_against_root(&self.leaf_hash, &self.proof_path, &self.root_hash)
    }
}

/// Parse a compact path (`L:<hex>` / `R:<hex>` items) into proof elements.
pub fn parse_compact_path(compact_path: &[String]) -> Result<Vec<ProofElement>, MerkleError> {
    compact_path
        .iter()
        .map(|item| {
            let (tag, hash) = item
                .split_once(':')
                .ok_or_else(|| MerkleError::MalformedPath(item.clone()))?;
            let direction = ProofDirection::parse(tag)
                .ok_or_else(|| MerkleError::MalformedPath(item.clone()))?;
            Ok(ProofElement {
                hash: hash.to_string(),
                direction,
            })
        })
        .collect()
}

/// Verify a proof against the root it carries.
pub fn verify_proof(proof: &MerkleProof) -> Result<bool, MerkleError> {
    proof.verify()
}

/// Fold `leaf_hash` up through `path` and compare the result to `expected_root`.
pub fn verify_against_root(
    leaf_hash: &str,
    path: &[ProofElement],
    expected_root: &str,
) -> Result<bool, MerkleError> {
    Ok(compute_root_from_proof(leaf_hash, path)? == expected_root)
}

/// Compute the root hash implied by a leaf hash and a proof path.
pub fn compute_root_from_proof(
    leaf_hash: &str,
    path: &[ProofElement],
) -> Result<String, MerkleError> {
    let mut current = hex::decode(leaf_hash)?;

    for element in path {
        let sibling = hex::decode(&element.hash)?;
        current = match element.direction {
            ProofDirection::Left => parent_hash_bytes(&sibling, &current),
            ProofDirection::Right => parent_hash_bytes(&current, &sibling),
        };
    }

    Ok(hex::encode(current))
}
