//! Tree construction over ordered leaves.
//!
//! The tree is stored as flat levels of raw hash bytes, leaves at level 0 and
//! the root as the single entry of the last level. Proof generation indexes
//! the stored levels instead of re-deriving hashes.

use crate::hash::{leaf_hash_bytes, parent_hash_bytes};
use crate::proof::{MerkleProof, ProofDirection, ProofElement};
use crate::MerkleError;

/// An immutable Merkle tree over an ordered leaf sequence.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// All levels bottom-up; `levels[0]` are the leaf hashes.
    levels: Vec<Vec<Vec<u8>>>,
}

impl MerkleTree {
    /// Build a tree from raw leaf data. Each leaf is hashed with the leaf
    /// prefix before combination.
    pub fn from_leaves<T: AsRef<[u8]>>(leaves: &[T]) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyInput);
        }
        let leaf_level = leaves
            .iter()
            .map(|data| leaf_hash_bytes(data.as_ref()))
            .collect();
        Ok(Self::build(leaf_level))
    }

    /// Build a tree from pre-computed digests (hex). The digests are re-hashed
    /// with the leaf prefix, so the tree structure matches `from_leaves` over
    /// the decoded bytes.
    pub fn from_hashes<T: AsRef<str>>(hashes: &[T]) -> Result<Self, MerkleError> {
        if hashes.is_empty() {
            return Err(MerkleError::EmptyInput);
        }
        let leaf_level = hashes
            .iter()
            .map(|h| Ok(leaf_hash_bytes(&hex::decode(h.as_ref())?)))
            .collect::<Result<Vec<_>, MerkleError>>()?;
        Ok(Self::build(leaf_level))
    }

    /// Build a tree using the given hex hashes directly as leaf hashes,
    /// without re-prefixing. This is the mode used for event hashes that are
    /// already leaf-level digests.
    pub fn from_raw_hashes<T: AsRef<str>>(hashes: &[T]) -> Result<Self, MerkleError> {
        if hashes.is_empty() {
            return Err(MerkleError::EmptyInput);
        }
        let leaf_level = hashes
            .iter()
            .map(|h| hex::decode(h.as_ref()).map_err(MerkleError::from))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::build(leaf_level))
    }

    fn build(leaf_level: Vec<Vec<u8>>) -> Self {
        let mut levels = vec![leaf_level];

        while levels.last().map(|level| level.len()).unwrap_or(0) > 1 {
            let current = levels.last().expect("levels is never empty");
            let mut next = Vec::with_capacity(current.len().div_ceil(2));

            for pair in current.chunks(2) {
                if let [left, right] = pair {
                    next.push(parent_hash_bytes(left, right));
                } else {
                    // Unpaired rightmost node: promote unchanged.
                    next.push(pair[0].clone());
                }
            }

            levels.push(next);
        }

        Self { levels }
    }

    /// The Merkle root as lowercase hex.
    pub fn root(&self) -> String {
        let top = self.levels.last().expect("levels is never empty");
        hex::encode(&top[0])
    }

    /// Number of leaves the tree was built from.
    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Hash of the leaf at `index` as hex.
    pub fn leaf_hash(&self, index: usize) -> Result<String, MerkleError> {
        self.levels[0]
            .get(index)
            .map(hex::encode)
            .ok_or(MerkleError::OutOfBounds {
                index,
                size: self.leaf_count(),
            })
    }

    /// Generate the inclusion proof for the leaf at `index`.
    pub fn proof(&self, index: usize) -> Result<MerkleProof, MerkleError> {
        if index >= self.leaf_count() {
            return Err(MerkleError::OutOfBounds {
                index,
                size: self.leaf_count(),
            });
        }

        let mut proof_path = Vec::new();
        let mut current = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = current ^ 1;
            if sibling < level.len() {
                proof_path.push(ProofElement {
                    hash: hex::encode(&level[sibling]),
                    direction: if current % 2 == 1 {
                        ProofDirection::Left
                    } else {
                        ProofDirection::Right
                    },
                });
            }
            // A promoted node contributes no sibling; either way the node
            // lands at floor(current / 2) on the next level.
            current /= 2;
        }

        Ok(MerkleProof {
            leaf_hash: hex::encode(&self.levels[0][index]),
            leaf_index: index,
            proof_path,
            root_hash: self.root(),
            tree_size: self.leaf_count(),
        })
    }

    /// Proofs for every leaf, in leaf order.
    pub fn all_proofs(&self) -> Vec<MerkleProof> {
        (0..self.leaf_count())
            .map(|i| self.proof(i).expect("index in range"))
            .collect()
    }
}
