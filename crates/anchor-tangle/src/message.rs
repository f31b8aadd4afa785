//! Anchor message payload and block metadata types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Anchor message carried as the data of a tagged data block.
///
/// Field declaration order is the canonical (sorted-key) serialization
/// order; `to_bytes` relies on it, so new fields must keep the order
/// alphabetical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorMessage {
    /// Digest algorithm, `sha256`.
    pub algorithm: String,
    /// Number of items summarized by the digest.
    pub count: u64,
    /// Merkle root (hex).
    pub digest: String,
    /// Window end, unix seconds.
    pub end: i64,
    /// Optional free-form metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    /// Window start, unix seconds.
    pub start: i64,
    /// Message creation time, unix seconds.
    pub ts: i64,
    /// Anchor kind, `merkle_root`.
    #[serde(rename = "type")]
    pub anchor_type: String,
    /// Message format version.
    pub v: String,
}

impl AnchorMessage {
    /// Build a `merkle_root` message for a window `[start, end)`, stamped
    /// with the current time.
    pub fn merkle_root(
        digest: &str,
        count: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        meta: Option<serde_json::Value>,
    ) -> Self {
        Self {
            algorithm: "sha256".to_string(),
            count,
            digest: digest.to_string(),
            end: end.timestamp(),
            meta,
            start: start.timestamp(),
            ts: Utc::now().timestamp(),
            anchor_type: "merkle_root".to_string(),
            v: "1.0".to_string(),
        }
    }

    /// Canonical JSON bytes: keys sorted, no whitespace, UTF-8.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("anchor message serializes")
    }

    /// SHA-256 of the canonical bytes, as hex.
    pub fn payload_hash(&self) -> String {
        hex::encode(Sha256::digest(self.to_bytes()))
    }
}

/// Ledger inclusion state as reported by block metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InclusionState {
    Included,
    Conflicting,
    Pending,
    Unknown,
}

impl InclusionState {
    /// Parse the raw metadata field; absent or unrecognized values map to
    /// `Unknown` exactly once, at this boundary.
    pub fn from_api(raw: Option<&str>) -> Self {
        match raw {
            Some("included") => InclusionState::Included,
            Some("conflicting") => InclusionState::Conflicting,
            Some("pending") => InclusionState::Pending,
            _ => InclusionState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InclusionState::Included => "included",
            InclusionState::Conflicting => "conflicting",
            InclusionState::Pending => "pending",
            InclusionState::Unknown => "unknown",
        }
    }
}

/// Metadata for a submitted block.
#[derive(Debug, Clone)]
pub struct BlockMetadata {
    pub block_id: String,
    pub network: String,
    pub is_solid: bool,
    pub milestone_index: Option<u64>,
    pub inclusion_state: InclusionState,
    pub timestamp: DateTime<Utc>,
}

impl BlockMetadata {
    pub fn referenced_by_milestone(&self) -> bool {
        self.milestone_index.is_some()
    }
}

/// Node identity returned by `/api/core/v2/info`.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub protocol: NodeProtocol,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeProtocol {
    #[serde(rename = "networkName", default)]
    pub network_name: String,
}
