//! Domain records shared by the repository, workflow and API layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Anchor lifecycle status.
///
/// The lifecycle moves forward along
/// `pending → building → posting → posted → confirmed`; any state may drop
/// to `failed`, and reconciliation may lift `failed` back to `pending`.
/// `confirmed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorStatus {
    Pending,
    Building,
    Posting,
    Posted,
    Confirmed,
    Failed,
}

impl AnchorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorStatus::Pending => "pending",
            AnchorStatus::Building => "building",
            AnchorStatus::Posting => "posting",
            AnchorStatus::Posted => "posted",
            AnchorStatus::Confirmed => "confirmed",
            AnchorStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AnchorStatus::Pending),
            "building" => Some(AnchorStatus::Building),
            "posting" => Some(AnchorStatus::Posting),
            "posted" => Some(AnchorStatus::Posted),
            "confirmed" => Some(AnchorStatus::Confirmed),
            "failed" => Some(AnchorStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AnchorStatus::Confirmed)
    }

    fn rank(&self) -> u8 {
        match self {
            AnchorStatus::Pending => 0,
            AnchorStatus::Building => 1,
            AnchorStatus::Posting => 2,
            AnchorStatus::Posted => 3,
            AnchorStatus::Confirmed => 4,
            AnchorStatus::Failed => 5,
        }
    }

    /// Whether `next` is reachable from `self` along the lifecycle DAG.
    /// Forward jumps over intermediate states are allowed; the only
    /// backward edge is `failed → pending`.
    pub fn can_transition_to(&self, next: AnchorStatus) -> bool {
        match (self, next) {
            (AnchorStatus::Confirmed, _) => false,
            (_, AnchorStatus::Failed) => true,
            (AnchorStatus::Failed, AnchorStatus::Pending) => true,
            (AnchorStatus::Failed, _) => false,
            (current, next) => current.rank() < next.rank(),
        }
    }
}

/// A persisted anchor: one window of events committed to the ledger as a
/// single Merkle root.
#[derive(Debug, Clone, Serialize)]
pub struct AnchorRecord {
    pub id: Uuid,
    pub digest: String,
    pub method: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub item_count: i64,
    pub status: AnchorStatus,
    pub block_id: Option<String>,
    pub network: Option<String>,
    pub explorer_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl AnchorRecord {
    /// A fresh anchor in `pending` over the window `[start, end)`.
    pub fn new(digest: &str, item_count: i64, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            digest: digest.to_string(),
            method: "merkle_sha256".to_string(),
            start_time: start,
            end_time: end,
            item_count,
            status: AnchorStatus::Pending,
            block_id: None,
            network: None,
            explorer_url: None,
            error_message: None,
            created_at: Utc::now(),
            posted_at: None,
            confirmed_at: None,
        }
    }
}

/// One event's membership in an anchor, with its stored proof path.
#[derive(Debug, Clone, Serialize)]
pub struct AnchorItem {
    pub id: Uuid,
    pub anchor_id: Uuid,
    pub event_id: Option<Uuid>,
    pub event_hash: String,
    pub position: i64,
    pub merkle_proof: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

/// How an anchor job concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorOutcome {
    /// A new anchor was posted.
    Anchored,
    /// The window held no events; nothing to do.
    Empty,
    /// The window was already anchored; the existing anchor is returned.
    Duplicate,
    /// The job failed; `error` carries the reason.
    Failed,
}

/// Structured result of one anchor job.
#[derive(Debug, Clone, Serialize)]
pub struct AnchorResult {
    pub success: bool,
    pub outcome: AnchorOutcome,
    pub anchor_id: Option<Uuid>,
    pub digest: Option<String>,
    pub event_count: i64,
    pub block_id: Option<String>,
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
}

/// Counters from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReconciliationReport {
    pub processed: u64,
    pub retried: u64,
    pub confirmed: u64,
    pub failed: u64,
    pub needs_review: u64,
}
