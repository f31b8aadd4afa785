//! The anchor workflow: collect a window of events, reduce it to a Merkle
//! root, post the root to the ledger, persist the anchor with per-event
//! proofs, and return a structured result.
//!
//! Errors from downstream never propagate to the caller; a failing job
//! records a `failed` anchor for reconciliation and reports the error in
//! its [`AnchorResult`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anchor_tangle::{AnchorMessage, InclusionState, TangleBackend, TangleError};
use ared_merkle::{MerkleError, MerkleTree};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::consumer::{EventConsumer, EventWindow};
use crate::model::{AnchorOutcome, AnchorRecord, AnchorResult, AnchorStatus};
use crate::store::{AnchorRepository, NewItem, StoreError};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    #[error(transparent)]
    Tangle(#[from] TangleError),
}

/// In-process advisory claims over anchors currently owned by a job, so
/// reconciliation never races a live workflow on the same anchor.
#[derive(Clone, Default)]
pub struct ClaimSet {
    inner: Arc<Mutex<HashSet<Uuid>>>,
}

impl ClaimSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an anchor; false means somebody else holds it.
    pub async fn claim(&self, id: Uuid) -> bool {
        self.inner.lock().await.insert(id)
    }

    pub async fn release(&self, id: Uuid) {
        self.inner.lock().await.remove(&id);
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.inner.lock().await.contains(&id)
    }
}

/// Orchestrates one anchor job end to end.
pub struct AnchorWorkflow {
    store: AnchorRepository,
    consumer: EventConsumer,
    backend: Arc<dyn TangleBackend>,
    claims: ClaimSet,
}

impl AnchorWorkflow {
    pub fn new(
        store: AnchorRepository,
        consumer: EventConsumer,
        backend: Arc<dyn TangleBackend>,
        claims: ClaimSet,
    ) -> Self {
        Self {
            store,
            consumer,
            backend,
            claims,
        }
    }

    /// Run one anchor job over `[start, end)`.
    ///
    /// `end` defaults to now; `start` defaults to the end of the last
    /// posted or confirmed anchor, falling back to 24 hours before `end`.
    pub async fn run(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        wait_for_confirmation: bool,
    ) -> AnchorResult {
        let job_start = Instant::now();

        let end = end.unwrap_or_else(Utc::now);
        let start = match start {
            Some(start) => start,
            None => match self.consumer.last_anchor_end().await {
                Ok(Some(watermark)) => watermark,
                Ok(None) => end - Duration::days(1),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read anchor watermark");
                    end - Duration::days(1)
                }
            },
        };

        tracing::info!(start = %start, end = %end, "starting anchor job");

        match self.execute(start, end, wait_for_confirmation).await {
            Ok(mut result) => {
                result.duration_seconds = job_start.elapsed().as_secs_f64();
                tracing::info!(
                    outcome = ?result.outcome,
                    anchor_id = ?result.anchor_id,
                    event_count = result.event_count,
                    duration_seconds = result.duration_seconds,
                    "anchor job finished"
                );
                result
            }
            Err(e) => {
                tracing::error!(start = %start, end = %end, error = %e, "anchor job failed");
                AnchorResult {
                    success: false,
                    outcome: AnchorOutcome::Failed,
                    anchor_id: None,
                    digest: None,
                    event_count: 0,
                    block_id: None,
                    error: Some(e.to_string()),
                    start_time: start,
                    end_time: end,
                    duration_seconds: job_start.elapsed().as_secs_f64(),
                }
            }
        }
    }

    /// Anchor the previous full UTC day: `[yesterday 00:00, today 00:00)`.
    pub async fn run_daily(&self) -> AnchorResult {
        let end = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight exists")
            .and_utc();
        let start = end - Duration::days(1);

        self.run(Some(start), Some(end), true).await
    }

    /// Anchor everything since the watermark once at least `min_events`
    /// have accumulated. Returns `None` when below the threshold.
    pub async fn run_incremental(&self, min_events: i64) -> Option<AnchorResult> {
        let now = Utc::now();
        let since = match self.consumer.last_anchor_end().await {
            Ok(Some(watermark)) => watermark,
            _ => now - Duration::days(1),
        };

        match self.consumer.event_count_since(since).await {
            Ok(count) if count >= min_events => {
                Some(self.run(Some(since), Some(now), false).await)
            }
            Ok(count) => {
                tracing::debug!(count, min_events, "below incremental anchor threshold");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to count events for incremental anchor");
                None
            }
        }
    }

    async fn execute(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        wait_for_confirmation: bool,
    ) -> Result<AnchorResult, WorkflowError> {
        let window = self.consumer.fetch_window(start, end, None).await?;

        if window.is_empty() {
            tracing::info!(start = %start, end = %end, "no events to anchor");
            return Ok(result_template(AnchorOutcome::Empty, start, end));
        }

        let tree = MerkleTree::from_raw_hashes(&window.event_hashes())?;
        let digest = tree.root();
        let event_count = window.event_count() as i64;

        tracing::info!(event_count, digest = %digest, "built merkle tree");

        // Idempotency: an identical window that already anchored is a
        // success without a second submission.
        if let Some(existing) = self.store.find_anchor_by_window(&digest, start, end).await? {
            tracing::info!(anchor_id = %existing.id, "anchor already exists for window");
            let mut result = result_template(AnchorOutcome::Duplicate, start, end);
            result.anchor_id = Some(existing.id);
            result.digest = Some(digest);
            result.event_count = event_count;
            result.block_id = existing.block_id;
            return Ok(result);
        }

        let record = AnchorRecord::new(&digest, event_count, start, end);
        let own_id = record.id;
        self.claims.claim(own_id).await;
        let outcome = self
            .post_and_persist(record, &tree, &window, wait_for_confirmation)
            .await;
        self.claims.release(own_id).await;
        outcome
    }

    async fn post_and_persist(
        &self,
        mut record: AnchorRecord,
        tree: &MerkleTree,
        window: &EventWindow,
        wait_for_confirmation: bool,
    ) -> Result<AnchorResult, WorkflowError> {
        record.status = AnchorStatus::Building;

        let message = AnchorMessage::merkle_root(
            &record.digest,
            record.item_count as u64,
            record.start_time,
            record.end_time,
            None,
        );

        record.status = AnchorStatus::Posting;

        match self.backend.post_anchor(&message, wait_for_confirmation).await {
            Ok(metadata) => {
                let now = Utc::now();
                record.block_id = Some(metadata.block_id.clone());
                record.network = Some(self.backend.network().to_string());
                record.explorer_url = Some(self.backend.explorer_url(&metadata.block_id));
                record.posted_at = Some(now);
                if metadata.referenced_by_milestone()
                    || metadata.inclusion_state == InclusionState::Included
                {
                    record.status = AnchorStatus::Confirmed;
                    record.confirmed_at = Some(now);
                } else {
                    record.status = AnchorStatus::Posted;
                }

                let (anchor_id, inserted) = self.store.upsert_anchor(&record).await?;

                if inserted {
                    let items = item_set(tree, window)?;
                    let written = self.store.save_items(anchor_id, &items).await?;
                    tracing::info!(
                        anchor_id = %anchor_id,
                        items = written,
                        block_id = %metadata.block_id,
                        "anchor persisted"
                    );
                } else {
                    // A concurrent job won the unique window; its items are
                    // authoritative.
                    tracing::info!(
                        anchor_id = %anchor_id,
                        "lost window race, skipping item persistence"
                    );
                }

                let mut result =
                    result_template(AnchorOutcome::Anchored, record.start_time, record.end_time);
                result.anchor_id = Some(anchor_id);
                result.digest = Some(record.digest.clone());
                result.event_count = record.item_count;
                result.block_id = Some(metadata.block_id);
                Ok(result)
            }
            Err(e) => {
                record.status = AnchorStatus::Failed;
                record.error_message = Some(e.to_string());
                let (anchor_id, _) = self.store.upsert_anchor(&record).await?;

                tracing::error!(
                    anchor_id = %anchor_id,
                    error = %e,
                    "anchor submission failed, recorded for reconciliation"
                );

                let mut result =
                    result_template(AnchorOutcome::Failed, record.start_time, record.end_time);
                result.success = false;
                result.anchor_id = Some(anchor_id);
                result.digest = Some(record.digest.clone());
                result.event_count = record.item_count;
                result.error = Some(e.to_string());
                Ok(result)
            }
        }
    }
}

fn item_set(tree: &MerkleTree, window: &EventWindow) -> Result<Vec<NewItem>, WorkflowError> {
    window
        .events
        .iter()
        .enumerate()
        .map(|(i, event)| {
            let proof = tree.proof(i)?;
            Ok(NewItem {
                event_id: Some(event.id),
                event_hash: event.event_hash.clone(),
                position: i as i64,
                proof_compact: Some(proof.to_compact()),
            })
        })
        .collect()
}

fn result_template(outcome: AnchorOutcome, start: DateTime<Utc>, end: DateTime<Utc>) -> AnchorResult {
    AnchorResult {
        success: true,
        outcome,
        anchor_id: None,
        digest: None,
        event_count: 0,
        block_id: None,
        error: None,
        start_time: start,
        end_time: end,
        duration_seconds: 0.0,
    }
}
