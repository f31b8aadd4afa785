//! Reconciliation: the periodic scan that advances stuck anchors toward a
//! terminal state.
//!
//! Three scans per pass: anchors stuck before submission are resubmitted
//! under a capped exponential backoff, posted anchors are checked against
//! ledger metadata, and failed anchors below the retry cap get another
//! attempt. Anchors at the cap are promoted to "needs review" and never
//! retried again. Anchor items are never touched here.

use std::sync::Arc;
use std::time::Duration;

use anchor_tangle::{AnchorMessage, InclusionState, TangleBackend};
use chrono::Utc;

use crate::model::{AnchorRecord, AnchorStatus, ReconciliationReport};
use crate::store::{AnchorRepository, Result as StoreResult};
use crate::workflow::ClaimSet;

/// Failure message marking an anchor that exhausted its retries.
pub const NEEDS_REVIEW_MESSAGE: &str = "exceeded retries; needs review";

/// Retry policy for one reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Retries allowed before an anchor is flagged for review.
    pub max_retries: i64,
    /// Base of the exponential backoff between retries.
    pub backoff_base: Duration,
    /// Cap on the backoff delay.
    pub backoff_cap: Duration,
    /// Anchors younger than this are left for their owning workflow.
    pub min_age: Duration,
    /// Upper bound on anchors examined per status per pass.
    pub scan_limit: i64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(60),
            backoff_cap: Duration::from_secs(3600),
            min_age: Duration::from_secs(60),
            scan_limit: 100,
        }
    }
}

impl ReconcileConfig {
    /// `min(base · 2^n, cap)` for the n-th retry.
    pub fn backoff(&self, retries: i64) -> Duration {
        let exp = retries.clamp(0, 20) as u32;
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.backoff_cap)
    }
}

/// Scans non-terminal anchors and retries or confirms them.
pub struct Reconciliation {
    store: AnchorRepository,
    backend: Arc<dyn TangleBackend>,
    claims: ClaimSet,
    config: ReconcileConfig,
}

impl Reconciliation {
    pub fn new(
        store: AnchorRepository,
        backend: Arc<dyn TangleBackend>,
        claims: ClaimSet,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            backend,
            claims,
            config,
        }
    }

    /// One full reconciliation pass.
    pub async fn run(&self) -> ReconciliationReport {
        let mut report = ReconciliationReport::default();

        for status in [
            AnchorStatus::Pending,
            AnchorStatus::Building,
            AnchorStatus::Posting,
        ] {
            if let Err(e) = self.scan_stuck(status, &mut report).await {
                tracing::error!(status = status.as_str(), error = %e, "stuck scan failed");
            }
        }

        if let Err(e) = self.scan_posted(&mut report).await {
            tracing::error!(error = %e, "posted scan failed");
        }

        if let Err(e) = self.scan_failed(&mut report).await {
            tracing::error!(error = %e, "failed scan failed");
        }

        tracing::info!(
            processed = report.processed,
            retried = report.retried,
            confirmed = report.confirmed,
            failed = report.failed,
            needs_review = report.needs_review,
            "reconciliation pass completed"
        );

        report
    }

    /// Anchors stuck before a successful submission.
    async fn scan_stuck(
        &self,
        status: AnchorStatus,
        report: &mut ReconciliationReport,
    ) -> StoreResult<()> {
        let anchors = self
            .store
            .list_anchors(Some(status), self.config.scan_limit, 0)
            .await?;

        for anchor in anchors {
            if self.claims.contains(anchor.id).await {
                continue;
            }
            let age = Utc::now().signed_duration_since(anchor.created_at);
            if age.to_std().unwrap_or_default() < self.config.min_age {
                continue;
            }

            report.processed += 1;
            self.retry_or_flag(&anchor, report).await?;
        }

        Ok(())
    }

    /// Posted anchors waiting on ledger inclusion.
    async fn scan_posted(&self, report: &mut ReconciliationReport) -> StoreResult<()> {
        let anchors = self
            .store
            .list_anchors(Some(AnchorStatus::Posted), self.config.scan_limit, 0)
            .await?;

        for anchor in anchors {
            if self.claims.contains(anchor.id).await {
                continue;
            }
            let Some(block_id) = anchor.block_id.as_deref() else {
                continue;
            };
            report.processed += 1;

            match self.backend.block_metadata(block_id).await {
                Ok(metadata) => match metadata.inclusion_state {
                    InclusionState::Included => {
                        self.store
                            .update_status(anchor.id, AnchorStatus::Confirmed, None, None)
                            .await?;
                        report.confirmed += 1;
                        tracing::info!(anchor_id = %anchor.id, block_id, "anchor confirmed");
                    }
                    InclusionState::Conflicting => {
                        self.store
                            .update_status(
                                anchor.id,
                                AnchorStatus::Failed,
                                None,
                                Some("ledger reports conflicting state"),
                            )
                            .await?;
                        report.failed += 1;
                        tracing::warn!(anchor_id = %anchor.id, block_id, "anchor conflicting");
                    }
                    _ => {}
                },
                Err(e) => {
                    tracing::warn!(anchor_id = %anchor.id, error = %e, "confirmation check failed");
                }
            }
        }

        Ok(())
    }

    /// Failed anchors below the retry cap.
    async fn scan_failed(&self, report: &mut ReconciliationReport) -> StoreResult<()> {
        let anchors = self
            .store
            .list_anchors(Some(AnchorStatus::Failed), self.config.scan_limit, 0)
            .await?;

        for anchor in anchors {
            if self.claims.contains(anchor.id).await {
                continue;
            }
            report.processed += 1;
            self.retry_or_flag(&anchor, report).await?;
        }

        Ok(())
    }

    /// Shared retry decision: flag at the cap, wait out the backoff,
    /// otherwise resubmit.
    async fn retry_or_flag(
        &self,
        anchor: &AnchorRecord,
        report: &mut ReconciliationReport,
    ) -> StoreResult<()> {
        let retries = self.store.retry_count(anchor.id).await?;

        if retries >= self.config.max_retries {
            if anchor.error_message.as_deref() != Some(NEEDS_REVIEW_MESSAGE) {
                self.store
                    .update_status(anchor.id, AnchorStatus::Failed, None, Some(NEEDS_REVIEW_MESSAGE))
                    .await?;
                report.needs_review += 1;
                tracing::warn!(
                    anchor_id = %anchor.id,
                    retries,
                    "anchor exceeded retry cap, flagged for review"
                );
            }
            return Ok(());
        }

        let last_attempt = self
            .store
            .last_retry_at(anchor.id)
            .await?
            .unwrap_or(anchor.created_at);
        let elapsed = Utc::now()
            .signed_duration_since(last_attempt)
            .to_std()
            .unwrap_or_default();
        if elapsed < self.config.backoff(retries) {
            return Ok(());
        }

        self.resubmit(anchor, retries, report).await
    }

    /// Re-post the anchor's message to the ledger and record the attempt.
    async fn resubmit(
        &self,
        anchor: &AnchorRecord,
        retries: i64,
        report: &mut ReconciliationReport,
    ) -> StoreResult<()> {
        // Single-owner: skip if another retry or workflow grabbed it.
        if !self.claims.claim(anchor.id).await {
            return Ok(());
        }

        tracing::info!(
            anchor_id = %anchor.id,
            digest = %anchor.digest,
            attempt = retries + 1,
            "retrying anchor submission"
        );

        let result: StoreResult<()> = async {
            // Failed anchors re-enter the lifecycle through pending.
            if anchor.status == AnchorStatus::Failed {
                self.store
                    .update_status(anchor.id, AnchorStatus::Pending, None, None)
                    .await?;
            }

            let message = AnchorMessage::merkle_root(
                &anchor.digest,
                anchor.item_count as u64,
                anchor.start_time,
                anchor.end_time,
                None,
            );

            match self.backend.post_anchor(&message, false).await {
                Ok(metadata) => {
                    self.store
                        .update_status(
                            anchor.id,
                            AnchorStatus::Posted,
                            Some(&metadata.block_id),
                            None,
                        )
                        .await?;
                    report.retried += 1;
                    tracing::info!(
                        anchor_id = %anchor.id,
                        block_id = %metadata.block_id,
                        "anchor resubmitted"
                    );
                }
                Err(e) => {
                    let error = e.to_string();
                    self.store.record_retry(anchor.id, Some(&error)).await?;
                    let message = if retries + 1 >= self.config.max_retries {
                        report.needs_review += 1;
                        NEEDS_REVIEW_MESSAGE
                    } else {
                        error.as_str()
                    };
                    self.store
                        .update_status(anchor.id, AnchorStatus::Failed, None, Some(message))
                        .await?;
                    report.failed += 1;
                    tracing::warn!(anchor_id = %anchor.id, error = %error, "anchor retry failed");
                }
            }
            Ok(())
        }
        .await;

        self.claims.release(anchor.id).await;
        result
    }
}
