//! HTTP client for the node's core API.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::backend::TangleBackend;
use crate::config::TangleConfig;
use crate::error::TangleError;
use crate::message::{AnchorMessage, BlockMetadata, InclusionState, NodeInfo};

/// Tagged data payload type in the core API block schema.
const TAGGED_DATA_PAYLOAD: u32 = 5;
const PROTOCOL_VERSION: u32 = 2;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    block_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataResponse {
    #[serde(default)]
    is_solid: bool,
    referenced_by_milestone_index: Option<u64>,
    ledger_inclusion_state: Option<String>,
}

/// Client for submitting anchors to a tangle node and tracking their
/// inclusion.
#[derive(Debug, Clone)]
pub struct TangleClient {
    http: reqwest::Client,
    config: TangleConfig,
    tag: String,
}

impl TangleClient {
    pub fn new(config: TangleConfig) -> Result<Self, TangleError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TangleError::Connection(format!("failed to build HTTP client: {e}")))?;

        let tag = config.tag();
        Ok(Self { http, config, tag })
    }

    pub fn config(&self) -> &TangleConfig {
        &self.config
    }

    /// Node identity and protocol info.
    pub async fn node_info(&self) -> Result<NodeInfo, TangleError> {
        let response = self
            .http
            .get(self.url("/api/core/v2/info"))
            .send()
            .await
            .map_err(|e| TangleError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TangleError::Connection(format!(
                "info request returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| TangleError::Connection(format!("failed to parse node info: {e}")))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.node_url.trim_end_matches('/'), path)
    }

    /// One submission attempt: build the tagged data block and POST it.
    async fn submit_tagged_data(&self, message: &AnchorMessage) -> Result<String, TangleError> {
        let block = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "payload": {
                "type": TAGGED_DATA_PAYLOAD,
                "tag": hex::encode(self.tag.as_bytes()),
                "data": hex::encode(message.to_bytes()),
            },
        });

        let response = self
            .http
            .post(self.url("/api/core/v2/blocks"))
            .timeout(self.config.api_timeout)
            .json(&block)
            .send()
            .await
            .map_err(|e| TangleError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail: String = body.chars().take(200).collect();
            return Err(TangleError::Rejected(format!("{status}: {detail}")));
        }

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| TangleError::Connection(format!("failed to parse submit response: {e}")))?;

        Ok(submitted.block_id)
    }

    /// Submit with capped exponential backoff between attempts.
    async fn submit_with_retry(&self, message: &AnchorMessage) -> Result<String, TangleError> {
        let attempts = self.config.retry_count.max(1);
        let mut attempt = 0;

        loop {
            match self.submit_tagged_data(message).await {
                Ok(block_id) => return Ok(block_id),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = backoff_delay(
                        self.config.retry_delay,
                        self.config.retry_max_delay,
                        attempt,
                    );
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "block submission failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Poll metadata until the ledger includes the block, reports it
    /// conflicting, or the confirmation window elapses. Transient poll
    /// errors wait one interval and keep the original deadline.
    async fn wait_for_confirmation(&self, block_id: &str) -> Result<BlockMetadata, TangleError> {
        let deadline = tokio::time::Instant::now() + self.config.confirmation_timeout;

        tracing::info!(
            block_id,
            timeout_secs = self.config.confirmation_timeout.as_secs(),
            "waiting for block confirmation"
        );

        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(TangleError::ConfirmationTimeout(
                    self.config.confirmation_timeout.as_secs(),
                ));
            }

            match self.block_metadata(block_id).await {
                Ok(metadata) => match metadata.inclusion_state {
                    InclusionState::Included => {
                        tracing::info!(
                            block_id,
                            milestone_index = ?metadata.milestone_index,
                            "block confirmed"
                        );
                        return Ok(metadata);
                    }
                    InclusionState::Conflicting => {
                        return Err(TangleError::Conflicting(block_id.to_string()));
                    }
                    _ => tokio::time::sleep(self.config.poll_interval).await,
                },
                Err(e) if e.is_transient() => {
                    tracing::warn!(block_id, error = %e, "metadata poll failed, retrying");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl TangleBackend for TangleClient {
    async fn health(&self) -> bool {
        match self.http.get(self.url("/health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn post_anchor(
        &self,
        message: &AnchorMessage,
        wait_for_inclusion: bool,
    ) -> Result<BlockMetadata, TangleError> {
        if !self.config.enabled {
            return Err(TangleError::Unavailable);
        }

        tracing::info!(
            digest = %message.digest,
            count = message.count,
            tag = %self.tag,
            "posting anchor to tangle"
        );

        let block_id = self.submit_with_retry(message).await?;
        tracing::info!(block_id = %block_id, "block submitted");

        if wait_for_inclusion {
            return self.wait_for_confirmation(&block_id).await;
        }

        Ok(BlockMetadata {
            block_id,
            network: self.config.network.clone(),
            is_solid: false,
            milestone_index: None,
            inclusion_state: InclusionState::Pending,
            timestamp: Utc::now(),
        })
    }

    async fn block_metadata(&self, block_id: &str) -> Result<BlockMetadata, TangleError> {
        if !self.config.enabled {
            return Err(TangleError::Unavailable);
        }

        let response = self
            .http
            .get(self.url(&format!("/api/core/v2/blocks/{block_id}/metadata")))
            .send()
            .await
            .map_err(|e| TangleError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TangleError::Connection(format!(
                "metadata request returned {}",
                response.status()
            )));
        }

        let raw: MetadataResponse = response
            .json()
            .await
            .map_err(|e| TangleError::Connection(format!("failed to parse metadata: {e}")))?;

        Ok(BlockMetadata {
            block_id: block_id.to_string(),
            network: self.config.network.clone(),
            is_solid: raw.is_solid,
            milestone_index: raw.referenced_by_milestone_index,
            inclusion_state: InclusionState::from_api(raw.ledger_inclusion_state.as_deref()),
            timestamp: Utc::now(),
        })
    }

    async fn block_exists(&self, block_id: &str) -> bool {
        match self.block_metadata(block_id).await {
            Ok(metadata) => metadata.is_solid,
            Err(_) => false,
        }
    }

    fn explorer_url(&self, block_id: &str) -> String {
        format!(
            "{}/block/{block_id}",
            self.config.explorer_url.trim_end_matches('/')
        )
    }

    fn network(&self) -> &str {
        &self.config.network
    }
}

pub(crate) fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exp = attempt.min(20);
    base.saturating_mul(2u32.saturating_pow(exp)).min(cap)
}
