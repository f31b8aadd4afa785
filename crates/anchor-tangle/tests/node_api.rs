//! Integration tests for the tangle client against an in-process mock node.
//!
//! Covers: tagged-data payload shape, submission retry/backoff, inclusion
//! waiting (included / conflicting / timeout) and the disabled mode.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anchor_tangle::{
    AnchorMessage, InclusionState, TangleBackend, TangleClient, TangleConfig, TangleError,
};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Mock node
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockNode {
    /// POSTs received so far.
    posts: AtomicU32,
    /// How many initial POSTs answer 500 before accepting.
    fail_posts: AtomicU32,
    /// Scripted metadata responses; the last one repeats.
    metadata: Mutex<VecDeque<Value>>,
    /// Body of the most recent block submission.
    last_block: Mutex<Option<Value>>,
}

impl MockNode {
    fn with_metadata(responses: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            metadata: Mutex::new(responses.into()),
            ..Self::default()
        })
    }
}

fn metadata_json(state: &str, milestone: Option<u64>) -> Value {
    json!({
        "isSolid": true,
        "referencedByMilestoneIndex": milestone,
        "ledgerInclusionState": state,
    })
}

async fn submit_block(State(node): State<Arc<MockNode>>, Json(body): Json<Value>) -> impl IntoResponse {
    node.posts.fetch_add(1, Ordering::SeqCst);
    *node.last_block.lock().await = Some(body);

    let failures = node.fail_posts.load(Ordering::SeqCst);
    if failures > 0 {
        node.fail_posts.store(failures - 1, Ordering::SeqCst);
        return (StatusCode::INTERNAL_SERVER_ERROR, "node busy").into_response();
    }

    Json(json!({"blockId": "0xb10c"})).into_response()
}

async fn block_metadata(
    State(node): State<Arc<MockNode>>,
    Path(_id): Path<String>,
) -> impl IntoResponse {
    let mut queue = node.metadata.lock().await;
    let response = if queue.len() > 1 {
        queue.pop_front().unwrap()
    } else {
        queue
            .front()
            .cloned()
            .unwrap_or_else(|| metadata_json("pending", None))
    };
    Json(response)
}

async fn spawn_node(node: Arc<MockNode>) -> String {
    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route(
            "/api/core/v2/info",
            get(|| async {
                Json(json!({
                    "version": "2.0.0",
                    "protocol": {"networkName": "mock-tangle"},
                }))
            }),
        )
        .route("/api/core/v2/blocks", post(submit_block))
        .route("/api/core/v2/blocks/{id}/metadata", get(block_metadata))
        .with_state(node);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock node");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock node serve");
    });

    format!("http://{addr}")
}

fn fast_config(node_url: String) -> TangleConfig {
    TangleConfig {
        node_url,
        retry_count: 3,
        retry_delay: Duration::from_millis(10),
        retry_max_delay: Duration::from_millis(50),
        confirmation_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(10),
        ..TangleConfig::default()
    }
}

fn sample_message() -> AnchorMessage {
    let start = Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2025, 12, 2, 0, 0, 0).unwrap();
    AnchorMessage::merkle_root(&"aa".repeat(32), 2, start, end, None)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submits_tagged_data_and_waits_for_inclusion() {
    let node = MockNode::with_metadata(vec![
        metadata_json("pending", None),
        metadata_json("included", Some(42)),
    ]);
    let url = spawn_node(node.clone()).await;
    let client = TangleClient::new(fast_config(url)).unwrap();

    let message = sample_message();
    let metadata = client.post_anchor(&message, true).await.unwrap();

    assert_eq!(metadata.block_id, "0xb10c");
    assert_eq!(metadata.inclusion_state, InclusionState::Included);
    assert_eq!(metadata.milestone_index, Some(42));
    assert!(metadata.referenced_by_milestone());
    assert_eq!(node.posts.load(Ordering::SeqCst), 1);

    // The wire block wraps the canonical payload in a tagged data envelope.
    let block = node.last_block.lock().await.clone().unwrap();
    assert_eq!(block["protocolVersion"], 2);
    assert_eq!(block["payload"]["type"], 5);

    let tag = hex::decode(block["payload"]["tag"].as_str().unwrap()).unwrap();
    assert_eq!(String::from_utf8(tag).unwrap(), "ARED_ANCHOR_v1");

    let data = hex::decode(block["payload"]["data"].as_str().unwrap()).unwrap();
    assert_eq!(data, message.to_bytes());
    let payload: Value = serde_json::from_slice(&data).unwrap();
    assert_eq!(payload["type"], "merkle_root");
    assert_eq!(payload["count"], 2);
}

#[tokio::test]
async fn fire_and_forget_submission_reports_pending() {
    let node = MockNode::with_metadata(vec![]);
    let url = spawn_node(node.clone()).await;
    let client = TangleClient::new(fast_config(url)).unwrap();

    let metadata = client.post_anchor(&sample_message(), false).await.unwrap();

    assert_eq!(metadata.block_id, "0xb10c");
    assert_eq!(metadata.inclusion_state, InclusionState::Pending);
    assert!(metadata.milestone_index.is_none());
}

#[tokio::test]
async fn submission_retries_transient_failures_then_succeeds() {
    let node = MockNode::with_metadata(vec![]);
    node.fail_posts.store(2, Ordering::SeqCst);
    let url = spawn_node(node.clone()).await;
    let client = TangleClient::new(fast_config(url)).unwrap();

    let metadata = client.post_anchor(&sample_message(), false).await.unwrap();

    assert_eq!(metadata.block_id, "0xb10c");
    assert_eq!(node.posts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn submission_gives_up_after_the_retry_cap() {
    let node = MockNode::with_metadata(vec![]);
    node.fail_posts.store(10, Ordering::SeqCst);
    let url = spawn_node(node.clone()).await;
    let client = TangleClient::new(fast_config(url)).unwrap();

    let err = client.post_anchor(&sample_message(), false).await.unwrap_err();

    assert!(matches!(err, TangleError::Rejected(_)));
    assert_eq!(node.posts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn conflicting_ledger_state_fails_confirmation() {
    let node = MockNode::with_metadata(vec![metadata_json("conflicting", None)]);
    let url = spawn_node(node).await;
    let client = TangleClient::new(fast_config(url)).unwrap();

    let err = client.post_anchor(&sample_message(), true).await.unwrap_err();
    assert!(matches!(err, TangleError::Conflicting(_)));
}

#[tokio::test]
async fn confirmation_times_out_when_never_included() {
    let node = MockNode::with_metadata(vec![metadata_json("pending", None)]);
    let url = spawn_node(node).await;
    let mut config = fast_config(url);
    config.confirmation_timeout = Duration::from_millis(100);
    config.poll_interval = Duration::from_millis(20);
    let client = TangleClient::new(config).unwrap();

    let err = client.post_anchor(&sample_message(), true).await.unwrap_err();
    assert!(matches!(err, TangleError::ConfirmationTimeout(_)));
}

#[tokio::test]
async fn disabled_configuration_is_unavailable() {
    let node = MockNode::with_metadata(vec![]);
    let url = spawn_node(node.clone()).await;
    let mut config = fast_config(url);
    config.enabled = false;
    let client = TangleClient::new(config).unwrap();

    let err = client.post_anchor(&sample_message(), false).await.unwrap_err();
    assert!(matches!(err, TangleError::Unavailable));
    assert_eq!(node.posts.load(Ordering::SeqCst), 0);

    let err = client.block_metadata("0xb10c").await.unwrap_err();
    assert!(matches!(err, TangleError::Unavailable));
}

#[tokio::test]
async fn health_and_node_info_round_trip() {
    let node = MockNode::with_metadata(vec![]);
    let url = spawn_node(node).await;
    let client = TangleClient::new(fast_config(url)).unwrap();

    assert!(client.health().await);

    let info = client.node_info().await.unwrap();
    assert_eq!(info.version, "2.0.0");
    assert_eq!(info.protocol.network_name, "mock-tangle");
}

#[tokio::test]
async fn block_exists_reflects_solidity() {
    let node = MockNode::with_metadata(vec![json!({
        "isSolid": true,
        "referencedByMilestoneIndex": null,
        "ledgerInclusionState": "pending",
    })]);
    let url = spawn_node(node).await;
    let client = TangleClient::new(fast_config(url)).unwrap();

    assert!(client.block_exists("0xb10c").await);
}
