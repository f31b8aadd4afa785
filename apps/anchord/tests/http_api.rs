//! HTTP surface tests: the service is spawned on an ephemeral port and
//! driven with a real client over the stub ledger backend.

use std::sync::Arc;
use std::time::SystemTime;

use anchor_tangle::TangleStub;
use ared_anchord::consumer::EventConsumer;
use ared_anchord::http::{build_router, AppState};
use ared_anchord::store::AnchorRepository;
use ared_anchord::workflow::{AnchorWorkflow, ClaimSet};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

async fn make_pool() -> Pool<Sqlite> {
    let name = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let url = format!("sqlite:file:http_api_{name}?mode=memory&cache=shared");
    SqlitePoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .expect("failed to open in-memory SQLite pool")
}

/// Spawn the full router over a fresh database and return its base URL
/// plus the pool for seeding.
async fn spawn_service() -> (String, Pool<Sqlite>) {
    let pool = make_pool().await;
    let store = AnchorRepository::new(pool.clone());
    store.ensure_schema().await.unwrap();

    let backend = Arc::new(TangleStub);
    let workflow = Arc::new(AnchorWorkflow::new(
        store.clone(),
        EventConsumer::new(pool.clone()),
        backend.clone(),
        ClaimSet::new(),
    ));

    let app = build_router(AppState {
        store,
        workflow,
        backend,
        tangle_enabled: true,
        network: "stub".to_string(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), pool)
}

async fn insert_event(pool: &Pool<Sqlite>, block_number: i64, event_hash: &str, at: DateTime<Utc>) {
    sqlx::query(
        "INSERT INTO indexed_events \
         (id, block_number, block_hash, event_index, pallet, event_name, \
          event_hash, device_id, created_at) \
         VALUES (?1, ?2, ?3, 0, 'metering', 'EnergyRecorded', ?4, 'device-1', ?5)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(block_number)
    .bind(format!("0xblock{block_number}"))
    .bind(event_hash)
    .bind(at.timestamp_millis())
    .execute(pool)
    .await
    .unwrap();
}

fn window_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap()
}

/// Anchor a two-event window through the API and return the anchor id and
/// the two event hashes.
async fn anchor_window(base: &str, pool: &Pool<Sqlite>) -> (String, [String; 2]) {
    let start = window_start();
    let hashes = ["aa".repeat(32), "bb".repeat(32)];
    insert_event(pool, 1, &hashes[0], start + ChronoDuration::hours(1)).await;
    insert_event(pool, 2, &hashes[1], start + ChronoDuration::hours(2)).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/anchors"))
        .json(&json!({
            "start_time": start,
            "end_time": start + ChronoDuration::days(1),
            "wait_for_completion": true,
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result"]["success"], true);

    let anchor_id = body["result"]["anchor_id"].as_str().unwrap().to_string();
    (anchor_id, hashes)
}

#[tokio::test]
async fn health_reports_tangle_state() {
    let (base, _pool) = spawn_service().await;

    let body: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["tangle"], "connected");
    assert_eq!(body["network"], "stub");
}

#[tokio::test]
async fn anchor_job_listing_and_detail() {
    let (base, pool) = spawn_service().await;
    let (anchor_id, hashes) = anchor_window(&base, &pool).await;

    // Listing shows the anchor with pagination fields.
    let list: Value = reqwest::get(format!("{base}/anchors?status=confirmed"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["total"], 1);
    assert_eq!(list["has_more"], false);
    assert_eq!(list["items"][0]["id"], anchor_id.as_str());
    assert_eq!(list["items"][0]["item_count"], 2);

    // Detail returns the items in position order.
    let detail: Value = reqwest::get(format!("{base}/anchors/{anchor_id}"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["anchor"]["id"], anchor_id.as_str());
    let items = detail["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["position"], 0);
    assert_eq!(items[0]["event_hash"], hashes[0].as_str());
    assert!(items[0]["merkle_proof"].is_array());
}

#[tokio::test]
async fn anchor_events_support_pagination_and_device_filter() {
    let (base, pool) = spawn_service().await;
    let (anchor_id, _) = anchor_window(&base, &pool).await;

    let page: Value = reqwest::get(format!("{base}/anchors/{anchor_id}/events?limit=1"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"], 2);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    assert_eq!(page["has_more"], true);
    assert_eq!(page["anchor_id"], anchor_id.as_str());

    let filtered: Value = reqwest::get(format!(
        "{base}/anchors/{anchor_id}/events?device_id=device-1"
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(filtered["total"], 2);

    let none: Value = reqwest::get(format!(
        "{base}/anchors/{anchor_id}/events?device_id=device-9"
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(none["total"], 0);
    assert_eq!(none["items"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn verify_confirms_a_stored_proof() {
    let (base, pool) = spawn_service().await;
    let (anchor_id, hashes) = anchor_window(&base, &pool).await;

    let client = reqwest::Client::new();
    let body: Value = client
        .post(format!("{base}/anchors/verify"))
        .json(&json!({ "event_hash": hashes[0], "verify_on_tangle": true }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["verified"], true);
    assert_eq!(body["message"], "Verification successful");
    assert_eq!(body["anchor_id"], anchor_id.as_str());
    assert_eq!(body["tangle_verified"], true);
    assert!(body["proof_path"].is_array());
    assert!(body["anchor_digest"].is_string());
}

#[tokio::test]
async fn verify_rejects_a_forged_proof() {
    let (base, pool) = spawn_service().await;
    let (_, hashes) = anchor_window(&base, &pool).await;

    let forged = vec![format!("R:{}", "0".repeat(64))];
    let client = reqwest::Client::new();
    let body: Value = client
        .post(format!("{base}/anchors/verify"))
        .json(&json!({ "event_hash": hashes[0], "merkle_proof": forged }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["verified"], false);
    assert_eq!(body["message"], "Merkle proof verification failed");
}

#[tokio::test]
async fn verify_reports_unknown_hashes() {
    let (base, _pool) = spawn_service().await;

    let client = reqwest::Client::new();
    let body: Value = client
        .post(format!("{base}/anchors/verify"))
        .json(&json!({ "event_hash": "ff".repeat(32) }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["verified"], false);
    assert_eq!(body["message"], "Event hash not found in any anchor");
    assert!(body["anchor_id"].is_null());
}

#[tokio::test]
async fn verify_reports_missing_proofs() {
    let (base, pool) = spawn_service().await;

    // An anchor item stored without a proof path.
    let store = AnchorRepository::new(pool.clone());
    let start = window_start();
    let mut anchor = ared_anchord::model::AnchorRecord::new(
        &"dd".repeat(32),
        1,
        start,
        start + ChronoDuration::days(1),
    );
    anchor.status = ared_anchord::model::AnchorStatus::Posted;
    store.upsert_anchor(&anchor).await.unwrap();
    store
        .save_item(
            anchor.id,
            &ared_anchord::store::NewItem {
                event_id: None,
                event_hash: "ee".repeat(32),
                position: 0,
                proof_compact: None,
            },
        )
        .await
        .unwrap();

    let client = reqwest::Client::new();
    let body: Value = client
        .post(format!("{base}/anchors/verify"))
        .json(&json!({ "event_hash": "ee".repeat(32) }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["verified"], false);
    assert_eq!(body["message"], "No Merkle proof available");
    assert_eq!(body["anchor_id"], anchor.id.to_string());
}

#[tokio::test]
async fn malformed_proof_is_a_client_error() {
    let (base, pool) = spawn_service().await;
    let (_, hashes) = anchor_window(&base, &pool).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/anchors/verify"))
        .json(&json!({
            "event_hash": hashes[0],
            "merkle_proof": ["not-a-tagged-path"],
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn unknown_status_filter_is_a_client_error() {
    let (base, _pool) = spawn_service().await;

    let response = reqwest::get(format!("{base}/anchors?status=bogus")).await.unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn missing_anchor_is_not_found() {
    let (base, _pool) = spawn_service().await;

    let response = reqwest::get(format!("{base}/anchors/{}", Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}
