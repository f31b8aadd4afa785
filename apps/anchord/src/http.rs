//! HTTP surface: anchor jobs, listings and inclusion verification.

use std::sync::Arc;

use anchor_tangle::TangleBackend;
use ared_merkle::proof::parse_compact_path;
use ared_merkle::verify_against_root;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::model::{AnchorItem, AnchorRecord, AnchorStatus};
use crate::store::{AnchorRepository, StoreError};
use crate::workflow::AnchorWorkflow;

#[derive(Clone)]
pub struct AppState {
    pub store: AnchorRepository,
    pub workflow: Arc<AnchorWorkflow>,
    pub backend: Arc<dyn TangleBackend>,
    pub tangle_enabled: bool,
    pub network: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/anchors", post(create_anchor).get(list_anchors))
        .route("/anchors/verify", post(verify_inclusion))
        .route("/anchors/{id}", get(get_anchor))
        .route("/anchors/{id}/events", get(list_anchor_events))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct AnchorCreateRequest {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub wait_for_completion: bool,
}

#[derive(Debug, Deserialize)]
pub struct AnchorListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AnchorEventsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub event_hash: String,
    pub anchor_id: Option<Uuid>,
    pub merkle_proof: Option<Vec<String>>,
    #[serde(default)]
    pub verify_on_tangle: bool,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub verified: bool,
    pub event_hash: String,
    pub anchor_id: Option<Uuid>,
    pub anchor_digest: Option<String>,
    pub block_id: Option<String>,
    pub explorer_url: Option<String>,
    pub tangle_verified: Option<bool>,
    pub message: String,
    pub proof_path: Option<Vec<String>>,
}

impl VerifyResponse {
    fn not_found(event_hash: &str) -> Self {
        Self {
            verified: false,
            event_hash: event_hash.to_string(),
            anchor_id: None,
            anchor_digest: None,
            block_id: None,
            explorer_url: None,
            tangle_verified: None,
            message: "Event hash not found in any anchor".to_string(),
            proof_path: None,
        }
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let tangle = if !state.tangle_enabled {
        "disabled"
    } else if state.backend.health().await {
        "connected"
    } else {
        "unreachable"
    };

    Json(json!({
        "status": "healthy",
        "service": "ared-anchord",
        "tangle": tangle,
        "network": state.network,
    }))
}

async fn create_anchor(
    State(state): State<AppState>,
    Json(body): Json<AnchorCreateRequest>,
) -> Response {
    let job_id = Uuid::new_v4();

    tracing::info!(
        %job_id,
        start_time = ?body.start_time,
        end_time = ?body.end_time,
        wait = body.wait_for_completion,
        "anchor job requested"
    );

    if body.wait_for_completion {
        let result = state.workflow.run(body.start_time, body.end_time, true).await;
        if result.success {
            (
                StatusCode::OK,
                Json(json!({
                    "job_id": job_id,
                    "status": "completed",
                    "result": result,
                })),
            )
                .into_response()
        } else {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "job_id": job_id,
                    "status": "failed",
                    "error": result.error,
                })),
            )
                .into_response()
        }
    } else {
        let workflow = state.workflow.clone();
        let (start, end) = (body.start_time, body.end_time);
        tokio::spawn(async move {
            workflow.run(start, end, true).await;
        });

        (
            StatusCode::ACCEPTED,
            Json(json!({
                "job_id": job_id,
                "status": "pending",
                "message": "anchor job queued for background processing",
            })),
        )
            .into_response()
    }
}

async fn list_anchors(
    State(state): State<AppState>,
    Query(query): Query<AnchorListQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let status = match query.status.as_deref() {
        Some(raw) => match AnchorStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("unknown status {raw:?}") })),
                )
                    .into_response();
            }
        },
        None => None,
    };

    // Fetch one extra row to detect another page.
    let anchors = match state.store.list_anchors(status, limit + 1, offset).await {
        Ok(anchors) => anchors,
        Err(e) => return internal_error(e),
    };
    let total = match state.store.count_anchors(status).await {
        Ok(total) => total,
        Err(e) => return internal_error(e),
    };

    let has_more = anchors.len() as i64 > limit;
    let items: Vec<AnchorRecord> = anchors.into_iter().take(limit as usize).collect();

    Json(json!({
        "items": items,
        "total": total,
        "limit": limit,
        "offset": offset,
        "has_more": has_more,
    }))
    .into_response()
}

async fn get_anchor(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let anchor = match state.store.get_anchor(id).await {
        Ok(Some(anchor)) => anchor,
        Ok(None) => return anchor_not_found(id),
        Err(e) => return internal_error(e),
    };

    let limit = anchor.item_count.max(1);
    let items = match state.store.list_items(id, limit, 0, None).await {
        Ok((items, _)) => items,
        Err(e) => return internal_error(e),
    };

    Json(json!({ "anchor": anchor, "items": items })).into_response()
}

async fn list_anchor_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<AnchorEventsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let offset = query.offset.unwrap_or(0).max(0);

    let anchor = match state.store.get_anchor(id).await {
        Ok(Some(anchor)) => anchor,
        Ok(None) => return anchor_not_found(id),
        Err(e) => return internal_error(e),
    };

    let (items, total) = match state
        .store
        .list_items(id, limit, offset, query.device_id.as_deref())
        .await
    {
        Ok(page) => page,
        Err(e) => return internal_error(e),
    };

    let has_more = offset + (items.len() as i64) < total;

    Json(json!({
        "items": items,
        "total": total,
        "limit": limit,
        "offset": offset,
        "has_more": has_more,
        "anchor_id": anchor.id,
        "anchor_digest": anchor.digest,
    }))
    .into_response()
}

enum ItemLookup {
    Found(Box<(AnchorRecord, AnchorItem)>),
    AnchorMissing(Uuid),
    NotFound,
}

async fn lookup_item(state: &AppState, request: &VerifyRequest) -> Result<ItemLookup, StoreError> {
    match request.anchor_id {
        Some(anchor_id) => {
            let Some(anchor) = state.store.get_anchor(anchor_id).await? else {
                return Ok(ItemLookup::AnchorMissing(anchor_id));
            };
            match state
                .store
                .find_item_in_anchor(anchor_id, &request.event_hash)
                .await?
            {
                Some(item) => Ok(ItemLookup::Found(Box::new((anchor, item)))),
                None => Ok(ItemLookup::NotFound),
            }
        }
        None => {
            let Some(item) = state.store.find_item_by_hash(&request.event_hash).await? else {
                return Ok(ItemLookup::NotFound);
            };
            match state.store.get_anchor(item.anchor_id).await? {
                Some(anchor) => Ok(ItemLookup::Found(Box::new((anchor, item)))),
                None => Ok(ItemLookup::NotFound),
            }
        }
    }
}

async fn verify_inclusion(
    State(state): State<AppState>,
    Json(body): Json<VerifyRequest>,
) -> Response {
    tracing::info!(
        event_hash = %body.event_hash,
        anchor_id = ?body.anchor_id,
        verify_on_tangle = body.verify_on_tangle,
        "verifying inclusion"
    );

    let (anchor, item) = match lookup_item(&state, &body).await {
        Ok(ItemLookup::Found(found)) => *found,
        Ok(ItemLookup::AnchorMissing(id)) => return anchor_not_found(id),
        Ok(ItemLookup::NotFound) => {
            return Json(VerifyResponse::not_found(&body.event_hash)).into_response();
        }
        Err(e) => return internal_error(e),
    };

    // A caller-supplied path overrides the stored one.
    let proof_path = body.merkle_proof.clone().or_else(|| item.merkle_proof.clone());
    let Some(proof_path) = proof_path else {
        return Json(VerifyResponse {
            verified: false,
            event_hash: body.event_hash,
            anchor_id: Some(anchor.id),
            anchor_digest: Some(anchor.digest),
            block_id: anchor.block_id,
            explorer_url: anchor.explorer_url,
            tangle_verified: None,
            message: "No Merkle proof available".to_string(),
            proof_path: None,
        })
        .into_response();
    };

    let verified = match parse_compact_path(&proof_path)
        .and_then(|elements| verify_against_root(&body.event_hash, &elements, &anchor.digest))
    {
        Ok(verified) => verified,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid merkle proof: {e}") })),
            )
                .into_response();
        }
    };

    let tangle_verified = match (&anchor.block_id, body.verify_on_tangle && state.tangle_enabled) {
        (Some(block_id), true) => Some(state.backend.block_exists(block_id).await),
        _ => None,
    };

    Json(VerifyResponse {
        verified,
        event_hash: body.event_hash,
        anchor_id: Some(anchor.id),
        anchor_digest: Some(anchor.digest),
        block_id: anchor.block_id,
        explorer_url: anchor.explorer_url,
        tangle_verified,
        message: if verified {
            "Verification successful".to_string()
        } else {
            "Merkle proof verification failed".to_string()
        },
        proof_path: Some(proof_path),
    })
    .into_response()
}

fn anchor_not_found(id: Uuid) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("anchor {id} not found") })),
    )
        .into_response()
}

fn internal_error(e: StoreError) -> Response {
    tracing::error!(error = %e, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
        .into_response()
}
