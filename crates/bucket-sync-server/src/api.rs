use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use bucket_sync::{MergeRequest, MergeResponse, SnapshotResponse};
use serde::Serialize;
use tracing::error;

use crate::merge::MergeStore;

// ── API types ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    keys: usize,
}

// ── API handlers ────────────────────────────────────────────────────

pub async fn snapshot(State(store): State<Arc<MergeStore>>) -> impl IntoResponse {
    match store.snapshot().await {
        Ok(records) => Json(SnapshotResponse { records }).into_response(),
        Err(e) => error_response(e.to_string()),
    }
}

pub async fn merge(
    State(store): State<Arc<MergeStore>>,
    Json(request): Json<MergeRequest>,
) -> impl IntoResponse {
    match store.merge(request.records).await {
        Ok(report) => Json(MergeResponse::merged(report.merged)).into_response(),
        Err(e) => error_response(e.to_string()),
    }
}

pub async fn health(State(store): State<Arc<MergeStore>>) -> impl IntoResponse {
    match store.len().await {
        Ok(keys) => Json(HealthResponse { ok: true, keys }).into_response(),
        Err(e) => error_response(e.to_string()),
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn error_response(msg: String) -> axum::response::Response {
    error!(error = %msg, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"ok": false, "error": msg})),
    )
        .into_response()
}
