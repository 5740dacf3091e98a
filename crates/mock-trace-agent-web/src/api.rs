// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! REST API handlers

use crate::{log_and_create_json_response, AppState};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use mock_trace_agent::errors::QueryError;
use mock_trace_agent::parse_trace_id;
use mock_trace_agent::storage::{AggregatedTraceSummary, PayloadSummary, Statistics};
use std::sync::Arc;

pub async fn list_payloads(State(state): State<Arc<AppState>>) -> Json<Vec<PayloadSummary>> {
    Json(state.storage.list_payloads())
}

pub async fn get_payload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.storage.payload(&id) {
        Some(payload) => Json(payload).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn get_raw_bytes(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.storage.raw_bytes(&id) {
        Some(bytes) => attachment(
            "application/octet-stream",
            &format!("payload-{id}.bin"),
            Body::from(bytes),
        ),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn get_debug_json(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.storage.debug_json(&id) {
        Ok(json) => attachment(
            "application/json",
            &format!("payload-{id}.json"),
            Body::from(json),
        ),
        Err(QueryError::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(QueryError::Decode(e)) => log_and_create_json_response(
            &format!("Failed to convert payload {id} to JSON: {e}"),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    }
}

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<Statistics> {
    Json(state.storage.statistics())
}

pub async fn clear_all(State(state): State<Arc<AppState>>) -> Response {
    state.storage.clear_all();
    log_and_create_json_response("All data cleared successfully", StatusCode::OK)
}

pub async fn list_traces(State(state): State<Arc<AppState>>) -> Json<Vec<AggregatedTraceSummary>> {
    Json(state.storage.list_traces())
}

pub async fn get_trace(
    State(state): State<Arc<AppState>>,
    Path(trace_id): Path<String>,
) -> Response {
    match parse_trace_id(&trace_id).and_then(|id| state.storage.trace(id)) {
        Some(trace) => Json(trace).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn attachment(content_type: &str, file_name: &str, body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        body,
    )
        .into_response()
}
