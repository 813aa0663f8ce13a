use std::sync::Arc;

use axum::{Json, extract::State};
use serde::Serialize;

use super::AppState;
use crate::{common::types::CallId, engine::StatsSnapshot};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u64,
    pub active_calls: usize,
    pub calls: Vec<CallHealth>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHealth {
    pub call_id: CallId,
    pub running: bool,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let mut calls: Vec<CallHealth> = state
        .calls
        .iter()
        .map(|entry| CallHealth {
            call_id: entry.key().clone(),
            running: entry.value().is_running(),
            stats: entry.value().stats(),
        })
        .collect();
    calls.sort_by(|a, b| a.call_id.0.cmp(&b.call_id.0));

    Json(HealthResponse {
        status: "ok",
        uptime_ms: state.started_at.elapsed().as_millis() as u64,
        active_calls: calls.len(),
        calls,
    })
}
