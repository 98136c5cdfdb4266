//! Demonstration HTTP handlers: liveness, stats, and the JSON admin surface
//! spec §6 calls out as ambient ("not the production HTTP router the spec
//! scopes out"). Segment/playlist bytes themselves are served by
//! `tower_http::services::ServeDir` mounted in `http::mod`, not handled here.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

pub async fn version_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "online",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Serialize)]
pub struct ActiveStreamInfo {
    pub identity: String,
    pub is_published: bool,
    pub source_id: u64,
    pub consumer_count: usize,
    pub packagers: Vec<&'static str>,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub uptime_secs: u64,
    pub stream_count: usize,
    pub hook_deliveries: u64,
    pub streams: Vec<ActiveStreamInfo>,
}

/// `GET /stats` — JSON dump of active stream identities, consumer counts,
/// and which packagers each one has wired, per SPEC_FULL.md's ambient
/// external-interfaces addition.
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    state.metrics.record_request("/stats");
    let mut streams = Vec::new();
    for identity in state.sources.identities() {
        if let Some(source) = state.sources.fetch(&identity).await {
            streams.push(ActiveStreamInfo {
                identity: identity.to_string(),
                is_published: source.is_published(),
                source_id: source.source_id(),
                consumer_count: source.consumer_count(),
                packagers: source.packagers().iter().map(|p| p.kind().as_str()).collect(),
            });
        }
    }
    Json(StatsResponse {
        uptime_secs: state.metrics.uptime_secs(),
        stream_count: streams.len(),
        hook_deliveries: state.metrics.hook_deliveries(),
        streams,
    })
}
