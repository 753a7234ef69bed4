//! `/status` and `/` HTTP handlers, assembling the health snapshot from
//! `StreamCore`, `FilterPipeline`, and the alert registry.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use serde_json::json;
use stream_protocol::{ConnectionSummary, EventSummary, FilterSummary, HealthStatus};

use crate::alerts::AlertRegistry;
use crate::sse_client::StreamCore;

pub struct HealthState {
    pub core: Arc<StreamCore>,
    pub filters: Arc<filter_pipeline::FilterPipeline>,
    pub alerts: Arc<AlertRegistry>,
}

pub async fn get_status(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    match build_status(&state) {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Failed to get status" })),
        )
            .into_response(),
    }
}

impl HealthState {
    /// Used by the dashboard hub to stamp the `state` message it sends on
    /// every new connection. Infallible in practice; `build_status`'s
    /// `Result` exists for the HTTP handler's error response shape.
    pub fn snapshot(&self) -> HealthStatus {
        build_status(self).expect("status computation does not fail")
    }
}

fn build_status(state: &HealthState) -> Result<HealthStatus, ()> {
    let stats = state.core.get_stats();
    let uptime = stats
        .start_time
        .map(|start| (Utc::now() - start).num_seconds().max(0) as u64)
        .unwrap_or(0);
    let rate = compute_rate(stats.total_events, uptime);

    let config = state.filters.get_config();

    Ok(HealthStatus {
        connection: ConnectionSummary {
            status: stats.connection_status,
            endpoint: stats.current_endpoint.map_or_else(|| "none".to_string(), |e| e.as_str().to_string()),
            uptime,
        },
        events: EventSummary {
            total: stats.total_events,
            delivered: stats.delivered_events,
            deduped: stats.deduped_events,
            rate,
        },
        alerts: state.alerts.summaries(),
        filters: FilterSummary {
            users: config.users,
            keywords: config.keywords,
        },
    })
}

/// `total / max(1, uptime)`, rounded to two decimal places.
fn compute_rate(total: u64, uptime: u64) -> f64 {
    ((total as f64 / uptime.max(1) as f64) * 100.0).round() / 100.0
}

pub async fn get_root() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "message": "stream engine is running" })),
    )
}
