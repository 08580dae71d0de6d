//! Controller status endpoints.
//!
//! `GET /status` returns the last published controller state (with the
//! supervisor configuration masked) plus the most recent cycle reports.
//! `GET /status/history?limit=N` returns up to `N` cycle reports.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Json, Response},
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::headers::{compute_etag, http_date, if_none_match_matches};
use crate::config::Config;
use crate::history::{CycleReport, DEFAULT_CAPACITY};
use crate::scheduler::StatusFeed;
use crate::state::DeploymentState;

/// Cycle reports embedded in `GET /status`.
const STATUS_RECENT_CYCLES: usize = 10;
const HISTORY_DEFAULT_LIMIT: usize = 20;

pub type StatusState = Arc<StatusApiState>;

#[derive(Clone)]
pub struct StatusApiState {
    pub feed: StatusFeed,
    pub monitoring: MonitoringSettings,
}

/// The static half of the status payload, copied from [`Config`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSettings {
    pub active: bool,
    pub check_interval_minutes: u64,
    pub auto_disable: bool,
    pub healthy_cycles_before_disable: u32,
    pub supervisor_tag: String,
}

impl From<&Config> for MonitoringSettings {
    fn from(config: &Config) -> Self {
        Self {
            active: config.is_active,
            check_interval_minutes: config.check_interval_minutes,
            auto_disable: config.auto_disable,
            healthy_cycles_before_disable: config.healthy_cycles_before_disable,
            supervisor_tag: config.supervisor_tag(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub monitoring: MonitoringSettings,
    pub disabled: bool,
    pub deployment_state: DeploymentState,
    pub consecutive_healthy_cycles: u32,
    pub config: BTreeMap<String, String>,
    pub last_saved: Option<DateTime<Utc>>,
    pub latest_cycle: Option<CycleReport>,
    pub recent_cycles: Vec<CycleReport>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub count: usize,
    pub cycles: Vec<CycleReport>,
}

fn internal_error(context: &str, err: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": format!("{}: {}", context, err) })),
    )
}

pub async fn status(
    State(state): State<StatusState>,
    request_headers: HeaderMap,
) -> Result<Response, (StatusCode, Json<Value>)> {
    let controller = state.feed.state.read().await.clone();
    let (latest_cycle, recent_cycles) = {
        let history = state.feed.history.read().await;
        (history.latest().cloned(), history.last_n(STATUS_RECENT_CYCLES))
    };

    let last_saved = match controller.timestamp {
        0 => None,
        secs => Utc.timestamp_opt(secs, 0).single(),
    };
    let payload = StatusResponse {
        monitoring: state.monitoring.clone(),
        disabled: controller.is_disabled,
        deployment_state: controller.deployment_state,
        consecutive_healthy_cycles: controller.consecutive_healthy_cycles,
        config: controller.config_cache.masked(),
        last_saved,
        latest_cycle,
        recent_cycles,
    };

    let body = serde_json::to_vec(&payload)
        .map_err(|err| internal_error("Failed to serialize status", err))?;
    let etag = compute_etag(&body);

    let mut response = Response::builder()
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::ETAG, etag.as_str());
    if let Some(value) = payload
        .latest_cycle
        .as_ref()
        .and_then(|report| http_date(report.started_at))
    {
        response = response.header(header::LAST_MODIFIED, value);
    }

    let response = if if_none_match_matches(&request_headers, &etag) {
        response.status(StatusCode::NOT_MODIFIED).body(Body::empty())
    } else {
        response
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
    };
    response.map_err(|err| internal_error("Failed to build status response", err))
}

pub async fn history(
    State(state): State<StatusState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, (StatusCode, Json<Value>)> {
    let limit = params.limit.unwrap_or(HISTORY_DEFAULT_LIMIT);
    if limit == 0 || limit > DEFAULT_CAPACITY {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": format!("limit must be between 1 and {}", DEFAULT_CAPACITY)
            })),
        ));
    }

    let cycles = state.feed.history.read().await.last_n(limit);
    Ok(Json(HistoryResponse {
        count: cycles.len(),
        cycles,
    }))
}
