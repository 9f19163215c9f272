//! REST handlers for campaign dispatch and operational endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use campaign_core::{
    CampaignError, CampaignProgress, DispatchRequest, DispatchSummary, InMemoryProgressStore,
};
use campaign_dispatch::{DispatchControl, Dispatcher};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// The store the dispatcher writes progress to.
    pub progress: Arc<InMemoryProgressStore>,
    /// Controls of the dispatches currently running.
    pub running: Arc<DashMap<String, DispatchControl>>,
    pub node_id: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        progress: Arc<InMemoryProgressStore>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            progress,
            running: Arc::new(DashMap::new()),
            node_id: node_id.into(),
            start_time: Instant::now(),
        }
    }
}

/// Error body: `{"success": false, "error": ..., "campaignId": ...}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub campaign_id: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, campaign_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                success: false,
                error: error.into(),
                campaign_id,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Drops the running-dispatch entry when the dispatch finishes, whether
/// it succeeded or not.
struct RunningGuard {
    running: Arc<DashMap<String, DispatchControl>>,
    campaign_id: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.remove(&self.campaign_id);
    }
}

/// POST /v1/campaigns/dispatch: run a dispatch to completion.
///
/// The dispatch runs on its own task, so a client that disconnects does
/// not stop it; the campaign stays registered until it finishes.
pub async fn handle_dispatch(
    State(state): State<AppState>,
    payload: Result<Json<DispatchRequest>, JsonRejection>,
) -> Result<Json<DispatchSummary>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        warn!(error = %e, "Malformed dispatch request");
        metrics::counter!("api.validation_errors").increment(1);
        ApiError::new(StatusCode::BAD_REQUEST, None, e.body_text())
    })?;
    let campaign_id = request.campaign_id.clone();

    if let Err(e) = request.validate(state.dispatcher.config()) {
        warn!(campaign_id = %campaign_id, error = %e, "Dispatch request validation failed");
        metrics::counter!("api.validation_errors").increment(1);
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            Some(campaign_id),
            e.to_string(),
        ));
    }

    let control = DispatchControl::new();
    match state.running.entry(campaign_id.clone()) {
        Entry::Occupied(_) => {
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                Some(campaign_id.clone()),
                format!("Campaign {campaign_id} is already dispatching"),
            ));
        }
        Entry::Vacant(slot) => {
            slot.insert(control.clone());
        }
    }
    let guard = RunningGuard {
        running: state.running.clone(),
        campaign_id: campaign_id.clone(),
    };

    info!(
        campaign_id = %campaign_id,
        emails = request.prepared_emails.len(),
        "Dispatch request accepted"
    );

    let dispatcher = state.dispatcher.clone();
    let run = tokio::spawn(async move {
        let _guard = guard;
        dispatcher.dispatch_with_control(request, control).await
    });
    match run.await {
        Ok(Ok(summary)) => Ok(Json(summary)),
        Ok(Err(e)) => Err(dispatch_error(campaign_id, e)),
        Err(e) => Err(dispatch_error(campaign_id, CampaignError::Internal(e.into()))),
    }
}

fn dispatch_error(campaign_id: String, e: CampaignError) -> ApiError {
    if e.is_client_error() {
        metrics::counter!("api.validation_errors").increment(1);
        let status = match &e {
            CampaignError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        };
        ApiError::new(status, Some(campaign_id), e.to_string())
    } else {
        error!(campaign_id = %campaign_id, error = %e, "Dispatch failed");
        metrics::counter!("api.errors").increment(1);
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            Some(campaign_id),
            "Internal dispatch error",
        )
    }
}

/// GET /v1/campaigns/:campaign_id/progress
pub async fn handle_progress(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> Result<Json<CampaignProgress>, ApiError> {
    state.progress.get(&campaign_id).map(Json).ok_or_else(|| {
        ApiError::new(
            StatusCode::NOT_FOUND,
            Some(campaign_id.clone()),
            format!("No progress recorded for campaign {campaign_id}"),
        )
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    pub success: bool,
    pub campaign_id: String,
    pub paused: bool,
    pub cancelled: bool,
}

impl ControlResponse {
    fn accepted(campaign_id: String, control: &DispatchControl) -> (StatusCode, Json<Self>) {
        (
            StatusCode::ACCEPTED,
            Json(Self {
                success: true,
                campaign_id,
                paused: control.is_paused(),
                cancelled: control.is_cancelled(),
            }),
        )
    }
}

fn running_control(state: &AppState, campaign_id: &str) -> Result<DispatchControl, ApiError> {
    state
        .running
        .get(campaign_id)
        .map(|c| c.value().clone())
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                Some(campaign_id.to_string()),
                format!("Campaign {campaign_id} is not dispatching"),
            )
        })
}

/// POST /v1/campaigns/:campaign_id/cancel: stop a running dispatch before
/// its next batches.
pub async fn handle_cancel(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> Result<(StatusCode, Json<ControlResponse>), ApiError> {
    let control = running_control(&state, &campaign_id)?;
    control.cancel();
    info!(campaign_id = %campaign_id, "Dispatch cancellation requested");
    metrics::counter!("api.cancellations").increment(1);

    Ok(ControlResponse::accepted(campaign_id, &control))
}

/// POST /v1/campaigns/:campaign_id/pause: hold a running dispatch after
/// its in-flight batches.
pub async fn handle_pause(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> Result<(StatusCode, Json<ControlResponse>), ApiError> {
    let control = running_control(&state, &campaign_id)?;
    if control.pause() {
        info!(campaign_id = %campaign_id, "Dispatch paused");
    }
    Ok(ControlResponse::accepted(campaign_id, &control))
}

/// POST /v1/campaigns/:campaign_id/resume
pub async fn handle_resume(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> Result<(StatusCode, Json<ControlResponse>), ApiError> {
    let control = running_control(&state, &campaign_id)?;
    if control.resume() {
        info!(campaign_id = %campaign_id, "Dispatch resumed");
    }
    Ok(ControlResponse::accepted(campaign_id, &control))
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        running_campaigns: state.running.len(),
        account_types: state.dispatcher.registry().account_types(),
    })
}

/// GET /ready: ready once at least one transport is registered.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.dispatcher.registry().account_types().is_empty() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// GET /live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub running_campaigns: usize,
    pub account_types: Vec<String>,
}
