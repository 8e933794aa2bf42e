//! Axum handlers for the operational surface: health, manual job triggers,
//! campaign history and admin actions.
//!
//! Authentication happens in front of this service; the admin routes assume
//! the caller has already been authorised.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::admin::CampaignAdmin;
use crate::campaign::{Campaign, NewCampaign};
use crate::errors::LifecycleError;
use crate::jobs::{JobExecutionResult, JobKind, JobOrchestrator};
use crate::repository::{CampaignRepository, StatusHistoryRecord};

pub struct ApiState<R> {
    pub repo: Arc<R>,
    pub orchestrator: Arc<JobOrchestrator<R>>,
    pub admin: Arc<CampaignAdmin<R>>,
}

pub fn router<R: CampaignRepository>(state: Arc<ApiState<R>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/campaigns/:id/history", get(get_campaign_history::<R>))
        .route("/admin/jobs/run", post(run_all_jobs::<R>))
        .route("/admin/jobs/last", get(get_last_results::<R>))
        .route("/admin/jobs/:job/run", post(run_job::<R>))
        .route("/admin/campaigns", post(create_campaign::<R>))
        .route("/admin/campaigns/:id/approve", post(approve_campaign::<R>))
        .route("/admin/campaigns/:id/reject", post(reject_campaign::<R>))
        .route("/admin/campaigns/:id/cancel", post(cancel_campaign::<R>))
        .route("/admin/campaigns/:id/extend", post(extend_campaign::<R>))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub campaign_id: i64,
    pub count: usize,
    pub history: Vec<StatusHistoryRecord>,
}

#[derive(Serialize)]
pub struct LastResultsResponse {
    pub count: usize,
    pub jobs: Vec<JobExecutionResult>,
    /// Jobs with a run in progress right now.
    pub running: Vec<JobKind>,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobRunResponse {
    Completed(JobExecutionResult),
    Skipped { job: JobKind },
}

#[derive(Deserialize)]
pub struct ExtendRequest {
    pub new_end_date: NaiveDate,
}

fn error_response(error: LifecycleError) -> Response {
    let status = match &error {
        e if e.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
        LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
        LifecycleError::Conflict { .. } => StatusCode::CONFLICT,
        LifecycleError::JobTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn campaign_response(outcome: crate::errors::Result<Campaign>) -> Response {
    match outcome {
        Ok(campaign) => (StatusCode::OK, Json(campaign)).into_response(),
        Err(e) => error_response(e),
    }
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /campaigns/:id/history`
///
/// Returns every recorded status change of the campaign, oldest first.
pub async fn get_campaign_history<R: CampaignRepository>(
    State(state): State<Arc<ApiState<R>>>,
    Path(campaign_id): Path<i64>,
) -> Response {
    match state.repo.status_history(campaign_id).await {
        Ok(history) => (
            StatusCode::OK,
            Json(HistoryResponse {
                campaign_id,
                count: history.len(),
                history,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /admin/jobs/run`
///
/// Runs activation, completion and expiration concurrently and returns the summary.
pub async fn run_all_jobs<R: CampaignRepository>(
    State(state): State<Arc<ApiState<R>>>,
) -> Response {
    let summary = state.orchestrator.run_all_jobs().await;
    (StatusCode::OK, Json(summary)).into_response()
}

/// `POST /admin/jobs/:job/run`
pub async fn run_job<R: CampaignRepository>(
    State(state): State<Arc<ApiState<R>>>,
    Path(job): Path<String>,
) -> Response {
    let Some(kind) = JobKind::from_slug(&job) else {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("unknown job '{job}'"),
            }),
        )
            .into_response();
    };

    match state.orchestrator.run_job(kind).await {
        Ok(Some(result)) => {
            (StatusCode::OK, Json(JobRunResponse::Completed(result))).into_response()
        }
        Ok(None) => (
            StatusCode::ACCEPTED,
            Json(JobRunResponse::Skipped { job: kind }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /admin/jobs/last`
pub async fn get_last_results<R: CampaignRepository>(
    State(state): State<Arc<ApiState<R>>>,
) -> Response {
    let jobs = state.orchestrator.last_results().await;
    let running = JobKind::ALL
        .into_iter()
        .filter(|kind| state.orchestrator.is_running(*kind))
        .collect();
    (
        StatusCode::OK,
        Json(LastResultsResponse {
            count: jobs.len(),
            jobs,
            running,
        }),
    )
        .into_response()
}

/// `POST /admin/campaigns`
pub async fn create_campaign<R: CampaignRepository>(
    State(state): State<Arc<ApiState<R>>>,
    Json(input): Json<NewCampaign>,
) -> Response {
    match state.admin.create(input).await {
        Ok(campaign) => (StatusCode::CREATED, Json(campaign)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /admin/campaigns/:id/approve`
pub async fn approve_campaign<R: CampaignRepository>(
    State(state): State<Arc<ApiState<R>>>,
    Path(id): Path<i64>,
) -> Response {
    campaign_response(state.admin.approve(id).await)
}

/// `POST /admin/campaigns/:id/reject`
pub async fn reject_campaign<R: CampaignRepository>(
    State(state): State<Arc<ApiState<R>>>,
    Path(id): Path<i64>,
) -> Response {
    campaign_response(state.admin.reject(id).await)
}

/// `POST /admin/campaigns/:id/cancel`
pub async fn cancel_campaign<R: CampaignRepository>(
    State(state): State<Arc<ApiState<R>>>,
    Path(id): Path<i64>,
) -> Response {
    campaign_response(state.admin.cancel(id).await)
}

/// `POST /admin/campaigns/:id/extend`
pub async fn extend_campaign<R: CampaignRepository>(
    State(state): State<Arc<ApiState<R>>>,
    Path(id): Path<i64>,
    Json(request): Json<ExtendRequest>,
) -> Response {
    campaign_response(state.admin.extend_fundraising(id, request.new_end_date).await)
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
