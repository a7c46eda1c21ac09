//! HTTP route handlers for the scan API.

use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use scan::coordinator::{OrchestrationError, RunStateSnapshot};
use scan::core::batch::BatchConfig;
use scan::core::types::{RecordedResult, Severity};
use serde::Serialize;
use tracing::{info, warn};

use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/rules", get(list_rules))
        .route("/scan", post(start_scan))
        .route("/stop", post(stop_scan))
        .route("/status", get(get_status))
        .route("/results", get(get_results))
}

/// JSON error body: `{error, code, field?}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    field: Option<&'static str>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'a str>,
}

impl ApiError {
    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_config",
            message,
            field: None,
        }
    }
}

impl From<OrchestrationError> for ApiError {
    fn from(err: OrchestrationError) -> Self {
        let message = err.to_string();
        let code = err.code();
        match err {
            OrchestrationError::InvalidConfig(issue) => Self {
                status: StatusCode::BAD_REQUEST,
                code,
                message,
                field: Some(issue.field),
            },
            OrchestrationError::AlreadyRunning | OrchestrationError::NotRunning => Self {
                status: StatusCode::CONFLICT,
                code,
                message,
                field: None,
            },
            OrchestrationError::Spawn(_) | OrchestrationError::Panicked => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code,
                message,
                field: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: &self.message,
            code: self.code,
            field: self.field,
        };
        (self.status, Json(body)).into_response()
    }
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
pub struct RuleEntry {
    name: String,
    category: String,
    severity: Severity,
}

#[derive(Debug, Serialize)]
pub struct RulesResponse {
    rules: Vec<RuleEntry>,
    categories: Vec<String>,
}

/// GET /api/rules - the catalog batches are selected from.
async fn list_rules(State(state): State<AppState>) -> Json<RulesResponse> {
    let catalog = state.coordinator.catalog();
    let rules = catalog
        .cases()
        .iter()
        .map(|case| RuleEntry {
            name: case.name.clone(),
            category: case.category.clone(),
            severity: case.severity,
        })
        .collect();
    Json(RulesResponse {
        rules,
        categories: catalog.categories(),
    })
}

#[derive(Debug, Serialize)]
pub struct StartedResponse {
    status: &'static str,
    batch_id: String,
}

/// POST /api/scan - submit a batch.
async fn start_scan(
    State(state): State<AppState>,
    payload: Result<Json<BatchConfig>, JsonRejection>,
) -> Result<Json<StartedResponse>, ApiError> {
    let Json(config) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let handle = state.coordinator.submit_batch(config).map_err(|err| {
        warn!(code = err.code(), error = %err, "scan rejected");
        ApiError::from(err)
    })?;
    info!(batch_id = %handle.batch_id(), "scan accepted");
    Ok(Json(StartedResponse {
        status: "started",
        batch_id: handle.batch_id().to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    status: &'static str,
}

/// POST /api/stop - ask the running batch to stop before its next test case.
async fn stop_scan(State(state): State<AppState>) -> Result<Json<StopResponse>, ApiError> {
    state.coordinator.request_stop()?;
    Ok(Json(StopResponse {
        status: "stop_requested",
    }))
}

async fn get_status(State(state): State<AppState>) -> Json<RunStateSnapshot> {
    Json(state.coordinator.current_status())
}

/// GET /api/results - results of the live or most recent batch, in order.
async fn get_results(State(state): State<AppState>) -> Json<Vec<RecordedResult>> {
    Json(state.coordinator.current_results())
}
