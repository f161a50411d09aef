use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::jobs::{
    run_auto_renewals, run_expiration_sweep, run_lifecycle, run_renewal_reminders,
    ExpirationOutcome, LifecycleContext, ReminderOutcome, RenewalOutcome,
};
use crate::server::api_error::{ApiError, ErrorCode};
use crate::server::auth::{AuthState, CronCaller};
use crate::server::logging::HealthResponse;

/// Shared application state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub ctx: LifecycleContext,
    pub auth: AuthState,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Body of a single-stage trigger response: `success`, the stage counts and
/// a summary message.
#[derive(Debug, Serialize)]
pub struct StageResponse<T: Serialize> {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: T,
    pub message: String,
}

impl<T: Serialize> StageResponse<T> {
    fn ok(outcome: T, message: String) -> Json<Self> {
        Json(Self {
            success: true,
            outcome,
            message,
        })
    }
}

/// `POST /process-entitlement-lifecycle`
///
/// Runs auto-renewal, expiration and reminders in order. Answers 500 only
/// when a stage aborted the run; ordinary stage failures are reported in
/// `results` with a 200.
pub async fn process_lifecycle_handler(
    _caller: CronCaller,
    State(state): State<AppState>,
) -> Response {
    let report = run_lifecycle(&state.ctx).await;

    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (status, Json(report)).into_response()
}

/// `POST /expire-entitlements`
pub async fn expire_entitlements_handler(
    _caller: CronCaller,
    State(state): State<AppState>,
) -> Result<Json<StageResponse<ExpirationOutcome>>, ApiError> {
    let outcome = run_expiration_sweep(&state.ctx, Utc::now().naive_utc()).await?;
    info!(expired = outcome.expired, emails_sent = outcome.emails_sent, "Expiration sweep triggered");
    Ok(StageResponse::ok(outcome, outcome.message()))
}

/// `POST /send-renewal-reminders`
pub async fn send_renewal_reminders_handler(
    _caller: CronCaller,
    State(state): State<AppState>,
) -> Result<Json<StageResponse<ReminderOutcome>>, ApiError> {
    let outcome = run_renewal_reminders(&state.ctx, Utc::now().naive_utc()).await?;
    Ok(StageResponse::ok(outcome, outcome.message()))
}

/// `POST /process-auto-renewals`
pub async fn process_auto_renewals_handler(
    _caller: CronCaller,
    State(state): State<AppState>,
) -> Result<Json<StageResponse<RenewalOutcome>>, ApiError> {
    let outcome = run_auto_renewals(&state.ctx, Utc::now().naive_utc()).await?;
    Ok(StageResponse::ok(outcome, outcome.message()))
}

/// `GET /health`
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connected = state.ctx.db.ping().await;
    Json(HealthResponse::from_probe(connected, state.ctx.db.db_type()))
}

/// Fallback for unknown routes.
pub async fn not_found_handler() -> ApiError {
    ApiError::new(ErrorCode::NotFound)
}
