//! Lifecycle orchestration.
//!
//! Runs auto-renewal, then expiration, then reminders. Renewals go first so
//! an entitlement that renews today is never swept as expired in the same
//! run.

use std::future::Future;

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use super::{
    run_auto_renewals, run_expiration_sweep, run_renewal_reminders, JobError, LifecycleContext,
};

/// Outcome of one stage within a lifecycle run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageResult {
    pub success: bool,
    pub message: String,
}

impl StageResult {
    fn ok(message: String) -> Self {
        Self {
            success: true,
            message,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            message,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResults {
    pub auto_renewals: StageResult,
    pub expirations: StageResult,
    pub reminders: StageResult,
}

/// Aggregate report of a lifecycle run.
///
/// `error` is set only when a stage aborted and the run stopped early; stages
/// that did not run keep their default `{success: false, message: ""}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleReport {
    pub success: bool,
    pub results: StageResults,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Run a stage on its own task so a panic surfaces as an abort, not a crash.
async fn run_stage<Fut>(name: &'static str, stage: Fut) -> Result<StageResult, String>
where
    Fut: Future<Output = Result<String, JobError>> + Send + 'static,
{
    match tokio::spawn(stage).await {
        Ok(Ok(message)) => Ok(StageResult::ok(message)),
        Ok(Err(e)) => {
            error!(stage = name, error = %e, "Lifecycle stage failed");
            Ok(StageResult::failed(e.to_string()))
        }
        Err(e) => {
            error!(stage = name, error = %e, "Lifecycle stage aborted");
            Err(format!("{name} stage aborted: {e}"))
        }
    }
}

/// Run all three stages against the current time.
pub async fn run_lifecycle(ctx: &LifecycleContext) -> LifecycleReport {
    run_lifecycle_at(ctx, Utc::now().naive_utc()).await
}

/// Run all three stages against a fixed `now`.
pub async fn run_lifecycle_at(ctx: &LifecycleContext, now: NaiveDateTime) -> LifecycleReport {
    info!("Starting entitlement lifecycle processing at {}", now);

    let mut report = LifecycleReport::default();

    info!("Step 1: Processing auto-renewals");
    let stage_ctx = ctx.clone();
    let stage = async move {
        run_auto_renewals(&stage_ctx, now)
            .await
            .map(|outcome| outcome.message())
    };
    match run_stage("auto-renewal", stage).await {
        Ok(result) => report.results.auto_renewals = result,
        Err(e) => return aborted(report, e),
    }

    info!("Step 2: Expiring past-due entitlements");
    let stage_ctx = ctx.clone();
    let stage = async move {
        run_expiration_sweep(&stage_ctx, now)
            .await
            .map(|outcome| outcome.message())
    };
    match run_stage("expiration", stage).await {
        Ok(result) => report.results.expirations = result,
        Err(e) => return aborted(report, e),
    }

    info!("Step 3: Sending renewal reminders");
    let stage_ctx = ctx.clone();
    let stage = async move {
        run_renewal_reminders(&stage_ctx, now)
            .await
            .map(|outcome| outcome.message())
    };
    match run_stage("reminder", stage).await {
        Ok(result) => report.results.reminders = result,
        Err(e) => return aborted(report, e),
    }

    info!("Entitlement lifecycle processing complete");

    report.success = true;
    report.message = Some("Entitlement lifecycle processing complete".to_string());
    report
}

fn aborted(mut report: LifecycleReport, error: String) -> LifecycleReport {
    report.success = false;
    report.error = Some(error);
    report
}
