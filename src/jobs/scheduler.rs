//! In-process cron trigger for the lifecycle run.

use tokio_cron_scheduler::{Job, JobScheduler as TokioJobScheduler};
use tracing::{error, info, warn};

use crate::config::JobsConfig;

use super::{run_lifecycle, JobError, LifecycleContext, LifecycleReport};

/// Configuration for background jobs.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Cron expression for the lifecycle run (default: daily at 02:00 UTC)
    pub lifecycle_cron: String,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            lifecycle_cron: JobsConfig::default().lifecycle_cron,
        }
    }
}

impl From<&JobsConfig> for JobConfig {
    fn from(config: &JobsConfig) -> Self {
        Self {
            lifecycle_cron: config.lifecycle_cron.clone(),
        }
    }
}

/// Background job scheduler for the entitlement lifecycle.
pub struct JobScheduler {
    scheduler: TokioJobScheduler,
    ctx: LifecycleContext,
    config: JobConfig,
}

impl JobScheduler {
    /// Create a new job scheduler.
    pub async fn new(ctx: LifecycleContext, config: JobConfig) -> Result<Self, JobError> {
        let scheduler = TokioJobScheduler::new()
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        Ok(Self {
            scheduler,
            ctx,
            config,
        })
    }

    /// Register the lifecycle job and start ticking.
    pub async fn start(&self) -> Result<(), JobError> {
        info!("Starting lifecycle job scheduler");

        self.add_lifecycle_job().await?;

        self.scheduler
            .start()
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        info!("Lifecycle job scheduler started successfully");

        Ok(())
    }

    /// Stop the job scheduler.
    pub async fn shutdown(&mut self) -> Result<(), JobError> {
        info!("Shutting down lifecycle job scheduler");
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;
        Ok(())
    }

    async fn add_lifecycle_job(&self) -> Result<(), JobError> {
        let ctx = self.ctx.clone();

        let job = Job::new_async(self.config.lifecycle_cron.as_str(), move |_uuid, _l| {
            let ctx = ctx.clone();
            Box::pin(async move {
                let report = run_lifecycle(&ctx).await;
                log_report(&report);
            })
        })
        .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        info!(
            "Added entitlement lifecycle job (schedule: {})",
            self.config.lifecycle_cron
        );

        Ok(())
    }

    /// Run the lifecycle immediately (useful for testing or manual triggers).
    pub async fn run_lifecycle_now(&self) -> LifecycleReport {
        run_lifecycle(&self.ctx).await
    }
}

fn log_report(report: &LifecycleReport) {
    let results = &report.results;
    if report.success {
        info!(
            auto_renewals = %results.auto_renewals.message,
            expirations = %results.expirations.message,
            reminders = %results.reminders.message,
            "Scheduled lifecycle run complete"
        );
        for (stage, result) in [
            ("auto-renewal", &results.auto_renewals),
            ("expiration", &results.expirations),
            ("reminder", &results.reminders),
        ] {
            if !result.success {
                warn!(stage, message = %result.message, "Lifecycle stage reported failure");
            }
        }
    } else {
        error!(
            error = report.error.as_deref().unwrap_or_default(),
            "Scheduled lifecycle run aborted"
        );
    }
}
