//! Entitlement lifecycle jobs.
//!
//! # Stages
//!
//! - **Auto-Renewal**: extends `active` entitlements with auto-renew enabled
//!   that end within the next 24 hours, at the current catalog price
//!
//! - **Expiration Sweep**: marks `active`/`grace_period` entitlements whose
//!   end date has passed as `expired` and notifies their owners
//!
//! - **Renewal Reminders**: emails owners of entitlements ending in 7, 3 and
//!   1 days, skipping those that will auto-renew
//!
//! [`run_lifecycle`] runs the three stages in that order against a single
//! timestamp. With the `background-jobs` feature, [`JobScheduler`] triggers it
//! on a cron schedule.
//!
//! # Usage
//!
//! ```rust,ignore
//! use lifecycle::jobs::{JobConfig, JobScheduler, LifecycleContext};
//!
//! let ctx = LifecycleContext::from_config(config, db)?;
//! let scheduler = JobScheduler::new(ctx, JobConfig::default()).await?;
//! scheduler.start().await?;
//! ```

use std::sync::Arc;

use crate::config::{BrandingConfig, LifecycleConfig};
use crate::directory::UserDirectory;
use crate::errors::{LifecycleError, LifecycleResult};
use crate::notifications::EmailClient;
use crate::server::database::Database;

mod auto_renewal;
mod expiration;
mod lifecycle;
mod reminders;

#[cfg(feature = "background-jobs")]
mod scheduler;

pub use auto_renewal::{run_auto_renewals, RenewalOutcome, RENEWAL_WINDOW_HOURS};
pub use expiration::{run_expiration_sweep, ExpirationOutcome};
pub use lifecycle::{run_lifecycle, run_lifecycle_at, LifecycleReport, StageResult, StageResults};
pub use reminders::{run_renewal_reminders, ReminderOutcome, REMINDER_OFFSETS_DAYS};

#[cfg(feature = "background-jobs")]
pub use scheduler::{JobConfig, JobScheduler};

/// Everything a lifecycle stage needs: the store, the user directory, the
/// email sender and the branding used in templates.
#[derive(Debug, Clone)]
pub struct LifecycleContext {
    pub db: Arc<Database>,
    pub users: UserDirectory,
    pub mailer: EmailClient,
    pub branding: BrandingConfig,
}

impl LifecycleContext {
    pub fn new(
        db: Arc<Database>,
        users: UserDirectory,
        mailer: EmailClient,
        branding: BrandingConfig,
    ) -> Self {
        Self {
            db,
            users,
            mailer,
            branding,
        }
    }

    /// Wire up collaborators from configuration.
    pub fn from_config(config: &LifecycleConfig, db: Arc<Database>) -> LifecycleResult<Self> {
        let users = UserDirectory::from_config(&config.directory, Arc::clone(&db))?;
        let mailer = EmailClient::new(&config.email);
        Ok(Self::new(db, users, mailer, config.branding.clone()))
    }
}

/// Errors that abort a lifecycle stage or the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Job execution error: {0}")]
    ExecutionError(String),
}

impl From<LifecycleError> for JobError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::DatabaseError(msg) => JobError::DatabaseError(msg),
            other => JobError::ExecutionError(other.to_string()),
        }
    }
}

/// Distinct values in first-seen order.
fn distinct<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .map(|v| v.as_ref().to_string())
        .filter(|v| seen.insert(v.clone()))
        .collect()
}
