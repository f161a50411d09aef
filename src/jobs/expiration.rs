//! Expiration sweep.
//!
//! Marks entitlements that are still `active` or `grace_period` after their
//! end date as `expired`, then tells each owner their add-on has lapsed.

use chrono::{Datelike, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::notifications::templates;
use crate::server::logging::{log_entitlement_event, EntitlementEvent};

use super::{distinct, JobError, LifecycleContext};

struct LapsedRow<'a> {
    id: &'a str,
    user_id: &'a str,
    feature_key: &'a str,
    end_date: NaiveDateTime,
}

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirationOutcome {
    pub expired: u64,
    pub emails_sent: u64,
}

impl ExpirationOutcome {
    pub fn message(&self) -> String {
        if self.expired == 0 {
            "No expired entitlements found".to_string()
        } else {
            format!("Expired {} entitlements", self.expired)
        }
    }
}

/// Expire lapsed entitlements and notify their owners.
///
/// Queries for entitlements where:
/// - `status IN ('active', 'grace_period')`
/// - `end_date < now`
///
/// All matches are updated in one statement before any email goes out,
/// including rows whose status or billing period cannot be parsed. A failed
/// selection or update aborts the stage; notification problems never do.
pub async fn run_expiration_sweep(
    ctx: &LifecycleContext,
    now: NaiveDateTime,
) -> Result<ExpirationOutcome, JobError> {
    debug!("Checking for lapsed entitlements at {}", now);

    let lapsed = ctx.db.find_lapsed_entitlements(now).await?;
    if lapsed.is_empty() {
        info!("No expired entitlements found");
        return Ok(ExpirationOutcome::default());
    }

    info!("Found {} lapsed entitlements", lapsed.len());
    if !lapsed.unreadable.is_empty() {
        warn!(
            count = lapsed.unreadable.len(),
            "Expiring unreadable entitlement rows by id"
        );
    }

    ctx.db.mark_expired(&lapsed.ids(), now).await?;

    // Expiry needs only identity columns, so unreadable rows are handled alongside.
    let rows: Vec<LapsedRow<'_>> = lapsed
        .entitlements
        .iter()
        .map(|e| LapsedRow {
            id: &e.id,
            user_id: &e.user_id,
            feature_key: &e.feature_key,
            end_date: e.end_date,
        })
        .chain(lapsed.unreadable.iter().map(|u| LapsedRow {
            id: &u.id,
            user_id: &u.user_id,
            feature_key: &u.feature_key,
            end_date: u.end_date,
        }))
        .collect();

    for row in &rows {
        log_entitlement_event(
            EntitlementEvent::Expired,
            row.id,
            Some(&format!(
                "user={} feature={} end_date={}",
                row.user_id, row.feature_key, row.end_date
            )),
        );
    }

    let mut outcome = ExpirationOutcome {
        expired: rows.len() as u64,
        emails_sent: 0,
    };

    let users = ctx
        .users
        .resolve_users(&distinct(rows.iter().map(|r| r.user_id)))
        .await;

    let features = match ctx
        .db
        .get_features(&distinct(rows.iter().map(|r| r.feature_key)))
        .await
    {
        Ok(features) => features,
        Err(e) => {
            warn!(error = %e, "Feature lookup failed; skipping expiration emails");
            return Ok(outcome);
        }
    };

    let year = now.year();
    for row in &rows {
        let Some(user) = users.get(row.user_id) else {
            continue;
        };
        let Some(email) = user.email() else {
            continue;
        };

        let feature_name = features
            .get(row.feature_key)
            .map(|f| f.feature_name.as_str())
            .unwrap_or(row.feature_key);

        let message =
            templates::subscription_expired(&ctx.branding, &user.display_name(), feature_name, year);

        if ctx.mailer.send(email, &message.subject, &message.html).await {
            outcome.emails_sent += 1;
        }
    }

    info!(
        "Expired {} entitlements, sent {} emails",
        outcome.expired, outcome.emails_sent
    );

    Ok(outcome)
}
