//! Renewal reminders at fixed offsets before expiry.

use chrono::{Datelike, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::entitlement::{calendar_day_window, Entitlement};
use crate::notifications::templates;
use crate::server::logging::{log_entitlement_event, EntitlementEvent};

use super::{distinct, JobError, LifecycleContext};

/// Days before `end_date` at which a reminder goes out, in processing order.
pub const REMINDER_OFFSETS_DAYS: [i64; 3] = [7, 3, 1];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderOutcome {
    pub reminders_sent: u64,
}

impl ReminderOutcome {
    pub fn message(&self) -> String {
        format!("Sent {} renewal reminder emails", self.reminders_sent)
    }
}

/// Email owners of `active` entitlements ending on the UTC calendar day
/// 7, 3 or 1 days from `now`.
///
/// Entitlements with auto-renew enabled are skipped, as are rows that cannot
/// be parsed. A failed query only skips its own offset. Nothing records that a reminder was sent, so a
/// second run over the same day sends again.
pub async fn run_renewal_reminders(
    ctx: &LifecycleContext,
    now: NaiveDateTime,
) -> Result<ReminderOutcome, JobError> {
    let mut outcome = ReminderOutcome::default();

    for days in REMINDER_OFFSETS_DAYS {
        let (day_start, day_end) = calendar_day_window(now, days);

        let expiring = match ctx.db.find_active_expiring_between(day_start, day_end).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(days, error = %e, "Failed to fetch entitlements for reminder window");
                continue;
            }
        };

        for row in &expiring.unreadable {
            warn!(
                entitlement_id = %row.id,
                reason = %row.reason,
                "Skipping reminder for unreadable entitlement"
            );
        }

        let due: Vec<&Entitlement> = expiring
            .entitlements
            .iter()
            .filter(|e| {
                if e.auto_renew {
                    debug!("Skipping {} - auto_renew enabled", e.id);
                }
                !e.auto_renew
            })
            .collect();

        if due.is_empty() {
            debug!("No entitlements expiring in {} days", days);
            continue;
        }

        info!("Found {} entitlements expiring in {} days", due.len(), days);

        outcome.reminders_sent += send_reminders(ctx, &due, days, now).await;
    }

    info!("Sent {} reminder emails", outcome.reminders_sent);

    Ok(outcome)
}

async fn send_reminders(
    ctx: &LifecycleContext,
    due: &[&Entitlement],
    days: i64,
    now: NaiveDateTime,
) -> u64 {
    let users = ctx
        .users
        .resolve_users(&distinct(due.iter().map(|e| &e.user_id)))
        .await;

    let features = ctx
        .db
        .get_features(&distinct(due.iter().map(|e| &e.feature_key)))
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Feature lookup failed; using feature keys as names");
            Default::default()
        });

    let mut sent = 0;
    for entitlement in due {
        let Some(user) = users.get(&entitlement.user_id) else {
            continue;
        };
        let Some(email) = user.email() else {
            continue;
        };

        let feature_name = features
            .get(&entitlement.feature_key)
            .map(|f| f.feature_name.as_str())
            .unwrap_or(&entitlement.feature_key);

        let message = templates::renewal_reminder(
            &ctx.branding,
            &user.display_name(),
            feature_name,
            entitlement.price_at_purchase.unwrap_or(0),
            entitlement.billing_period,
            days,
            now.year(),
        );

        if ctx.mailer.send(email, &message.subject, &message.html).await {
            sent += 1;
            log_entitlement_event(
                EntitlementEvent::ReminderSent,
                &entitlement.id,
                Some(&format!("days_until_expiry={days}")),
            );
        }
    }

    sent
}
