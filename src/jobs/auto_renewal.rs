//! Auto-renewal processing.
//!
//! Extends `active` entitlements that opted into auto-renew and end within
//! the next 24 hours. The renewed window starts where the old one ended and
//! is priced from the current catalog, not from `price_at_purchase`.
//!
//! No payment is collected here. The entitlement is extended directly and
//! `price_at_purchase` records what would have been charged.

use chrono::{Datelike, Duration, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::entitlement::Entitlement;
use crate::notifications::templates;
use crate::server::logging::{log_entitlement_event, EntitlementEvent};

use super::{distinct, JobError, LifecycleContext};

/// How far ahead of `end_date` an entitlement becomes due for renewal.
pub const RENEWAL_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenewalOutcome {
    pub renewed: u64,
    pub failed: u64,
}

impl RenewalOutcome {
    pub fn message(&self) -> String {
        if self.renewed == 0 && self.failed == 0 {
            "No entitlements due for auto-renewal".to_string()
        } else {
            format!(
                "Auto-renewed {} entitlements, {} failed",
                self.renewed, self.failed
            )
        }
    }
}

/// New `(start_date, end_date)` for one renewal of `entitlement`.
pub fn renewal_window(entitlement: &Entitlement) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let start = entitlement.end_date;
    let end = entitlement.billing_period.advance(start)?;
    Some((start, end))
}

/// Renew every auto-renew entitlement ending in `[now, now + 24h]`.
///
/// Rows that cannot be parsed, whose user or catalog entry cannot be found,
/// whose current catalog price is missing or not positive, or whose update
/// fails are counted as `failed`; the batch continues.
pub async fn run_auto_renewals(
    ctx: &LifecycleContext,
    now: NaiveDateTime,
) -> Result<RenewalOutcome, JobError> {
    let horizon = now + Duration::hours(RENEWAL_WINDOW_HOURS);
    debug!("Checking for auto-renewals between {} and {}", now, horizon);

    let due = ctx.db.find_auto_renewable(now, horizon).await?;
    if due.is_empty() {
        info!("No entitlements due for auto-renewal");
        return Ok(RenewalOutcome::default());
    }

    info!("Found {} entitlements for auto-renewal", due.len());
    warn!(
        count = due.len(),
        "Auto-renewal extends entitlements without charging a payment method"
    );

    let mut outcome = RenewalOutcome::default();
    for row in &due.unreadable {
        outcome.failed += 1;
        log_entitlement_event(EntitlementEvent::RenewalFailed, &row.id, Some(&row.reason));
    }

    let due = due.entitlements;

    let users = ctx
        .users
        .resolve_users(&distinct(due.iter().map(|e| &e.user_id)))
        .await;

    let features = ctx
        .db
        .get_features(&distinct(due.iter().map(|e| &e.feature_key)))
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Feature lookup failed; renewals will be marked failed");
            Default::default()
        });

    for entitlement in &due {
        let (Some(feature), Some(user)) = (
            features.get(&entitlement.feature_key),
            users.get(&entitlement.user_id),
        ) else {
            renewal_failed(&mut outcome, entitlement, "missing feature or user data");
            continue;
        };

        let Some(price) = feature.current_price(entitlement.billing_period) else {
            renewal_failed(&mut outcome, entitlement, "invalid price");
            continue;
        };

        let Some((new_start, new_end)) = renewal_window(entitlement) else {
            renewal_failed(&mut outcome, entitlement, "renewal date out of range");
            continue;
        };

        match ctx
            .db
            .apply_renewal(&entitlement.id, new_start, new_end, price, now)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                renewal_failed(&mut outcome, entitlement, "entitlement no longer exists");
                continue;
            }
            Err(e) => {
                renewal_failed(&mut outcome, entitlement, &e.to_string());
                continue;
            }
        }

        outcome.renewed += 1;
        log_entitlement_event(
            EntitlementEvent::Renewed,
            &entitlement.id,
            Some(&format!(
                "period={} price_paise={} new_end_date={}",
                entitlement.billing_period, price, new_end
            )),
        );

        if let Some(email) = user.email() {
            let message = templates::auto_renewal_success(
                &ctx.branding,
                &user.display_name(),
                &feature.feature_name,
                price,
                new_end,
                now.year(),
            );
            ctx.mailer.send(email, &message.subject, &message.html).await;
        }
    }

    info!(
        "Auto-renewal completed: {} renewed, {} failed",
        outcome.renewed, outcome.failed
    );

    Ok(outcome)
}

fn renewal_failed(outcome: &mut RenewalOutcome, entitlement: &Entitlement, reason: &str) {
    outcome.failed += 1;
    log_entitlement_event(EntitlementEvent::RenewalFailed, &entitlement.id, Some(reason));
}
