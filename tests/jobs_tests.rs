//! Lifecycle stage tests.
//!
//! Each test runs a stage against an in-memory SQLite database with a fixed
//! `now`, and a local email stub standing in for the email worker.

mod common;

use chrono::{Duration, Months};

use common::{
    at, entitlement, insert, reload, seed_feature, seed_user, setup, setup_with_supabase,
    sqlite_pool, stored_end_date, stored_status, write_unchecked,
};
use lifecycle::entitlement::{BillingPeriod, EntitlementStatus};
use lifecycle::jobs::{
    run_auto_renewals, run_expiration_sweep, run_lifecycle_at, run_renewal_reminders,
};

const NOW: &str = "2025-06-10 12:00:00";

// ============================================================================
// Expiration sweep
// ============================================================================

#[tokio::test]
async fn test_expiration_marks_lapsed_entitlement_and_notifies() {
    let env = setup().await;
    let now = at(NOW);
    seed_user(&env.db, "u1", Some("asha@example.com"), Some("Asha Kumar")).await;
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;
    insert(&env.db, &entitlement("e1", "u1", "career_ai", now - Duration::days(1))).await;

    let outcome = run_expiration_sweep(&env.ctx, now).await.unwrap();

    assert_eq!(outcome.expired, 1);
    assert_eq!(outcome.emails_sent, 1);
    assert_eq!(outcome.message(), "Expired 1 entitlements");

    let stored = reload(&env.db, "e1").await;
    assert_eq!(stored.status, EntitlementStatus::Expired);
    assert_eq!(stored.updated_at, now);

    let sent = env.email.sent_to("asha@example.com");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Your Career AI subscription has expired");
    assert!(sent[0].html.contains("Asha Kumar"));
    assert!(sent[0].html.contains("Resubscribe"));
    assert_eq!(sent[0].from, "noreply@rareminds.in");
    assert_eq!(sent[0].from_name, "Skill Passport");
}

#[tokio::test]
async fn test_expiration_covers_grace_period_and_skips_other_rows() {
    let env = setup().await;
    let now = at(NOW);
    seed_user(&env.db, "u1", Some("asha@example.com"), None).await;
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;

    let mut grace = entitlement("grace", "u1", "career_ai", now - Duration::hours(2));
    grace.status = EntitlementStatus::GracePeriod;
    insert(&env.db, &grace).await;

    let mut cancelled = entitlement("cancelled", "u1", "career_ai", now - Duration::days(3));
    cancelled.status = EntitlementStatus::Cancelled;
    insert(&env.db, &cancelled).await;

    let mut already = entitlement("already", "u1", "career_ai", now - Duration::days(40));
    already.status = EntitlementStatus::Expired;
    insert(&env.db, &already).await;

    insert(&env.db, &entitlement("future", "u1", "career_ai", now + Duration::hours(1))).await;

    let outcome = run_expiration_sweep(&env.ctx, now).await.unwrap();
    assert_eq!(outcome.expired, 1);

    assert_eq!(reload(&env.db, "grace").await.status, EntitlementStatus::Expired);
    assert_eq!(reload(&env.db, "cancelled").await.status, EntitlementStatus::Cancelled);
    assert_eq!(reload(&env.db, "future").await.status, EntitlementStatus::Active);
}

#[tokio::test]
async fn test_expiration_with_nothing_lapsed() {
    let env = setup().await;
    let now = at(NOW);
    insert(&env.db, &entitlement("e1", "u1", "career_ai", now + Duration::days(5))).await;

    let outcome = run_expiration_sweep(&env.ctx, now).await.unwrap();

    assert_eq!(outcome.expired, 0);
    assert_eq!(outcome.message(), "No expired entitlements found");
    assert!(env.email.sent().is_empty());
}

#[tokio::test]
async fn test_expiration_still_expires_when_owner_unreachable() {
    let env = setup().await;
    let now = at(NOW);
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;
    seed_user(&env.db, "no-email", None, Some("Ravi")).await;
    insert(&env.db, &entitlement("e1", "no-email", "career_ai", now - Duration::days(1))).await;
    insert(&env.db, &entitlement("e2", "ghost", "career_ai", now - Duration::days(1))).await;

    let outcome = run_expiration_sweep(&env.ctx, now).await.unwrap();

    assert_eq!(outcome.expired, 2);
    assert_eq!(outcome.emails_sent, 0);
    assert_eq!(reload(&env.db, "e1").await.status, EntitlementStatus::Expired);
    assert_eq!(reload(&env.db, "e2").await.status, EntitlementStatus::Expired);
}

#[tokio::test]
async fn test_expiration_counts_only_confirmed_emails() {
    let env = setup().await;
    let now = at(NOW);
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;
    seed_user(&env.db, "u1", Some("ok@example.com"), None).await;
    seed_user(&env.db, "u2", Some("bounce@example.com"), None).await;
    env.email.fail_for("bounce@example.com");
    insert(&env.db, &entitlement("e1", "u1", "career_ai", now - Duration::days(1))).await;
    insert(&env.db, &entitlement("e2", "u2", "career_ai", now - Duration::days(1))).await;

    let outcome = run_expiration_sweep(&env.ctx, now).await.unwrap();

    assert_eq!(outcome.expired, 2);
    assert_eq!(outcome.emails_sent, 1);
    assert_eq!(env.email.sent().len(), 2);
}

#[tokio::test]
async fn test_expiration_expires_rows_with_unknown_billing_period() {
    let env = setup().await;
    let now = at(NOW);
    seed_user(&env.db, "u1", Some("asha@example.com"), None).await;
    seed_user(&env.db, "u2", Some("ravi@example.com"), None).await;
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;
    insert(&env.db, &entitlement("good", "u1", "career_ai", now - Duration::days(1))).await;
    insert(&env.db, &entitlement("odd", "u2", "career_ai", now - Duration::days(2))).await;
    write_unchecked(
        &env.db,
        "UPDATE user_entitlements SET billing_period = 'quarterly' WHERE id = 'odd'",
    )
    .await;

    let outcome = run_expiration_sweep(&env.ctx, now).await.unwrap();

    assert_eq!(outcome.expired, 2);
    assert_eq!(outcome.emails_sent, 2);
    assert_eq!(reload(&env.db, "good").await.status, EntitlementStatus::Expired);
    assert_eq!(stored_status(&env.db, "odd").await, "expired");
    assert_eq!(env.email.sent_to("ravi@example.com").len(), 1);
}

// ============================================================================
// Renewal reminders
// ============================================================================

#[tokio::test]
async fn test_reminder_sent_three_days_out() {
    let env = setup().await;
    let now = at(NOW);
    seed_user(&env.db, "u1", Some("asha@example.com"), Some("Asha")).await;
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;
    insert(&env.db, &entitlement("e1", "u1", "career_ai", now + Duration::days(3))).await;

    let outcome = run_renewal_reminders(&env.ctx, now).await.unwrap();

    assert_eq!(outcome.reminders_sent, 1);
    assert_eq!(outcome.message(), "Sent 1 renewal reminder emails");

    let sent = env.email.sent_to("asha@example.com");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "⏰ Your Career AI subscription expires in 3 days");
    // Price comes from what was paid, not the catalog.
    assert!(sent[0].html.contains("₹499/month"));
    assert!(sent[0].html.contains("Renew Now"));

    assert_eq!(reload(&env.db, "e1").await.status, EntitlementStatus::Active);
}

#[tokio::test]
async fn test_reminders_match_whole_calendar_day() {
    let env = setup().await;
    let now = at(NOW);
    seed_user(&env.db, "u1", Some("asha@example.com"), None).await;
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;

    // Early and late on the day seven days out, and one second before it.
    insert(&env.db, &entitlement("early", "u1", "career_ai", at("2025-06-17 00:00:00"))).await;
    insert(&env.db, &entitlement("late", "u1", "career_ai", at("2025-06-17 23:59:00"))).await;
    insert(&env.db, &entitlement("before", "u1", "career_ai", at("2025-06-16 23:59:59"))).await;
    // Tomorrow, in the one-day window.
    insert(&env.db, &entitlement("tomorrow", "u1", "career_ai", at("2025-06-11 08:00:00"))).await;
    // Two days out matches no window.
    insert(&env.db, &entitlement("two", "u1", "career_ai", at("2025-06-12 12:00:00"))).await;

    let outcome = run_renewal_reminders(&env.ctx, now).await.unwrap();
    assert_eq!(outcome.reminders_sent, 3);

    let subjects: Vec<String> = env.email.sent().into_iter().map(|m| m.subject).collect();
    assert_eq!(
        subjects
            .iter()
            .filter(|s| s.ends_with("expires in 7 days"))
            .count(),
        2
    );
    assert!(subjects.iter().any(|s| s.ends_with("expires in 1 day")));
}

#[tokio::test]
async fn test_reminders_skip_auto_renew_and_inactive() {
    let env = setup().await;
    let now = at(NOW);
    seed_user(&env.db, "u1", Some("asha@example.com"), None).await;
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;

    let mut renewing = entitlement("renewing", "u1", "career_ai", now + Duration::days(3));
    renewing.auto_renew = true;
    insert(&env.db, &renewing).await;

    let mut grace = entitlement("grace", "u1", "career_ai", now + Duration::days(1));
    grace.status = EntitlementStatus::GracePeriod;
    insert(&env.db, &grace).await;

    let outcome = run_renewal_reminders(&env.ctx, now).await.unwrap();

    assert_eq!(outcome.reminders_sent, 0);
    assert!(env.email.sent().is_empty());
}

#[tokio::test]
async fn test_reminders_repeat_on_second_run() {
    let env = setup().await;
    let now = at(NOW);
    seed_user(&env.db, "u1", Some("asha@example.com"), None).await;
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;
    insert(&env.db, &entitlement("e1", "u1", "career_ai", now + Duration::days(7))).await;

    run_renewal_reminders(&env.ctx, now).await.unwrap();
    run_renewal_reminders(&env.ctx, now + Duration::hours(1)).await.unwrap();

    assert_eq!(env.email.sent_to("asha@example.com").len(), 2);
}

#[tokio::test]
async fn test_reminder_uses_feature_key_when_catalog_entry_missing() {
    let env = setup().await;
    let now = at(NOW);
    seed_user(&env.db, "u1", Some("asha@example.com"), None).await;
    let mut free = entitlement("e1", "u1", "mock_interviews", now + Duration::days(1));
    free.price_at_purchase = None;
    insert(&env.db, &free).await;

    let outcome = run_renewal_reminders(&env.ctx, now).await.unwrap();

    assert_eq!(outcome.reminders_sent, 1);
    let sent = env.email.sent();
    assert_eq!(sent[0].subject, "⏰ Your mock_interviews subscription expires in 1 day");
    assert!(sent[0].html.contains("₹0/month"));
    assert!(sent[0].html.contains("expires tomorrow"));
}

#[tokio::test]
async fn test_reminders_resolve_users_through_supabase() {
    let (env, directory) = setup_with_supabase().await;
    let now = at(NOW);
    directory.add_user("u1", "asha@example.com", Some("Asha Kumar"));
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;
    insert(&env.db, &entitlement("e1", "u1", "career_ai", now + Duration::days(3))).await;
    insert(&env.db, &entitlement("e2", "unknown", "career_ai", now + Duration::days(3))).await;
    insert(&env.db, &entitlement("e3", "u1", "career_ai", now + Duration::days(3))).await;

    let outcome = run_renewal_reminders(&env.ctx, now).await.unwrap();

    assert_eq!(outcome.reminders_sent, 2);
    assert!(env.email.sent().iter().all(|m| m.html.contains("Asha Kumar")));

    // One lookup per distinct user, authenticated with the service role key.
    let requests = directory.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert!(requests
        .iter()
        .all(|(_, key)| key.as_deref() == Some("service-role-key")));
}

#[tokio::test]
async fn test_directory_errors_only_skip_affected_users() {
    let (env, directory) = setup_with_supabase().await;
    let now = at(NOW);
    directory.add_user("u1", "asha@example.com", None);
    directory.add_user("u2", "ravi@example.com", None);
    directory.break_user("u2");
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;
    insert(&env.db, &entitlement("e1", "u1", "career_ai", now - Duration::days(1))).await;
    insert(&env.db, &entitlement("e2", "u2", "career_ai", now - Duration::days(1))).await;

    let outcome = run_expiration_sweep(&env.ctx, now).await.unwrap();

    assert_eq!(outcome.expired, 2);
    assert_eq!(outcome.emails_sent, 1);
    assert_eq!(env.email.sent()[0].to, "asha@example.com");
}

#[tokio::test]
async fn test_reminders_skip_only_unreadable_rows() {
    let env = setup().await;
    let now = at(NOW);
    seed_user(&env.db, "u1", Some("asha@example.com"), None).await;
    seed_user(&env.db, "u2", Some("ravi@example.com"), None).await;
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;
    insert(&env.db, &entitlement("good", "u1", "career_ai", now + Duration::days(3))).await;
    insert(&env.db, &entitlement("odd", "u2", "career_ai", now + Duration::days(3))).await;
    write_unchecked(
        &env.db,
        "UPDATE user_entitlements SET billing_period = 'quarterly' WHERE id = 'odd'",
    )
    .await;

    let outcome = run_renewal_reminders(&env.ctx, now).await.unwrap();

    assert_eq!(outcome.reminders_sent, 1);
    assert_eq!(env.email.sent_to("asha@example.com").len(), 1);
    assert!(env.email.sent_to("ravi@example.com").is_empty());
}

#[tokio::test]
async fn test_failed_reminder_window_skips_only_that_offset() {
    let env = setup().await;
    let now = at(NOW);
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;
    for (id, user, email, days) in [
        ("week", "u1", "asha@example.com", 7),
        ("three", "u2", "ravi@example.com", 3),
        ("day", "u3", "meera@example.com", 1),
    ] {
        seed_user(&env.db, user, Some(email), None).await;
        insert(&env.db, &entitlement(id, user, "career_ai", now + Duration::days(days))).await;
    }
    // An end date that sorts into the three-day window but cannot be decoded
    // fails that window's query.
    write_unchecked(
        &env.db,
        "INSERT INTO user_entitlements (id, user_id, feature_key, status, billing_period, \
         start_date, end_date, price_at_purchase_paise, auto_renew, created_at, updated_at) \
         VALUES ('garbled', 'u4', 'career_ai', 'active', 'monthly', '2025-05-13 10:00:00', \
         '2025-06-13 10:00:00 (garbled)', 49900, 0, '2025-05-13 10:00:00', '2025-05-13 10:00:00')",
    )
    .await;

    let outcome = run_renewal_reminders(&env.ctx, now).await.unwrap();

    assert_eq!(outcome.reminders_sent, 2);
    assert_eq!(outcome.message(), "Sent 2 renewal reminder emails");
    assert_eq!(env.email.sent_to("asha@example.com").len(), 1);
    assert_eq!(env.email.sent_to("meera@example.com").len(), 1);
    assert!(env.email.sent_to("ravi@example.com").is_empty());
}

// ============================================================================
// Auto-renewal
// ============================================================================

#[tokio::test]
async fn test_auto_renewal_extends_at_current_catalog_price() {
    let env = setup().await;
    let now = at(NOW);
    seed_user(&env.db, "u1", Some("asha@example.com"), Some("Asha")).await;
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), Some(599_900)).await;

    let old_end = now + Duration::hours(12);
    let mut e = entitlement("e1", "u1", "career_ai", old_end);
    e.auto_renew = true;
    insert(&env.db, &e).await;

    let outcome = run_auto_renewals(&env.ctx, now).await.unwrap();

    assert_eq!(outcome.renewed, 1);
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.message(), "Auto-renewed 1 entitlements, 0 failed");

    let stored = reload(&env.db, "e1").await;
    assert_eq!(stored.status, EntitlementStatus::Active);
    assert_eq!(stored.price_at_purchase, Some(59_900));
    assert_eq!(stored.start_date, old_end);
    assert_eq!(stored.end_date, old_end.checked_add_months(Months::new(1)).unwrap());
    assert!(stored.auto_renew);

    let sent = env.email.sent_to("asha@example.com");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "✓ Your Career AI subscription has been renewed");
    assert!(sent[0].html.contains("₹599"));
    assert!(sent[0].html.contains("July 11, 2025"));
}

#[tokio::test]
async fn test_annual_auto_renewal_adds_a_year() {
    let env = setup().await;
    let now = at(NOW);
    seed_user(&env.db, "u1", Some("asha@example.com"), None).await;
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), Some(599_900)).await;

    let old_end = now + Duration::hours(20);
    let mut e = entitlement("e1", "u1", "career_ai", old_end);
    e.auto_renew = true;
    e.billing_period = BillingPeriod::Annual;
    e.start_date = old_end - Duration::days(365);
    insert(&env.db, &e).await;

    let outcome = run_auto_renewals(&env.ctx, now).await.unwrap();
    assert_eq!(outcome.renewed, 1);

    let stored = reload(&env.db, "e1").await;
    assert_eq!(stored.price_at_purchase, Some(599_900));
    assert_eq!(stored.end_date, at("2026-06-11 08:00:00"));
}

#[tokio::test]
async fn test_auto_renewal_window_is_next_24_hours() {
    let env = setup().await;
    let now = at(NOW);
    seed_user(&env.db, "u1", Some("asha@example.com"), None).await;
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;

    for (id, end) in [
        ("past", now - Duration::minutes(1)),
        ("later", now + Duration::hours(30)),
    ] {
        let mut e = entitlement(id, "u1", "career_ai", end);
        e.auto_renew = true;
        insert(&env.db, &e).await;
    }
    insert(&env.db, &entitlement("manual", "u1", "career_ai", now + Duration::hours(6))).await;

    let outcome = run_auto_renewals(&env.ctx, now).await.unwrap();

    assert_eq!(outcome.renewed, 0);
    assert_eq!(outcome.message(), "No entitlements due for auto-renewal");
    assert_eq!(reload(&env.db, "manual").await.price_at_purchase, Some(49_900));
    assert!(env.email.sent().is_empty());
}

#[tokio::test]
async fn test_auto_renewal_failures_leave_rows_untouched() {
    let env = setup().await;
    let now = at(NOW);
    seed_user(&env.db, "u1", Some("asha@example.com"), None).await;
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;
    seed_feature(&env.db, "free_tier", "Free Tier", Some(0), None).await;

    let end = now + Duration::hours(3);
    for (id, user, feature) in [
        ("no_feature", "u1", "retired_feature"),
        ("no_user", "ghost", "career_ai"),
        ("zero_price", "u1", "free_tier"),
        ("no_annual_price", "u1", "career_ai"),
        ("ok", "u1", "career_ai"),
    ] {
        let mut e = entitlement(id, user, feature, end);
        e.auto_renew = true;
        if id == "no_annual_price" {
            e.billing_period = BillingPeriod::Annual;
        }
        insert(&env.db, &e).await;
    }

    let outcome = run_auto_renewals(&env.ctx, now).await.unwrap();

    assert_eq!(outcome.renewed, 1);
    assert_eq!(outcome.failed, 4);
    assert_eq!(outcome.message(), "Auto-renewed 1 entitlements, 4 failed");

    for id in ["no_feature", "no_user", "zero_price", "no_annual_price"] {
        let stored = reload(&env.db, id).await;
        assert_eq!(stored.end_date, end, "{id} should not be extended");
        assert_eq!(stored.price_at_purchase, Some(49_900));
    }
    assert_eq!(env.email.sent().len(), 1);
}

#[tokio::test]
async fn test_auto_renewal_counts_renewed_even_if_email_fails() {
    let env = setup().await;
    let now = at(NOW);
    seed_user(&env.db, "u1", Some("bounce@example.com"), None).await;
    env.email.fail_for("bounce@example.com");
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;
    let mut e = entitlement("e1", "u1", "career_ai", now + Duration::hours(1));
    e.auto_renew = true;
    insert(&env.db, &e).await;

    let outcome = run_auto_renewals(&env.ctx, now).await.unwrap();

    assert_eq!(outcome.renewed, 1);
    assert_eq!(outcome.failed, 0);
}

#[tokio::test]
async fn test_auto_renewal_counts_unreadable_rows_as_failed() {
    let env = setup().await;
    let now = at(NOW);
    seed_user(&env.db, "u1", Some("asha@example.com"), None).await;
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;
    for (id, hours) in [("good", 3), ("odd", 5)] {
        let mut e = entitlement(id, "u1", "career_ai", now + Duration::hours(hours));
        e.auto_renew = true;
        insert(&env.db, &e).await;
    }
    write_unchecked(
        &env.db,
        "UPDATE user_entitlements SET billing_period = 'quarterly' WHERE id = 'odd'",
    )
    .await;

    let outcome = run_auto_renewals(&env.ctx, now).await.unwrap();

    assert_eq!(outcome.renewed, 1);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.message(), "Auto-renewed 1 entitlements, 1 failed");
    assert_eq!(
        reload(&env.db, "good").await.end_date,
        (now + Duration::hours(3))
            .checked_add_months(Months::new(1))
            .unwrap()
    );
    assert_eq!(stored_end_date(&env.db, "odd").await, now + Duration::hours(5));
}

// ============================================================================
// Orchestrator
// ============================================================================

#[tokio::test]
async fn test_lifecycle_runs_all_stages() {
    let env = setup().await;
    let now = at(NOW);
    seed_user(&env.db, "u1", Some("asha@example.com"), None).await;
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;

    let mut renewing = entitlement("renewing", "u1", "career_ai", now + Duration::hours(12));
    renewing.auto_renew = true;
    insert(&env.db, &renewing).await;
    insert(&env.db, &entitlement("lapsed", "u1", "career_ai", now - Duration::days(1))).await;
    insert(&env.db, &entitlement("soon", "u1", "career_ai", now + Duration::days(3))).await;

    let report = run_lifecycle_at(&env.ctx, now).await;

    assert!(report.success);
    assert_eq!(
        report.message.as_deref(),
        Some("Entitlement lifecycle processing complete")
    );
    assert!(report.error.is_none());
    assert!(report.results.auto_renewals.success);
    assert_eq!(
        report.results.auto_renewals.message,
        "Auto-renewed 1 entitlements, 0 failed"
    );
    assert_eq!(report.results.expirations.message, "Expired 1 entitlements");
    assert_eq!(report.results.reminders.message, "Sent 1 renewal reminder emails");

    assert_eq!(reload(&env.db, "renewing").await.status, EntitlementStatus::Active);
    assert_eq!(reload(&env.db, "lapsed").await.status, EntitlementStatus::Expired);
    assert_eq!(reload(&env.db, "soon").await.status, EntitlementStatus::Active);

    // Renewal confirmation, expiry notice, reminder.
    assert_eq!(env.email.sent().len(), 3);
}

#[tokio::test]
async fn test_renewed_entitlement_gets_confirmation_not_reminder() {
    let env = setup().await;
    // Ends tomorrow morning: inside both the renewal window and the
    // one-day reminder window.
    let now = at(NOW);
    seed_user(&env.db, "u1", Some("asha@example.com"), None).await;
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;
    let mut e = entitlement("e1", "u1", "career_ai", at("2025-06-11 09:00:00"));
    e.auto_renew = true;
    insert(&env.db, &e).await;

    let report = run_lifecycle_at(&env.ctx, now).await;

    assert!(report.success);
    assert_eq!(report.results.reminders.message, "Sent 0 renewal reminder emails");
    let subjects: Vec<String> = env.email.sent().into_iter().map(|m| m.subject).collect();
    assert_eq!(subjects, vec!["✓ Your Career AI subscription has been renewed"]);
}

#[tokio::test]
async fn test_lifecycle_continues_after_stage_error() {
    let env = setup().await;
    let now = at(NOW);
    seed_user(&env.db, "u1", Some("asha@example.com"), None).await;
    seed_feature(&env.db, "career_ai", "Career AI", Some(59_900), None).await;

    let mut renewing = entitlement("renewing", "u1", "career_ai", now + Duration::hours(12));
    renewing.auto_renew = true;
    insert(&env.db, &renewing).await;
    insert(&env.db, &entitlement("lapsed", "u1", "career_ai", now - Duration::days(1))).await;
    insert(&env.db, &entitlement("soon", "u1", "career_ai", now + Duration::days(3))).await;

    // Refuse the expiry update so only the sweep fails.
    sqlx::query(
        "CREATE TRIGGER refuse_expiry BEFORE UPDATE OF status ON user_entitlements \
         WHEN NEW.status = 'expired' BEGIN SELECT RAISE(ABORT, 'expiry refused'); END",
    )
    .execute(sqlite_pool(&env.db))
    .await
    .unwrap();

    let report = run_lifecycle_at(&env.ctx, now).await;

    assert!(report.success);
    assert!(report.error.is_none());
    assert!(report.results.auto_renewals.success);
    assert_eq!(
        report.results.auto_renewals.message,
        "Auto-renewed 1 entitlements, 0 failed"
    );
    assert!(!report.results.expirations.success);
    assert!(report.results.expirations.message.contains("expiry refused"));
    assert!(report.results.reminders.success);
    assert_eq!(report.results.reminders.message, "Sent 1 renewal reminder emails");

    assert_eq!(reload(&env.db, "lapsed").await.status, EntitlementStatus::Active);
    // Renewal confirmation and reminder; no expiry notice.
    assert_eq!(env.email.sent().len(), 2);
}

#[tokio::test]
async fn test_lifecycle_with_empty_store() {
    let env = setup().await;

    let report = run_lifecycle_at(&env.ctx, at(NOW)).await;

    assert!(report.success);
    assert_eq!(
        report.results.auto_renewals.message,
        "No entitlements due for auto-renewal"
    );
    assert_eq!(
        report.results.expirations.message,
        "No expired entitlements found"
    );
    assert_eq!(report.results.reminders.message, "Sent 0 renewal reminder emails");
}

#[cfg(feature = "background-jobs")]
mod scheduler {
    use super::common::setup;
    use lifecycle::jobs::{JobConfig, JobScheduler};

    #[tokio::test]
    async fn test_scheduler_starts_and_stops() {
        let env = setup().await;
        let config = JobConfig {
            lifecycle_cron: "0 0 2 * * *".to_string(),
        };

        let mut scheduler = JobScheduler::new(env.ctx, config).await.unwrap();
        scheduler.start().await.unwrap();
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_rejects_bad_cron() {
        let env = setup().await;
        let config = JobConfig {
            lifecycle_cron: "every day".to_string(),
        };

        let result = match JobScheduler::new(env.ctx, config).await {
            Ok(scheduler) => scheduler.start().await,
            Err(e) => Err(e),
        };
        assert!(result.is_err());
    }
}
