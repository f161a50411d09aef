//! Entitlement domain types.
//!
//! An entitlement grants one user access to one paid add-on feature for the
//! window `[start_date, end_date)`. All timestamps are UTC.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::errors::LifecycleError;

/// Lifecycle status of an entitlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementStatus {
    Active,
    GracePeriod,
    Expired,
    Cancelled,
}

impl EntitlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntitlementStatus::Active => "active",
            EntitlementStatus::GracePeriod => "grace_period",
            EntitlementStatus::Expired => "expired",
            EntitlementStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EntitlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntitlementStatus {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EntitlementStatus::Active),
            "grace_period" => Ok(EntitlementStatus::GracePeriod),
            "expired" => Ok(EntitlementStatus::Expired),
            "cancelled" => Ok(EntitlementStatus::Cancelled),
            other => Err(LifecycleError::InvalidRecord(format!(
                "unknown entitlement status '{other}'"
            ))),
        }
    }
}

/// How often an add-on is billed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    Monthly,
    Annual,
}

impl BillingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Annual => "annual",
        }
    }

    /// Unit used when rendering prices ("₹599/month").
    pub fn unit(&self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "month",
            BillingPeriod::Annual => "year",
        }
    }

    /// Advance a timestamp by one billing period.
    ///
    /// Month arithmetic clamps to the last day of the target month
    /// (Jan 31 + 1 month = Feb 28/29).
    pub fn advance(&self, from: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            BillingPeriod::Monthly => from.checked_add_months(Months::new(1)),
            BillingPeriod::Annual => from.checked_add_months(Months::new(12)),
        }
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingPeriod {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(BillingPeriod::Monthly),
            "annual" => Ok(BillingPeriod::Annual),
            other => Err(LifecycleError::InvalidRecord(format!(
                "unknown billing period '{other}'"
            ))),
        }
    }
}

/// A user's access grant to one add-on feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entitlement {
    pub id: String,
    pub user_id: String,
    pub feature_key: String,
    pub bundle_id: Option<String>,
    pub status: EntitlementStatus,
    pub billing_period: BillingPeriod,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    /// Amount charged at purchase or last renewal, in paise
    pub price_at_purchase: Option<i64>,
    pub auto_renew: bool,
    pub cancelled_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A selected row whose stored values do not form a valid [`Entitlement`].
///
/// Carries the columns a stage can still act on without the enumerated ones.
#[derive(Debug, Clone, PartialEq)]
pub struct UnreadableEntitlement {
    pub id: String,
    pub user_id: String,
    pub feature_key: String,
    pub end_date: NaiveDateTime,
    pub reason: String,
}

/// Rows returned by a lifecycle selection, split by whether they parsed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntitlementBatch {
    pub entitlements: Vec<Entitlement>,
    pub unreadable: Vec<UnreadableEntitlement>,
}

impl EntitlementBatch {
    pub fn len(&self) -> usize {
        self.entitlements.len() + self.unreadable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every selected row, readable or not.
    pub fn ids(&self) -> Vec<String> {
        self.entitlements
            .iter()
            .map(|e| e.id.clone())
            .chain(self.unreadable.iter().map(|u| u.id.clone()))
            .collect()
    }
}

/// Add-on catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub feature_key: String,
    pub feature_name: String,
    /// Current monthly add-on price, in paise
    pub addon_price_monthly: Option<i64>,
    /// Current annual add-on price, in paise
    pub addon_price_annual: Option<i64>,
}

impl Feature {
    /// Current catalog price for a billing period, if set and positive.
    pub fn current_price(&self, period: BillingPeriod) -> Option<i64> {
        let price = match period {
            BillingPeriod::Monthly => self.addon_price_monthly,
            BillingPeriod::Annual => self.addon_price_annual,
        };
        price.filter(|p| *p > 0)
    }
}

/// A catalog feature together with how it is listed for sale as an add-on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub feature: Feature,
    pub is_addon: bool,
    pub category: Option<String>,
    pub description: Option<String>,
    /// Roles the add-on is offered to; empty means every role
    pub target_roles: Vec<String>,
    pub sort_order: Option<i64>,
}

impl CatalogEntry {
    pub fn offered_to(&self, role: &str) -> bool {
        self.target_roles.is_empty() || self.target_roles.iter().any(|r| r == role)
    }
}

/// Owner of an entitlement as seen by notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
}

impl UserProfile {
    /// Deliverable email address, if any.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().filter(|e| !e.trim().is_empty())
    }

    /// Full name when present, otherwise the email local-part.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.full_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        self.email()
            .and_then(|e| e.split('@').next())
            .unwrap_or_default()
            .to_string()
    }
}

/// Render a paise amount as rupees, dropping a zero fractional part.
pub fn format_rupees(paise: i64) -> String {
    let sign = if paise < 0 { "-" } else { "" };
    let abs = paise.unsigned_abs();
    let (whole, frac) = (abs / 100, abs % 100);
    if frac == 0 {
        format!("{sign}₹{whole}")
    } else {
        format!("{sign}₹{whole}.{frac:02}")
    }
}

/// Inclusive UTC calendar-day window containing `now + days`.
pub fn calendar_day_window(now: NaiveDateTime, days: i64) -> (NaiveDateTime, NaiveDateTime) {
    let day: NaiveDate = (now + Duration::days(days)).date();
    let start = day.and_time(NaiveTime::MIN);
    let end = start + Duration::days(1) - Duration::milliseconds(1);
    (start, end)
}
