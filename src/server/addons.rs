//! Add-on endpoints.
//!
//! - `GET /addon-catalog` lists add-ons on sale (no sign-in needed)
//! - `GET /user-entitlements` lists the caller's live entitlements
//! - `GET /check-addon-access?feature_key=K` reports access to one feature
//! - `POST /cancel-addon` turns off an add-on at the end of its window

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::entitlement::{CatalogEntry, Entitlement, EntitlementStatus};
use crate::server::api_error::ApiError;
use crate::server::auth::AuthenticatedUser;
use crate::server::handlers::AppState;
use crate::server::logging::{log_entitlement_event, EntitlementEvent};
use crate::server::validation::{validate_entitlement_id, validate_feature_key, validate_length};

#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    pub category: Option<String>,
    pub role: Option<String>,
}

/// One add-on as offered for sale. Prices are in rupees; unset prices are 0.
#[derive(Debug, Serialize)]
pub struct AddonListing {
    pub feature_key: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price_monthly: f64,
    pub price_annual: f64,
    pub target_roles: Vec<String>,
}

fn rupees(paise: Option<i64>) -> f64 {
    paise.unwrap_or(0) as f64 / 100.0
}

impl From<CatalogEntry> for AddonListing {
    fn from(entry: CatalogEntry) -> Self {
        AddonListing {
            price_monthly: rupees(entry.feature.addon_price_monthly),
            price_annual: rupees(entry.feature.addon_price_annual),
            feature_key: entry.feature.feature_key,
            name: entry.feature.feature_name,
            description: entry.description,
            category: entry.category,
            target_roles: entry.target_roles,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AddonCatalogResponse {
    pub success: bool,
    pub addons: Vec<AddonListing>,
}

/// `GET /addon-catalog?category=C&role=R`
///
/// Both filters are optional. Add-ons without target roles match any role.
pub async fn addon_catalog_handler(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<AddonCatalogResponse>, ApiError> {
    if let Some(category) = &query.category {
        validate_length(category, 1, 64, "category")?;
    }
    if let Some(role) = &query.role {
        validate_length(role, 1, 64, "role")?;
    }

    let entries = state
        .ctx
        .db
        .list_addon_catalog(query.category.as_deref())
        .await?;

    let addons = entries
        .into_iter()
        .filter(|entry| query.role.as_deref().map_or(true, |role| entry.offered_to(role)))
        .map(AddonListing::from)
        .collect();

    Ok(Json(AddonCatalogResponse {
        success: true,
        addons,
    }))
}

#[derive(Debug, Serialize)]
pub struct UserEntitlementsResponse {
    pub success: bool,
    pub entitlements: Vec<Entitlement>,
}

/// `GET /user-entitlements`
pub async fn user_entitlements_handler(
    user: AuthenticatedUser,
    State(state): State<AppState>,
) -> Result<Json<UserEntitlementsResponse>, ApiError> {
    let now = Utc::now().naive_utc();
    let entitlements = state
        .ctx
        .db
        .active_entitlements_for_user(&user.user_id, now)
        .await?;

    Ok(Json(UserEntitlementsResponse {
        success: true,
        entitlements,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AccessQuery {
    pub feature_key: Option<String>,
}

/// Where access to a feature comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessSource {
    Bundle,
    Addon,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonAccessResponse {
    pub success: bool,
    pub has_access: bool,
    pub access_source: Option<AccessSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entitlement: Option<Entitlement>,
}

/// `GET /check-addon-access?feature_key=K`
pub async fn check_addon_access_handler(
    user: AuthenticatedUser,
    State(state): State<AppState>,
    Query(query): Query<AccessQuery>,
) -> Result<Json<AddonAccessResponse>, ApiError> {
    let feature_key = query
        .feature_key
        .ok_or_else(|| ApiError::missing_field("feature_key"))?;
    validate_feature_key(&feature_key, "feature_key")?;

    let now = Utc::now().naive_utc();
    let entitlement = state
        .ctx
        .db
        .find_user_feature_access(&user.user_id, &feature_key, now)
        .await?;

    let access_source = entitlement.as_ref().map(|e| {
        if e.bundle_id.is_some() {
            AccessSource::Bundle
        } else {
            AccessSource::Addon
        }
    });

    Ok(Json(AddonAccessResponse {
        success: true,
        has_access: entitlement.is_some(),
        access_source,
        entitlement,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CancelAddonRequest {
    pub entitlement_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelAddonResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub already_cancelled: bool,
    pub message: String,
    pub entitlement: Entitlement,
}

/// `POST /cancel-addon`
///
/// Cancellation keeps access until `end_date` and switches off auto-renew.
pub async fn cancel_addon_handler(
    user: AuthenticatedUser,
    State(state): State<AppState>,
    Json(req): Json<CancelAddonRequest>,
) -> Result<Json<CancelAddonResponse>, ApiError> {
    let entitlement_id = req
        .entitlement_id
        .ok_or_else(|| ApiError::missing_field("entitlement_id"))?;
    validate_entitlement_id(&entitlement_id, "entitlement_id")?;

    let db = &state.ctx.db;
    let entitlement = db
        .get_entitlement(&entitlement_id)
        .await?
        .filter(|e| e.user_id == user.user_id)
        .ok_or_else(ApiError::entitlement_not_found)?;

    if entitlement.status == EntitlementStatus::Cancelled {
        return Ok(Json(CancelAddonResponse {
            success: true,
            already_cancelled: true,
            message: "Entitlement is already cancelled".to_string(),
            entitlement,
        }));
    }

    let now = Utc::now().naive_utc();
    let cancelled = db
        .cancel_entitlement(&entitlement_id, now)
        .await?
        .ok_or_else(ApiError::entitlement_not_found)?;

    log_entitlement_event(
        EntitlementEvent::Cancelled,
        &cancelled.id,
        Some(&format!("user={} end_date={}", user.user_id, cancelled.end_date)),
    );

    Ok(Json(CancelAddonResponse {
        success: true,
        already_cancelled: false,
        message: format!(
            "Add-on cancelled successfully. Access continues until {}",
            cancelled.end_date.format("%Y-%m-%d")
        ),
        entitlement: cancelled,
    }))
}
