use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::addons::{
    addon_catalog_handler, cancel_addon_handler, check_addon_access_handler,
    user_entitlements_handler,
};
use crate::server::handlers::{
    expire_entitlements_handler, health_handler, not_found_handler, process_auto_renewals_handler,
    process_lifecycle_handler, send_renewal_reminders_handler, AppState,
};
use crate::server::logging::request_logging_middleware;

/// Build the application router.
///
/// # Routes
///
/// ## Lifecycle triggers (bearer secret when `auth.cron_secret` is set)
/// - `POST /process-entitlement-lifecycle` - Renewals, expirations, then reminders
/// - `POST /expire-entitlements` - Expiration sweep only
/// - `POST /send-renewal-reminders` - Renewal reminders only
/// - `POST /process-auto-renewals` - Auto-renewal only
///
/// ## Add-on catalog (public)
/// - `GET /addon-catalog` - Add-ons on sale, filtered by `category` and `role`
///
/// ## Add-on endpoints (user access token)
/// - `GET /user-entitlements` - Caller's live entitlements
/// - `GET /check-addon-access` - Access check for one feature
/// - `POST /cancel-addon` - Cancel an add-on
///
/// ## Operations
/// - `GET /health` - Service and database status
///
/// Unknown paths answer 404 with the standard error envelope.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/process-entitlement-lifecycle",
            post(process_lifecycle_handler),
        )
        .route("/expire-entitlements", post(expire_entitlements_handler))
        .route(
            "/send-renewal-reminders",
            post(send_renewal_reminders_handler),
        )
        .route(
            "/process-auto-renewals",
            post(process_auto_renewals_handler),
        )
        .route("/addon-catalog", get(addon_catalog_handler))
        .route("/user-entitlements", get(user_entitlements_handler))
        .route("/check-addon-access", get(check_addon_access_handler))
        .route("/cancel-addon", post(cancel_addon_handler))
        .route("/health", get(health_handler))
        .fallback(not_found_handler)
        .layer(middleware::from_fn(request_logging_middleware))
        .with_state(state)
}
