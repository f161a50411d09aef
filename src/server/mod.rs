// src/server/mod.rs

//! Server-side components.
//!
//! This module contains:
//! - `database`    → DB abstraction over SQLite/Postgres
//! - `handlers`    → Lifecycle trigger and health handlers
//! - `addons`      → Add-on catalog and per-user add-on endpoints
//! - `routes`      → Router builder
//! - `auth`        → Trigger secret and user token extractors
//! - `api_error`   → Standard error envelope
//! - `logging`     → Request middleware and entitlement events
//! - `validation`  → Request validation utilities

pub mod addons;
pub mod api_error;
pub mod auth;
pub mod database;
pub mod handlers;
pub mod logging;
pub mod routes;
pub mod validation;

pub use api_error::{ApiError, ErrorCode};
pub use auth::{AuthError, AuthState, AuthenticatedUser, Claims, CronCaller, JwtValidator};
pub use database::Database;
pub use handlers::{
    expire_entitlements_handler, health_handler, process_auto_renewals_handler,
    process_lifecycle_handler, send_renewal_reminders_handler, AppState,
};
pub use addons::{
    addon_catalog_handler, cancel_addon_handler, check_addon_access_handler,
    user_entitlements_handler,
};
pub use routes::build_router;

pub use validation::{
    validate_entitlement_id, validate_feature_key, validate_length, validate_not_empty,
    ValidationError, ValidationResult,
};
