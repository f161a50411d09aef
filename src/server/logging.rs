//! Structured logging for requests and entitlement state changes.
//!
//! - [`request_logging_middleware`] gives every request a UUID, logs method,
//!   path, status and latency, and echoes the id in `X-Request-Id`
//! - [`log_entitlement_event`] records lifecycle transitions in a
//!   consistent shape
//!
//! # Usage
//!
//! ```rust,ignore
//! let app = Router::new()
//!     .route("/health", get(health_handler))
//!     .layer(axum::middleware::from_fn(request_logging_middleware));
//! ```

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, Response},
    middleware::Next,
};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Entitlement state change event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntitlementEvent {
    /// Marked expired by the sweep
    Expired,
    /// Extended by auto-renewal
    Renewed,
    /// Renewal reminder delivered
    ReminderSent,
    /// Auto-renewal skipped or failed for this entitlement
    RenewalFailed,
    /// Cancelled by its owner
    Cancelled,
}

impl std::fmt::Display for EntitlementEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntitlementEvent::Expired => "expired",
            EntitlementEvent::Renewed => "renewed",
            EntitlementEvent::ReminderSent => "reminder_sent",
            EntitlementEvent::RenewalFailed => "renewal_failed",
            EntitlementEvent::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Log an entitlement state change event.
///
/// # Arguments
///
/// * `event` - The type of entitlement event
/// * `entitlement_id` - The entitlement ID
/// * `details` - Optional additional details about the event
pub fn log_entitlement_event(event: EntitlementEvent, entitlement_id: &str, details: Option<&str>) {
    let span = info_span!(
        "entitlement_event",
        event = %event,
        entitlement_id = %entitlement_id,
    );
    let _enter = span.enter();

    match event {
        EntitlementEvent::RenewalFailed => {
            if let Some(d) = details {
                warn!(reason = %d, "Entitlement event occurred");
            } else {
                warn!("Entitlement event occurred");
            }
        }
        _ => {
            if let Some(d) = details {
                info!(details = %d, "Entitlement event occurred");
            } else {
                info!("Entitlement event occurred");
            }
        }
    }
}

/// Header name for the request ID.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Generate a new unique request ID.
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Logging middleware that tracks request timing and generates request IDs.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response<Body> {
    let request_id = generate_request_id();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let start = Instant::now();

    let response = async move {
        info!("Started processing request");
        next.run(request).await
    }
    .instrument(span.clone())
    .await;

    let duration = start.elapsed();
    let status = response.status();

    let _enter = span.enter();
    info!(
        status = %status.as_u16(),
        duration_ms = %duration.as_millis(),
        "Request completed"
    );

    let (mut parts, body) = response.into_parts();
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        parts.headers.insert(REQUEST_ID_HEADER, header_value);
    }

    Response::from_parts(parts, body)
}

/// Health check response structure.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Service status ("healthy" or "degraded")
    pub status: String,
    pub service: String,
    pub version: String,
    pub database: DatabaseHealth,
}

/// Database health status.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseHealth {
    pub connected: bool,
    /// Database type (sqlite or postgres)
    pub db_type: String,
}

impl HealthResponse {
    pub fn from_probe(db_connected: bool, db_type: &str) -> Self {
        Self {
            status: if db_connected { "healthy" } else { "degraded" }.to_string(),
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: DatabaseHealth {
                connected: db_connected,
                db_type: db_type.to_string(),
            },
        }
    }
}
