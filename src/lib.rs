//! Entitlement lifecycle service for paid add-on features.
//!
//! A daily run keeps add-on entitlements consistent with time:
//! auto-renewals first, then the expiration sweep, then renewal reminders.
//! Each stage can also be triggered on its own over HTTP.
//!
//! # Features
//!
//! - `sqlite` - SQLite database backend. Enabled by default.
//! - `postgres` - PostgreSQL database backend.
//! - `background-jobs` - In-process cron trigger for the daily run. Enabled by default.
//!
//! # Example
//!
//! ```toml
//! # Use defaults (sqlite + background-jobs)
//! entitlement-lifecycle = { path = "." }
//!
//! # PostgreSQL, externally scheduled
//! entitlement-lifecycle = { path = ".", default-features = false, features = ["postgres"] }
//! ```

#[cfg(not(any(feature = "sqlite", feature = "postgres")))]
compile_error!("enable at least one database backend: the `sqlite` or `postgres` feature");

pub mod config;
pub mod directory;
pub mod entitlement;
pub mod errors;
pub mod jobs;
pub mod notifications;

#[path = "server/mod.rs"]
pub mod server;
