//! User directory lookups.
//!
//! Notifications need an email address and a display name for each
//! entitlement owner. Profiles come either from the local `users` table or
//! from the Supabase auth admin API.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::DirectoryConfig;
use crate::entitlement::UserProfile;
use crate::errors::{LifecycleError, LifecycleResult};
use crate::server::database::Database;

/// Client for the Supabase auth admin API.
#[derive(Debug, Clone)]
pub struct SupabaseAdmin {
    http: Client,
    base_url: String,
    service_role_key: String,
}

#[derive(Debug, Deserialize)]
struct AdminUser {
    id: String,
    email: Option<String>,
    #[serde(default)]
    user_metadata: Option<UserMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    full_name: Option<String>,
}

impl SupabaseAdmin {
    pub fn new(base_url: impl Into<String>, service_role_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_role_key: service_role_key.into(),
        }
    }

    /// Fetch one user. `Ok(None)` when the API answers 404.
    pub async fn get_user(&self, id: &str) -> LifecycleResult<Option<UserProfile>> {
        let url = format!("{}/auth/v1/admin/users/{}", self.base_url, id);

        let response = self
            .http
            .get(&url)
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let user: AdminUser = response.json().await?;
                Ok(Some(UserProfile {
                    id: user.id,
                    email: user.email,
                    full_name: user.user_metadata.and_then(|m| m.full_name),
                }))
            }
            status => Err(LifecycleError::NetworkError(format!(
                "auth admin API returned {status} for user {id}"
            ))),
        }
    }
}

/// Source of user profiles for notifications.
#[derive(Debug, Clone)]
pub enum UserDirectory {
    /// Local `users` table, queried in one batch.
    Database(Arc<Database>),
    /// Supabase auth admin API, one request per user.
    Supabase(SupabaseAdmin),
}

impl UserDirectory {
    /// Build the directory selected by configuration.
    pub fn from_config(config: &DirectoryConfig, db: Arc<Database>) -> LifecycleResult<Self> {
        match config.source.as_str() {
            "database" => Ok(UserDirectory::Database(db)),
            "supabase" => Ok(UserDirectory::Supabase(SupabaseAdmin::new(
                config.supabase_url.clone(),
                config.service_role_key.clone(),
            ))),
            other => Err(LifecycleError::ConfigError(format!(
                "unknown directory source '{other}'"
            ))),
        }
    }

    /// Resolve profiles for the distinct ids in `ids`.
    ///
    /// Never fails: lookup errors are logged and the affected ids are simply
    /// absent from the result.
    pub async fn resolve_users(&self, ids: &[String]) -> HashMap<String, UserProfile> {
        let distinct: Vec<String> = ids
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if distinct.is_empty() {
            return HashMap::new();
        }

        match self {
            UserDirectory::Database(db) => match db.get_users(&distinct).await {
                Ok(users) => users,
                Err(e) => {
                    warn!(error = %e, count = distinct.len(), "User lookup failed");
                    HashMap::new()
                }
            },
            UserDirectory::Supabase(admin) => {
                let mut users = HashMap::with_capacity(distinct.len());
                for id in distinct {
                    match admin.get_user(&id).await {
                        Ok(Some(profile)) => {
                            users.insert(id, profile);
                        }
                        Ok(None) => debug!(user_id = %id, "User not found in auth directory"),
                        Err(e) => warn!(user_id = %id, error = %e, "User lookup failed"),
                    }
                }
                users
            }
        }
    }
}
