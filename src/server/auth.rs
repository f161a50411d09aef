//! Request authentication.
//!
//! Two callers reach this service:
//!
//! - the external scheduler, which hits the lifecycle trigger endpoints and
//!   proves itself with a shared bearer secret ([`CronCaller`]);
//! - signed-in users, who call the add-on endpoints with a Supabase-issued
//!   HS256 access token ([`AuthenticatedUser`]).
//!
//! # Usage
//!
//! ```rust,ignore
//! async fn user_handler(user: AuthenticatedUser) -> impl IntoResponse {
//!     format!("Hello, {}!", user.user_id)
//! }
//! ```
//!
//! # Configuration
//!
//! - `SUPABASE_JWT_SECRET` - HS256 secret used to verify access tokens
//! - `LIFECYCLE_JWT_AUDIENCE` - Expected audience claim (default: "authenticated")
//! - `LIFECYCLE_CRON_SECRET` - Bearer secret for the trigger endpoints

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::AuthConfig;
use crate::errors::{LifecycleError, LifecycleResult};
use crate::server::api_error::{ApiError, ErrorCode};

/// Claims carried by a Supabase access token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: u64,
    pub aud: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Authenticated user extracted from a verified access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: Option<String>,
    pub claims: Claims,
}

/// Authentication errors.
#[derive(Debug, Clone)]
pub enum AuthError {
    /// Missing Authorization header
    MissingToken,
    /// Invalid Authorization header format
    InvalidHeader,
    /// Token validation failed
    InvalidToken(String),
    /// Token has expired
    TokenExpired,
    /// Auth is not configured/enabled
    AuthDisabled,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "missing authorization token"),
            AuthError::InvalidHeader => write!(f, "invalid authorization header format"),
            AuthError::InvalidToken(msg) => write!(f, "invalid token: {msg}"),
            AuthError::TokenExpired => write!(f, "token has expired"),
            AuthError::AuthDisabled => write!(f, "authentication is not enabled"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let code = match &err {
            AuthError::MissingToken => ErrorCode::MissingToken,
            AuthError::InvalidHeader => ErrorCode::InvalidHeader,
            AuthError::InvalidToken(_) => ErrorCode::InvalidToken,
            AuthError::TokenExpired => ErrorCode::TokenExpired,
            AuthError::AuthDisabled => ErrorCode::AuthDisabled,
        };
        ApiError::with_message(code, err.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

/// Resolve a secret that may be given as `env:VAR`.
fn resolve_secret(value: &str, field: &str) -> LifecycleResult<String> {
    match value.strip_prefix("env:") {
        Some(env_var) => std::env::var(env_var).map_err(|_| {
            LifecycleError::ConfigError(format!(
                "environment variable '{env_var}' not found for {field}"
            ))
        }),
        None => Ok(value.to_string()),
    }
}

/// HS256 verifier for user access tokens.
#[derive(Clone)]
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
    audience: String,
}

impl JwtValidator {
    pub fn from_config(config: &AuthConfig) -> LifecycleResult<Self> {
        if config.jwt_secret.is_empty() {
            return Err(LifecycleError::ConfigError(
                "jwt_secret is required for JWT authentication".to_string(),
            ));
        }

        let secret = resolve_secret(&config.jwt_secret, "jwt_secret")?;

        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.set_audience(&[&config.jwt_audience]);
        validation.validate_exp = true;

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            audience: config.jwt_audience.clone(),
        })
    }

    /// Validate a token and extract its claims.
    pub fn validate_token(&self, token: &str) -> Result<TokenData<Claims>, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken(e.to_string()),
        })
    }
}

impl std::fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtValidator")
            .field("audience", &self.audience)
            .finish()
    }
}

fn digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Authentication state shared by the router.
#[derive(Clone, Default)]
pub struct AuthState {
    /// JWT validator (None if user auth is disabled)
    pub validator: Option<Arc<JwtValidator>>,
    /// SHA-256 hex digest of the trigger secret (None leaves triggers open)
    cron_secret_digest: Option<String>,
}

impl AuthState {
    pub fn from_config(config: &AuthConfig) -> LifecycleResult<Self> {
        let validator = if config.enabled {
            Some(Arc::new(JwtValidator::from_config(config)?))
        } else {
            None
        };

        let cron_secret_digest = if config.cron_secret.is_empty() {
            None
        } else {
            Some(digest(&resolve_secret(&config.cron_secret, "cron_secret")?))
        };

        Ok(Self {
            validator,
            cron_secret_digest,
        })
    }

    /// User auth off, triggers open.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn user_auth_enabled(&self) -> bool {
        self.validator.is_some()
    }

    pub fn cron_secret_required(&self) -> bool {
        self.cron_secret_digest.is_some()
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("user_auth_enabled", &self.user_auth_enabled())
            .field("cron_secret_required", &self.cron_secret_required())
            .finish()
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, AuthError> {
    parts
        .headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::InvalidHeader)?
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidHeader)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = AuthState::from_ref(state);
        let validator = auth_state.validator.ok_or(AuthError::AuthDisabled)?;

        let token = bearer_token(parts)?;
        let claims = validator.validate_token(token)?.claims;

        Ok(AuthenticatedUser {
            user_id: claims.sub.clone(),
            email: claims.email.clone(),
            claims,
        })
    }
}

/// Marker extractor for the lifecycle trigger endpoints.
///
/// Passes when no trigger secret is configured; otherwise requires
/// `Authorization: Bearer <secret>`.
#[derive(Debug, Clone, Copy)]
pub struct CronCaller;

#[async_trait]
impl<S> FromRequestParts<S> for CronCaller
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = AuthState::from_ref(state);
        let Some(expected) = auth_state.cron_secret_digest.as_deref() else {
            return Ok(CronCaller);
        };

        let token = bearer_token(parts)?;
        if digest(token) == expected {
            Ok(CronCaller)
        } else {
            Err(AuthError::InvalidToken("invalid trigger secret".to_string()))
        }
    }
}
