//! Request validation utilities.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::server::api_error::ApiError;

/// Validation error type.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::invalid_field(&err.field, &err.message)
    }
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

fn feature_key_regex() -> Option<&'static Regex> {
    static FEATURE_KEY: OnceLock<Option<Regex>> = OnceLock::new();
    FEATURE_KEY
        .get_or_init(|| Regex::new(r"^[a-z0-9_]{1,64}$").ok())
        .as_ref()
}

/// Validate a catalog feature key: 1-64 lowercase letters, digits or `_`.
///
/// # Example
/// ```
/// use lifecycle::server::validation::validate_feature_key;
///
/// assert!(validate_feature_key("career_ai", "feature_key").is_ok());
/// assert!(validate_feature_key("Career AI", "feature_key").is_err());
/// ```
pub fn validate_feature_key(value: &str, field_name: &str) -> ValidationResult<()> {
    match feature_key_regex() {
        Some(re) if re.is_match(value) => Ok(()),
        _ => Err(ValidationError {
            field: field_name.to_string(),
            message: "invalid feature key (expected 1-64 of a-z, 0-9, _)".to_string(),
        }),
    }
}

/// Validate that a string is not empty or whitespace only.
///
/// # Example
/// ```
/// use lifecycle::server::validation::validate_not_empty;
///
/// assert!(validate_not_empty("hello", "name").is_ok());
/// assert!(validate_not_empty("", "name").is_err());
/// assert!(validate_not_empty("   ", "name").is_err());
/// ```
pub fn validate_not_empty(value: &str, field_name: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        Err(ValidationError {
            field: field_name.to_string(),
            message: "cannot be empty".to_string(),
        })
    } else {
        Ok(())
    }
}

/// Validate string length is within bounds.
pub fn validate_length(
    value: &str,
    min: usize,
    max: usize,
    field_name: &str,
) -> ValidationResult<()> {
    let len = value.len();
    if len < min {
        Err(ValidationError {
            field: field_name.to_string(),
            message: format!("must be at least {} characters", min),
        })
    } else if len > max {
        Err(ValidationError {
            field: field_name.to_string(),
            message: format!("must be at most {} characters", max),
        })
    } else {
        Ok(())
    }
}

/// Validate an entitlement id taken from a request body.
pub fn validate_entitlement_id(value: &str, field_name: &str) -> ValidationResult<()> {
    validate_not_empty(value, field_name)?;
    validate_length(value, 1, 128, field_name)
}
