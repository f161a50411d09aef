//! Configuration system for the lifecycle service.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `lifecycle.toml` file
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `LIFECYCLE_SERVER_HOST` / `LIFECYCLE_SERVER_PORT` - Bind address
//! - `LIFECYCLE_DATABASE_TYPE` - `sqlite` or `postgres`
//! - `LIFECYCLE_DATABASE_URL` - Connection URL (routed by scheme)
//! - `LIFECYCLE_RUN_MIGRATIONS` - Create tables on startup
//! - `LIFECYCLE_LOG_LEVEL` / `LIFECYCLE_LOG_JSON` - Log level and format
//! - `LIFECYCLE_EMAIL_SERVICE_URL` - Internal email service endpoint
//! - `LIFECYCLE_EMAIL_API_URL` - Public email API endpoint (fallback)
//! - `LIFECYCLE_EMAIL_FROM` / `LIFECYCLE_EMAIL_FROM_NAME` - Sender identity
//! - `LIFECYCLE_DIRECTORY_SOURCE` - `database` or `supabase`
//! - `SUPABASE_URL` / `SUPABASE_SERVICE_ROLE_KEY` - Supabase admin API access
//! - `LIFECYCLE_AUTH_ENABLED` / `SUPABASE_JWT_SECRET` / `LIFECYCLE_JWT_AUDIENCE`
//! - `LIFECYCLE_CRON_SECRET` - Bearer secret for the lifecycle trigger endpoints
//! - `LIFECYCLE_JOBS_ENABLED` / `LIFECYCLE_JOBS_CRON` - In-process scheduler

use config::{Config, ConfigBuilder};
use serde::Deserialize;
use std::env;
use std::sync::OnceLock;

use crate::errors::{LifecycleError, LifecycleResult};

/// Global configuration singleton.
static CONFIG: OnceLock<LifecycleConfig> = OnceLock::new();

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub email: EmailConfig,
    pub branding: BrandingConfig,
    pub directory: DirectoryConfig,
    pub auth: AuthConfig,
    pub jobs: JobsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database type: "sqlite" or "postgres"
    pub db_type: String,
    /// SQLite connection URL
    pub sqlite_url: String,
    /// PostgreSQL connection URL
    pub postgres_url: String,
    /// Create the lifecycle tables on startup
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: "sqlite".to_string(),
            sqlite_url: "sqlite://lifecycle.db?mode=rwc".to_string(),
            postgres_url: "postgres://localhost/lifecycle".to_string(),
            run_migrations: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Email worker configuration.
///
/// `service_url` is the internal service endpoint and wins when set;
/// `api_url` is the public REST endpoint used otherwise.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub service_url: String,
    pub api_url: String,
    pub from_address: String,
    pub from_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            service_url: String::new(),
            api_url: String::new(),
            from_address: "noreply@rareminds.in".to_string(),
            from_name: "Skill Passport".to_string(),
        }
    }
}

impl EmailConfig {
    /// The endpoint emails are posted to, if any is configured.
    pub fn endpoint(&self) -> Option<&str> {
        [self.service_url.as_str(), self.api_url.as_str()]
            .into_iter()
            .find(|url| !url.is_empty())
    }
}

/// Branding used in notification emails.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrandingConfig {
    pub app_name: String,
    pub copyright_holder: String,
    /// Link target for "Renew Now" and "Manage Subscription"
    pub manage_url: String,
    /// Link target for "Resubscribe"
    pub addons_url: String,
}

impl Default for BrandingConfig {
    fn default() -> Self {
        Self {
            app_name: "Skill Passport".to_string(),
            copyright_holder: "Skill Passport by Rareminds".to_string(),
            manage_url: "https://skillpassport.rareminds.in/subscription/manage".to_string(),
            addons_url: "https://skillpassport.rareminds.in/subscription/add-ons".to_string(),
        }
    }
}

/// Where user profiles are resolved from.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// "database" (local `users` table) or "supabase" (auth admin API)
    pub source: String,
    pub supabase_url: String,
    pub service_role_key: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            source: "database".to_string(),
            supabase_url: String::new(),
            service_role_key: String::new(),
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable JWT authentication for the add-on query endpoints
    pub enabled: bool,
    /// HS256 secret used to sign user access tokens (`env:VAR` reads from environment)
    pub jwt_secret: String,
    /// Expected `aud` claim
    pub jwt_audience: String,
    /// Bearer secret required on the lifecycle trigger endpoints; empty leaves them open
    pub cron_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            jwt_secret: String::new(),
            jwt_audience: "authenticated".to_string(),
            cron_secret: String::new(),
        }
    }
}

/// In-process scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub enabled: bool,
    /// Six-field cron expression (sec min hour day month weekday)
    pub lifecycle_cron: String,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // Daily at 02:00 UTC
            lifecycle_cron: "0 0 2 * * *".to_string(),
        }
    }
}

fn config_err(e: config::ConfigError) -> LifecycleError {
    LifecycleError::ConfigError(e.to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok()
}

type Builder = ConfigBuilder<config::builder::DefaultState>;

impl LifecycleConfig {
    fn defaults(builder: Builder) -> LifecycleResult<Builder> {
        let server = ServerConfig::default();
        let database = DatabaseConfig::default();
        let logging = LoggingConfig::default();
        let email = EmailConfig::default();
        let branding = BrandingConfig::default();
        let directory = DirectoryConfig::default();
        let auth = AuthConfig::default();
        let jobs = JobsConfig::default();

        builder
            .set_default("server.host", server.host)
            .map_err(config_err)?
            .set_default("server.port", i64::from(server.port))
            .map_err(config_err)?
            .set_default("database.db_type", database.db_type)
            .map_err(config_err)?
            .set_default("database.sqlite_url", database.sqlite_url)
            .map_err(config_err)?
            .set_default("database.postgres_url", database.postgres_url)
            .map_err(config_err)?
            .set_default("database.run_migrations", database.run_migrations)
            .map_err(config_err)?
            .set_default("logging.level", logging.level)
            .map_err(config_err)?
            .set_default("logging.json", logging.json)
            .map_err(config_err)?
            .set_default("email.service_url", email.service_url)
            .map_err(config_err)?
            .set_default("email.api_url", email.api_url)
            .map_err(config_err)?
            .set_default("email.from_address", email.from_address)
            .map_err(config_err)?
            .set_default("email.from_name", email.from_name)
            .map_err(config_err)?
            .set_default("branding.app_name", branding.app_name)
            .map_err(config_err)?
            .set_default("branding.copyright_holder", branding.copyright_holder)
            .map_err(config_err)?
            .set_default("branding.manage_url", branding.manage_url)
            .map_err(config_err)?
            .set_default("branding.addons_url", branding.addons_url)
            .map_err(config_err)?
            .set_default("directory.source", directory.source)
            .map_err(config_err)?
            .set_default("directory.supabase_url", directory.supabase_url)
            .map_err(config_err)?
            .set_default("directory.service_role_key", directory.service_role_key)
            .map_err(config_err)?
            .set_default("auth.enabled", auth.enabled)
            .map_err(config_err)?
            .set_default("auth.jwt_secret", auth.jwt_secret)
            .map_err(config_err)?
            .set_default("auth.jwt_audience", auth.jwt_audience)
            .map_err(config_err)?
            .set_default("auth.cron_secret", auth.cron_secret)
            .map_err(config_err)?
            .set_default("jobs.enabled", jobs.enabled)
            .map_err(config_err)?
            .set_default("jobs.lifecycle_cron", jobs.lifecycle_cron)
            .map_err(config_err)
    }

    fn env_overrides(builder: Builder) -> LifecycleResult<Builder> {
        let database_url = env_string("LIFECYCLE_DATABASE_URL");

        builder
            .set_override_option("server.host", env_string("LIFECYCLE_SERVER_HOST"))
            .map_err(config_err)?
            .set_override_option("server.port", env_parsed::<i64>("LIFECYCLE_SERVER_PORT"))
            .map_err(config_err)?
            .set_override_option("database.db_type", env_string("LIFECYCLE_DATABASE_TYPE"))
            .map_err(config_err)?
            .set_override_option(
                "database.sqlite_url",
                database_url
                    .clone()
                    .filter(|url| url.starts_with("sqlite")),
            )
            .map_err(config_err)?
            .set_override_option(
                "database.postgres_url",
                database_url.filter(|url| url.starts_with("postgres")),
            )
            .map_err(config_err)?
            .set_override_option(
                "database.run_migrations",
                env_parsed::<bool>("LIFECYCLE_RUN_MIGRATIONS"),
            )
            .map_err(config_err)?
            .set_override_option("logging.level", env_string("LIFECYCLE_LOG_LEVEL"))
            .map_err(config_err)?
            .set_override_option("logging.json", env_parsed::<bool>("LIFECYCLE_LOG_JSON"))
            .map_err(config_err)?
            .set_override_option(
                "email.service_url",
                env_string("LIFECYCLE_EMAIL_SERVICE_URL"),
            )
            .map_err(config_err)?
            .set_override_option("email.api_url", env_string("LIFECYCLE_EMAIL_API_URL"))
            .map_err(config_err)?
            .set_override_option("email.from_address", env_string("LIFECYCLE_EMAIL_FROM"))
            .map_err(config_err)?
            .set_override_option("email.from_name", env_string("LIFECYCLE_EMAIL_FROM_NAME"))
            .map_err(config_err)?
            .set_override_option(
                "directory.source",
                env_string("LIFECYCLE_DIRECTORY_SOURCE"),
            )
            .map_err(config_err)?
            .set_override_option("directory.supabase_url", env_string("SUPABASE_URL"))
            .map_err(config_err)?
            .set_override_option(
                "directory.service_role_key",
                env_string("SUPABASE_SERVICE_ROLE_KEY"),
            )
            .map_err(config_err)?
            .set_override_option("auth.enabled", env_parsed::<bool>("LIFECYCLE_AUTH_ENABLED"))
            .map_err(config_err)?
            .set_override_option("auth.jwt_secret", env_string("SUPABASE_JWT_SECRET"))
            .map_err(config_err)?
            .set_override_option("auth.jwt_audience", env_string("LIFECYCLE_JWT_AUDIENCE"))
            .map_err(config_err)?
            .set_override_option("auth.cron_secret", env_string("LIFECYCLE_CRON_SECRET"))
            .map_err(config_err)?
            .set_override_option("jobs.enabled", env_parsed::<bool>("LIFECYCLE_JOBS_ENABLED"))
            .map_err(config_err)?
            .set_override_option("jobs.lifecycle_cron", env_string("LIFECYCLE_JOBS_CRON"))
            .map_err(config_err)
    }

    /// Load and validate configuration from defaults, `lifecycle.toml` and
    /// the environment, bypassing the global cache.
    pub fn from_env() -> LifecycleResult<Self> {
        let builder = Self::defaults(Config::builder())?
            .add_source(config::File::with_name("lifecycle").required(false));
        let builder = Self::env_overrides(builder)?;

        let settings = builder
            .build()
            .map_err(|e| LifecycleError::ConfigError(format!("failed to build config: {e}")))?;

        let config: Self = settings.try_deserialize().map_err(|e| {
            LifecycleError::ConfigError(format!("failed to deserialize config: {e}"))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LifecycleResult<()> {
        if self.server.port == 0 {
            return Err(LifecycleError::ConfigError(
                "server.port must be greater than 0".to_string(),
            ));
        }

        match self.database.db_type.as_str() {
            "sqlite" | "postgres" => {}
            other => {
                return Err(LifecycleError::ConfigError(format!(
                    "database.db_type must be 'sqlite' or 'postgres', got '{other}'"
                )));
            }
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(LifecycleError::ConfigError(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        match self.directory.source.as_str() {
            "database" => {}
            "supabase" => {
                let url = &self.directory.supabase_url;
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(LifecycleError::ConfigError(
                        "directory.supabase_url must be an http(s) URL when directory.source is 'supabase'"
                            .to_string(),
                    ));
                }
                if self.directory.service_role_key.is_empty() {
                    return Err(LifecycleError::ConfigError(
                        "directory.service_role_key is required when directory.source is 'supabase'"
                            .to_string(),
                    ));
                }
            }
            other => {
                return Err(LifecycleError::ConfigError(format!(
                    "directory.source must be 'database' or 'supabase', got '{other}'"
                )));
            }
        }

        if self.auth.enabled && self.auth.jwt_secret.is_empty() {
            return Err(LifecycleError::ConfigError(
                "auth.jwt_secret is required when auth.enabled is true".to_string(),
            ));
        }

        Ok(())
    }
}

/// Get the global configuration.
///
/// This loads the configuration on first access and caches it.
pub fn get_config() -> LifecycleResult<&'static LifecycleConfig> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    let config = LifecycleConfig::from_env()?;

    // Another thread may have won the race; either value is valid.
    Ok(CONFIG.get_or_init(|| config))
}
