use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use sqlx::{FromRow, QueryBuilder};
use tracing::{debug, error, warn};

#[cfg(feature = "sqlite")]
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

#[cfg(feature = "postgres")]
use sqlx::PgPool;

use crate::config::{get_config, DatabaseConfig};
use crate::entitlement::{
    CatalogEntry, Entitlement, EntitlementBatch, EntitlementStatus, Feature, UnreadableEntitlement,
    UserProfile,
};
use crate::errors::{LifecycleError, LifecycleResult};

/// Row shape of the `user_entitlements` table.
///
/// Enumerated columns are stored as text and parsed into domain types on read.
#[derive(Debug, Clone, FromRow)]
struct EntitlementRow {
    id: String,
    user_id: String,
    feature_key: String,
    bundle_id: Option<String>,
    status: String,
    billing_period: String,
    start_date: NaiveDateTime,
    end_date: NaiveDateTime,
    price_at_purchase_paise: Option<i64>,
    auto_renew: bool,
    cancelled_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl TryFrom<EntitlementRow> for Entitlement {
    type Error = LifecycleError;

    fn try_from(row: EntitlementRow) -> Result<Self, Self::Error> {
        Ok(Entitlement {
            status: row.status.parse()?,
            billing_period: row.billing_period.parse()?,
            id: row.id,
            user_id: row.user_id,
            feature_key: row.feature_key,
            bundle_id: row.bundle_id,
            start_date: row.start_date,
            end_date: row.end_date,
            price_at_purchase: row.price_at_purchase_paise,
            auto_renew: row.auto_renew,
            cancelled_at: row.cancelled_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct FeatureRow {
    feature_key: String,
    feature_name: String,
    addon_price_monthly_paise: Option<i64>,
    addon_price_annual_paise: Option<i64>,
}

impl From<FeatureRow> for Feature {
    fn from(row: FeatureRow) -> Self {
        Feature {
            feature_key: row.feature_key,
            feature_name: row.feature_name,
            addon_price_monthly: row.addon_price_monthly_paise,
            addon_price_annual: row.addon_price_annual_paise,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct CatalogRow {
    feature_key: String,
    feature_name: String,
    addon_price_monthly_paise: Option<i64>,
    addon_price_annual_paise: Option<i64>,
    is_addon: bool,
    category: Option<String>,
    addon_description: Option<String>,
    /// JSON array of role names
    target_roles: Option<String>,
    sort_order_addon: Option<i64>,
}

impl TryFrom<CatalogRow> for CatalogEntry {
    type Error = LifecycleError;

    fn try_from(row: CatalogRow) -> Result<Self, Self::Error> {
        let target_roles = match row.target_roles.as_deref() {
            None | Some("") => Vec::new(),
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                LifecycleError::InvalidRecord(format!("target_roles is not a JSON array: {e}"))
            })?,
        };
        Ok(CatalogEntry {
            feature: Feature {
                feature_key: row.feature_key,
                feature_name: row.feature_name,
                addon_price_monthly: row.addon_price_monthly_paise,
                addon_price_annual: row.addon_price_annual_paise,
            },
            is_addon: row.is_addon,
            category: row.category,
            description: row.addon_description,
            target_roles,
            sort_order: row.sort_order_addon,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct UserRow {
    id: String,
    email: Option<String>,
    full_name: Option<String>,
}

impl From<UserRow> for UserProfile {
    fn from(row: UserRow) -> Self {
        UserProfile {
            id: row.id,
            email: row.email,
            full_name: row.full_name,
        }
    }
}

const ENTITLEMENT_COLUMNS: &str = "id, user_id, feature_key, bundle_id, status, billing_period, \
     start_date, end_date, price_at_purchase_paise, auto_renew, cancelled_at, created_at, updated_at";

#[cfg(feature = "sqlite")]
const SQLITE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS user_entitlements (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        feature_key TEXT NOT NULL,
        bundle_id TEXT,
        status TEXT NOT NULL DEFAULT 'active',
        billing_period TEXT NOT NULL DEFAULT 'monthly',
        start_date TEXT NOT NULL,
        end_date TEXT NOT NULL,
        price_at_purchase_paise INTEGER,
        auto_renew INTEGER NOT NULL DEFAULT 0,
        cancelled_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        CHECK (end_date > start_date),
        CHECK (status IN ('active', 'grace_period', 'expired', 'cancelled')),
        CHECK (billing_period IN ('monthly', 'annual'))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_user_entitlements_lifecycle ON user_entitlements (status, end_date)",
    "CREATE INDEX IF NOT EXISTS idx_user_entitlements_user ON user_entitlements (user_id)",
    r#"
    CREATE TABLE IF NOT EXISTS subscription_plan_features (
        feature_key TEXT PRIMARY KEY,
        feature_name TEXT NOT NULL,
        addon_price_monthly_paise INTEGER,
        addon_price_annual_paise INTEGER,
        is_addon INTEGER NOT NULL DEFAULT 0,
        category TEXT,
        addon_description TEXT,
        target_roles TEXT,
        sort_order_addon INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT,
        full_name TEXT
    )
    "#,
];

#[cfg(feature = "postgres")]
const POSTGRES_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS user_entitlements (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        feature_key TEXT NOT NULL,
        bundle_id TEXT,
        status TEXT NOT NULL DEFAULT 'active',
        billing_period TEXT NOT NULL DEFAULT 'monthly',
        start_date TIMESTAMP NOT NULL,
        end_date TIMESTAMP NOT NULL,
        price_at_purchase_paise BIGINT,
        auto_renew BOOLEAN NOT NULL DEFAULT FALSE,
        cancelled_at TIMESTAMP,
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        CHECK (end_date > start_date),
        CHECK (status IN ('active', 'grace_period', 'expired', 'cancelled')),
        CHECK (billing_period IN ('monthly', 'annual'))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_user_entitlements_lifecycle ON user_entitlements (status, end_date)",
    "CREATE INDEX IF NOT EXISTS idx_user_entitlements_user ON user_entitlements (user_id)",
    r#"
    CREATE TABLE IF NOT EXISTS subscription_plan_features (
        feature_key TEXT PRIMARY KEY,
        feature_name TEXT NOT NULL,
        addon_price_monthly_paise BIGINT,
        addon_price_annual_paise BIGINT,
        is_addon BOOLEAN NOT NULL DEFAULT FALSE,
        category TEXT,
        addon_description TEXT,
        target_roles TEXT,
        sort_order_addon BIGINT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT,
        full_name TEXT
    )
    "#,
];

/// Unified database abstraction over SQLite and Postgres.
///
/// Available variants depend on enabled features:
/// - `sqlite` feature enables `Database::SQLite`
/// - `postgres` feature enables `Database::Postgres`
#[derive(Debug, Clone)]
pub enum Database {
    #[cfg(feature = "sqlite")]
    SQLite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

/// Run `$body` against whichever pool backs `$db`, with `$Db` aliased to the
/// matching sqlx driver so `QueryBuilder::<$Db>` emits the right placeholders.
macro_rules! with_pool {
    ($db:expr, |$pool:ident, $Db:ident| $body:expr) => {
        match $db {
            #[cfg(feature = "sqlite")]
            Database::SQLite($pool) => {
                #[allow(dead_code)]
                type $Db = sqlx::Sqlite;
                $body
            }
            #[cfg(feature = "postgres")]
            Database::Postgres($pool) => {
                #[allow(dead_code)]
                type $Db = sqlx::Postgres;
                $body
            }
        }
    };
}

fn db_err(op: &'static str) -> impl Fn(sqlx::Error) -> LifecycleError {
    move |e| {
        error!("{op} failed: {e}");
        LifecycleError::DatabaseError(format!("{op}: {e}"))
    }
}

fn into_entitlements(rows: Vec<EntitlementRow>) -> LifecycleResult<Vec<Entitlement>> {
    rows.into_iter().map(Entitlement::try_from).collect()
}

/// Parse each row on its own so one bad row does not sink a whole selection.
fn into_batch(rows: Vec<EntitlementRow>) -> EntitlementBatch {
    let mut batch = EntitlementBatch::default();
    for row in rows {
        let (id, user_id, feature_key, end_date) = (
            row.id.clone(),
            row.user_id.clone(),
            row.feature_key.clone(),
            row.end_date,
        );
        match Entitlement::try_from(row) {
            Ok(entitlement) => batch.entitlements.push(entitlement),
            Err(e) => {
                warn!(entitlement_id = %id, error = %e, "Unreadable entitlement row");
                batch.unreadable.push(UnreadableEntitlement {
                    id,
                    user_id,
                    feature_key,
                    end_date,
                    reason: e.to_string(),
                });
            }
        }
    }
    batch
}

impl Database {
    /// Initialize the database connection from the global configuration.
    pub async fn new() -> LifecycleResult<Arc<Self>> {
        let config = get_config()?;
        let db = Self::connect(&config.database).await?;
        if config.database.run_migrations {
            db.migrate().await?;
        }
        Ok(Arc::new(db))
    }

    /// Connect using an explicit database configuration.
    pub async fn connect(config: &DatabaseConfig) -> LifecycleResult<Self> {
        match config.db_type.as_str() {
            #[cfg(feature = "sqlite")]
            "sqlite" => {
                let pool = SqlitePool::connect(&config.sqlite_url).await.map_err(|e| {
                    error!("Failed to connect to SQLite: {e}");
                    LifecycleError::DatabaseError(format!("failed to connect to SQLite: {e}"))
                })?;
                Ok(Database::SQLite(pool))
            }
            #[cfg(not(feature = "sqlite"))]
            "sqlite" => Err(LifecycleError::ConfigError(
                "SQLite support not compiled in. Enable the 'sqlite' feature.".to_string(),
            )),
            #[cfg(feature = "postgres")]
            "postgres" => {
                let pool = PgPool::connect(&config.postgres_url).await.map_err(|e| {
                    error!("Failed to connect to PostgreSQL: {e}");
                    LifecycleError::DatabaseError(format!("failed to connect to PostgreSQL: {e}"))
                })?;
                Ok(Database::Postgres(pool))
            }
            #[cfg(not(feature = "postgres"))]
            "postgres" => Err(LifecycleError::ConfigError(
                "PostgreSQL support not compiled in. Enable the 'postgres' feature.".to_string(),
            )),
            other => Err(LifecycleError::ConfigError(format!(
                "unsupported database type: {other}"
            ))),
        }
    }

    /// A migrated in-memory SQLite database.
    ///
    /// The pool holds a single connection; every SQLite `:memory:` connection
    /// is a separate database.
    #[cfg(feature = "sqlite")]
    pub async fn in_memory() -> LifecycleResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err("open in-memory SQLite"))?;
        let db = Database::SQLite(pool);
        db.migrate().await?;
        Ok(db)
    }

    pub fn db_type(&self) -> &'static str {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(_) => "sqlite",
            #[cfg(feature = "postgres")]
            Database::Postgres(_) => "postgres",
        }
    }

    /// Create the lifecycle tables and indexes if they do not exist.
    pub async fn migrate(&self) -> LifecycleResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                for statement in SQLITE_SCHEMA {
                    sqlx::query(statement)
                        .execute(pool)
                        .await
                        .map_err(db_err("SQLite migration"))?;
                }
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                for statement in POSTGRES_SCHEMA {
                    sqlx::query(statement)
                        .execute(pool)
                        .await
                        .map_err(db_err("Postgres migration"))?;
                }
            }
        }
        debug!("Database schema is up to date ({})", self.db_type());
        Ok(())
    }

    /// Connectivity probe for health checks.
    pub async fn ping(&self) -> bool {
        with_pool!(self, |pool, Db| {
            sqlx::query("SELECT 1").execute(pool).await.is_ok()
        })
    }

    // ------------------------------------------------------------------
    // Entitlements
    // ------------------------------------------------------------------

    /// Insert a new entitlement or overwrite an existing one with the same id.
    pub async fn insert_entitlement(&self, e: &Entitlement) -> LifecycleResult<()> {
        with_pool!(self, |pool, Db| {
            let mut qb = QueryBuilder::<Db>::new(format!(
                "INSERT INTO user_entitlements ({ENTITLEMENT_COLUMNS}) VALUES ("
            ));
            let mut values = qb.separated(", ");
            values
                .push_bind(e.id.clone())
                .push_bind(e.user_id.clone())
                .push_bind(e.feature_key.clone())
                .push_bind(e.bundle_id.clone())
                .push_bind(e.status.as_str())
                .push_bind(e.billing_period.as_str())
                .push_bind(e.start_date)
                .push_bind(e.end_date)
                .push_bind(e.price_at_purchase)
                .push_bind(e.auto_renew)
                .push_bind(e.cancelled_at)
                .push_bind(e.created_at)
                .push_bind(e.updated_at);
            values.push_unseparated(
                ") ON CONFLICT (id) DO UPDATE SET \
                 user_id = excluded.user_id, \
                 feature_key = excluded.feature_key, \
                 bundle_id = excluded.bundle_id, \
                 status = excluded.status, \
                 billing_period = excluded.billing_period, \
                 start_date = excluded.start_date, \
                 end_date = excluded.end_date, \
                 price_at_purchase_paise = excluded.price_at_purchase_paise, \
                 auto_renew = excluded.auto_renew, \
                 cancelled_at = excluded.cancelled_at, \
                 updated_at = excluded.updated_at",
            );
            qb.build()
                .execute(pool)
                .await
                .map_err(db_err("insert_entitlement"))?;
        });
        Ok(())
    }

    /// Fetch an entitlement by id.
    pub async fn get_entitlement(&self, id: &str) -> LifecycleResult<Option<Entitlement>> {
        let row = with_pool!(self, |pool, Db| {
            let mut qb = QueryBuilder::<Db>::new(format!(
                "SELECT {ENTITLEMENT_COLUMNS} FROM user_entitlements WHERE id = "
            ));
            qb.push_bind(id.to_string());
            qb.build_query_as::<EntitlementRow>()
                .fetch_optional(pool)
                .await
                .map_err(db_err("get_entitlement"))?
        });
        row.map(Entitlement::try_from).transpose()
    }

    /// Entitlements still marked `active` or `grace_period` whose end date is
    /// strictly before `now`.
    pub async fn find_lapsed_entitlements(
        &self,
        now: NaiveDateTime,
    ) -> LifecycleResult<EntitlementBatch> {
        let rows = with_pool!(self, |pool, Db| {
            let mut qb = QueryBuilder::<Db>::new(format!(
                "SELECT {ENTITLEMENT_COLUMNS} FROM user_entitlements \
                 WHERE status IN ('active', 'grace_period') AND end_date < "
            ));
            qb.push_bind(now);
            qb.push(" ORDER BY end_date");
            qb.build_query_as::<EntitlementRow>()
                .fetch_all(pool)
                .await
                .map_err(db_err("find_lapsed_entitlements"))?
        });
        Ok(into_batch(rows))
    }

    /// `active` entitlements with `from <= end_date <= to`.
    pub async fn find_active_expiring_between(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> LifecycleResult<EntitlementBatch> {
        let rows = with_pool!(self, |pool, Db| {
            let mut qb = QueryBuilder::<Db>::new(format!(
                "SELECT {ENTITLEMENT_COLUMNS} FROM user_entitlements \
                 WHERE status = 'active' AND end_date >= "
            ));
            qb.push_bind(from);
            qb.push(" AND end_date <= ");
            qb.push_bind(to);
            qb.push(" ORDER BY end_date");
            qb.build_query_as::<EntitlementRow>()
                .fetch_all(pool)
                .await
                .map_err(db_err("find_active_expiring_between"))?
        });
        Ok(into_batch(rows))
    }

    /// `active` entitlements with auto-renew enabled and `from <= end_date <= to`.
    pub async fn find_auto_renewable(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> LifecycleResult<EntitlementBatch> {
        let rows = with_pool!(self, |pool, Db| {
            let mut qb = QueryBuilder::<Db>::new(format!(
                "SELECT {ENTITLEMENT_COLUMNS} FROM user_entitlements \
                 WHERE status = 'active' AND auto_renew = "
            ));
            qb.push_bind(true);
            qb.push(" AND end_date >= ");
            qb.push_bind(from);
            qb.push(" AND end_date <= ");
            qb.push_bind(to);
            qb.push(" ORDER BY end_date");
            qb.build_query_as::<EntitlementRow>()
                .fetch_all(pool)
                .await
                .map_err(db_err("find_auto_renewable"))?
        });
        Ok(into_batch(rows))
    }

    /// Set `status = expired` for every id in one statement.
    ///
    /// Returns the number of rows updated.
    pub async fn mark_expired(&self, ids: &[String], now: NaiveDateTime) -> LifecycleResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let affected = with_pool!(self, |pool, Db| {
            let mut qb = QueryBuilder::<Db>::new("UPDATE user_entitlements SET status = ");
            qb.push_bind(EntitlementStatus::Expired.as_str());
            qb.push(", updated_at = ");
            qb.push_bind(now);
            qb.push(" WHERE id IN (");
            let mut list = qb.separated(", ");
            for id in ids {
                list.push_bind(id.clone());
            }
            list.push_unseparated(")");
            qb.build()
                .execute(pool)
                .await
                .map_err(db_err("mark_expired"))?
                .rows_affected()
        });
        Ok(affected)
    }

    /// Extend an entitlement in place with a new window and charged price.
    ///
    /// Returns `false` if no row matched `id`.
    pub async fn apply_renewal(
        &self,
        id: &str,
        start_date: NaiveDateTime,
        end_date: NaiveDateTime,
        price_paise: i64,
        now: NaiveDateTime,
    ) -> LifecycleResult<bool> {
        let affected = with_pool!(self, |pool, Db| {
            let mut qb = QueryBuilder::<Db>::new("UPDATE user_entitlements SET start_date = ");
            qb.push_bind(start_date);
            qb.push(", end_date = ");
            qb.push_bind(end_date);
            qb.push(", price_at_purchase_paise = ");
            qb.push_bind(price_paise);
            qb.push(", updated_at = ");
            qb.push_bind(now);
            qb.push(" WHERE id = ");
            qb.push_bind(id.to_string());
            qb.build()
                .execute(pool)
                .await
                .map_err(db_err("apply_renewal"))?
                .rows_affected()
        });
        Ok(affected > 0)
    }

    /// A user's entitlements that currently grant access.
    pub async fn active_entitlements_for_user(
        &self,
        user_id: &str,
        now: NaiveDateTime,
    ) -> LifecycleResult<Vec<Entitlement>> {
        let rows = with_pool!(self, |pool, Db| {
            let mut qb = QueryBuilder::<Db>::new(format!(
                "SELECT {ENTITLEMENT_COLUMNS} FROM user_entitlements WHERE user_id = "
            ));
            qb.push_bind(user_id.to_string());
            qb.push(" AND status IN ('active', 'grace_period') AND end_date >= ");
            qb.push_bind(now);
            qb.push(" ORDER BY end_date");
            qb.build_query_as::<EntitlementRow>()
                .fetch_all(pool)
                .await
                .map_err(db_err("active_entitlements_for_user"))?
        });
        into_entitlements(rows)
    }

    /// The latest-ending live entitlement a user holds for one feature.
    pub async fn find_user_feature_access(
        &self,
        user_id: &str,
        feature_key: &str,
        now: NaiveDateTime,
    ) -> LifecycleResult<Option<Entitlement>> {
        let row = with_pool!(self, |pool, Db| {
            let mut qb = QueryBuilder::<Db>::new(format!(
                "SELECT {ENTITLEMENT_COLUMNS} FROM user_entitlements WHERE user_id = "
            ));
            qb.push_bind(user_id.to_string());
            qb.push(" AND feature_key = ");
            qb.push_bind(feature_key.to_string());
            qb.push(" AND status IN ('active', 'grace_period') AND end_date >= ");
            qb.push_bind(now);
            qb.push(" ORDER BY end_date DESC LIMIT 1");
            qb.build_query_as::<EntitlementRow>()
                .fetch_optional(pool)
                .await
                .map_err(db_err("find_user_feature_access"))?
        });
        row.map(Entitlement::try_from).transpose()
    }

    /// Mark an entitlement cancelled and switch off auto-renew.
    ///
    /// Returns the updated entitlement, or `None` if `id` does not exist.
    pub async fn cancel_entitlement(
        &self,
        id: &str,
        now: NaiveDateTime,
    ) -> LifecycleResult<Option<Entitlement>> {
        with_pool!(self, |pool, Db| {
            let mut qb = QueryBuilder::<Db>::new("UPDATE user_entitlements SET status = ");
            qb.push_bind(EntitlementStatus::Cancelled.as_str());
            qb.push(", auto_renew = ");
            qb.push_bind(false);
            qb.push(", cancelled_at = ");
            qb.push_bind(now);
            qb.push(", updated_at = ");
            qb.push_bind(now);
            qb.push(" WHERE id = ");
            qb.push_bind(id.to_string());
            qb.build()
                .execute(pool)
                .await
                .map_err(db_err("cancel_entitlement"))?;
        });
        self.get_entitlement(id).await
    }

    // ------------------------------------------------------------------
    // Feature catalog
    // ------------------------------------------------------------------

    /// Catalog entries for the given keys, keyed by `feature_key`.
    pub async fn get_features(&self, keys: &[String]) -> LifecycleResult<HashMap<String, Feature>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = with_pool!(self, |pool, Db| {
            let mut qb = QueryBuilder::<Db>::new(
                "SELECT feature_key, feature_name, addon_price_monthly_paise, addon_price_annual_paise \
                 FROM subscription_plan_features WHERE feature_key IN (",
            );
            let mut list = qb.separated(", ");
            for key in keys {
                list.push_bind(key.clone());
            }
            list.push_unseparated(")");
            qb.build_query_as::<FeatureRow>()
                .fetch_all(pool)
                .await
                .map_err(db_err("get_features"))?
        });

        Ok(rows
            .into_iter()
            .map(|row| (row.feature_key.clone(), Feature::from(row)))
            .collect())
    }

    /// Insert or replace a catalog entry.
    pub async fn upsert_feature(&self, feature: &Feature) -> LifecycleResult<()> {
        with_pool!(self, |pool, Db| {
            let mut qb = QueryBuilder::<Db>::new(
                "INSERT INTO subscription_plan_features \
                 (feature_key, feature_name, addon_price_monthly_paise, addon_price_annual_paise) VALUES (",
            );
            let mut values = qb.separated(", ");
            values
                .push_bind(feature.feature_key.clone())
                .push_bind(feature.feature_name.clone())
                .push_bind(feature.addon_price_monthly)
                .push_bind(feature.addon_price_annual);
            values.push_unseparated(
                ") ON CONFLICT (feature_key) DO UPDATE SET \
                 feature_name = excluded.feature_name, \
                 addon_price_monthly_paise = excluded.addon_price_monthly_paise, \
                 addon_price_annual_paise = excluded.addon_price_annual_paise",
            );
            qb.build()
                .execute(pool)
                .await
                .map_err(db_err("upsert_feature"))?;
        });
        Ok(())
    }

    /// Insert or replace a catalog entry along with its add-on listing.
    pub async fn upsert_catalog_entry(&self, entry: &CatalogEntry) -> LifecycleResult<()> {
        let target_roles = serde_json::to_string(&entry.target_roles).map_err(|e| {
            LifecycleError::InvalidRecord(format!("target_roles cannot be stored: {e}"))
        })?;
        let feature = &entry.feature;

        with_pool!(self, |pool, Db| {
            let mut qb = QueryBuilder::<Db>::new(
                "INSERT INTO subscription_plan_features \
                 (feature_key, feature_name, addon_price_monthly_paise, addon_price_annual_paise, \
                 is_addon, category, addon_description, target_roles, sort_order_addon) VALUES (",
            );
            let mut values = qb.separated(", ");
            values
                .push_bind(feature.feature_key.clone())
                .push_bind(feature.feature_name.clone())
                .push_bind(feature.addon_price_monthly)
                .push_bind(feature.addon_price_annual)
                .push_bind(entry.is_addon)
                .push_bind(entry.category.clone())
                .push_bind(entry.description.clone())
                .push_bind(target_roles.clone())
                .push_bind(entry.sort_order);
            values.push_unseparated(
                ") ON CONFLICT (feature_key) DO UPDATE SET \
                 feature_name = excluded.feature_name, \
                 addon_price_monthly_paise = excluded.addon_price_monthly_paise, \
                 addon_price_annual_paise = excluded.addon_price_annual_paise, \
                 is_addon = excluded.is_addon, \
                 category = excluded.category, \
                 addon_description = excluded.addon_description, \
                 target_roles = excluded.target_roles, \
                 sort_order_addon = excluded.sort_order_addon",
            );
            qb.build()
                .execute(pool)
                .await
                .map_err(db_err("upsert_catalog_entry"))?;
        });
        Ok(())
    }

    /// Features sold as add-ons, ordered by `sort_order_addon` with unordered
    /// entries last, optionally limited to one category.
    ///
    /// `feature_key` is the table key, so each add-on appears once. Entries
    /// whose stored roles cannot be read are left out.
    pub async fn list_addon_catalog(
        &self,
        category: Option<&str>,
    ) -> LifecycleResult<Vec<CatalogEntry>> {
        let rows = with_pool!(self, |pool, Db| {
            let mut qb = QueryBuilder::<Db>::new(
                "SELECT feature_key, feature_name, addon_price_monthly_paise, addon_price_annual_paise, \
                 is_addon, category, addon_description, target_roles, sort_order_addon \
                 FROM subscription_plan_features WHERE is_addon = ",
            );
            qb.push_bind(true);
            if let Some(category) = category {
                qb.push(" AND category = ");
                qb.push_bind(category.to_string());
            }
            qb.push(" ORDER BY sort_order_addon IS NULL, sort_order_addon, feature_key");
            qb.build_query_as::<CatalogRow>()
                .fetch_all(pool)
                .await
                .map_err(db_err("list_addon_catalog"))?
        });

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let key = row.feature_key.clone();
                CatalogEntry::try_from(row)
                    .map_err(|e| warn!(feature_key = %key, error = %e, "Skipping catalog entry"))
                    .ok()
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Insert or replace a user profile.
    pub async fn upsert_user(&self, user: &UserProfile) -> LifecycleResult<()> {
        with_pool!(self, |pool, Db| {
            let mut qb = QueryBuilder::<Db>::new("INSERT INTO users (id, email, full_name) VALUES (");
            let mut values = qb.separated(", ");
            values
                .push_bind(user.id.clone())
                .push_bind(user.email.clone())
                .push_bind(user.full_name.clone());
            values.push_unseparated(
                ") ON CONFLICT (id) DO UPDATE SET \
                 email = excluded.email, full_name = excluded.full_name",
            );
            qb.build()
                .execute(pool)
                .await
                .map_err(db_err("upsert_user"))?;
        });
        Ok(())
    }

    /// Profiles for the given ids, keyed by id. Unknown ids are absent.
    pub async fn get_users(&self, ids: &[String]) -> LifecycleResult<HashMap<String, UserProfile>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = with_pool!(self, |pool, Db| {
            let mut qb = QueryBuilder::<Db>::new("SELECT id, email, full_name FROM users WHERE id IN (");
            let mut list = qb.separated(", ");
            for id in ids {
                list.push_bind(id.clone());
            }
            list.push_unseparated(")");
            qb.build_query_as::<UserRow>()
                .fetch_all(pool)
                .await
                .map_err(db_err("get_users"))?
        });

        Ok(rows
            .into_iter()
            .map(|row| (row.id.clone(), UserProfile::from(row)))
            .collect())
    }
}
