//! Shared fixtures for integration tests.
//!
//! The email worker and the Supabase admin API are stood up as axum servers
//! on ephemeral local ports so the real HTTP clients are exercised.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, NaiveDateTime, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use sqlx::sqlite::SqlitePool;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use lifecycle::config::{BrandingConfig, EmailConfig};
use lifecycle::directory::{SupabaseAdmin, UserDirectory};
use lifecycle::entitlement::{
    BillingPeriod, CatalogEntry, Entitlement, EntitlementStatus, Feature, UserProfile,
};
use lifecycle::jobs::LifecycleContext;
use lifecycle::notifications::EmailClient;
use lifecycle::server::{Claims, Database};

/// Serve `router` on 127.0.0.1 with an OS-assigned port and return its base URL.
pub async fn spawn_server(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind stub server");
    let addr = listener.local_addr().expect("stub server has no address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("stub server failed");
    });
    format!("http://{addr}")
}

/// Sign an HS256 access token for `user_id` the way Supabase issues them.
pub fn access_token(secret: &str, user_id: &str) -> String {
    let now = Utc::now().timestamp() as u64;
    let claims = Claims {
        sub: user_id.to_string(),
        exp: now + 3600,
        iat: now,
        aud: "authenticated".to_string(),
        email: Some("asha@example.com".to_string()),
        role: Some("authenticated".to_string()),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("failed to sign access token")
}

/// One request received by the email stub.
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub from: String,
    pub from_name: String,
}

/// Email worker stand-in. Records every request; answers `success: false`
/// for recipients marked as failing.
#[derive(Clone, Default)]
pub struct EmailStub {
    sent: Arc<Mutex<Vec<SentEmail>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl EmailStub {
    pub async fn start() -> (Self, String) {
        let stub = Self::default();
        let router = Router::new()
            .route("/", post(receive_email))
            .with_state(stub.clone());
        let url = spawn_server(router).await;
        (stub, url)
    }

    pub fn fail_for(&self, recipient: &str) {
        self.failing.lock().unwrap().insert(recipient.to_string());
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, recipient: &str) -> Vec<SentEmail> {
        self.sent()
            .into_iter()
            .filter(|m| m.to == recipient)
            .collect()
    }
}

async fn receive_email(State(stub): State<EmailStub>, Json(body): Json<Value>) -> Json<Value> {
    let field = |name: &str| body[name].as_str().unwrap_or_default().to_string();
    let email = SentEmail {
        to: field("to"),
        subject: field("subject"),
        html: field("html"),
        from: field("from"),
        from_name: field("fromName"),
    };
    let ok = !stub.failing.lock().unwrap().contains(&email.to);
    stub.sent.lock().unwrap().push(email);
    Json(json!({ "success": ok }))
}

/// Supabase auth admin API stand-in.
#[derive(Clone, Default)]
pub struct DirectoryStub {
    users: Arc<Mutex<HashMap<String, Value>>>,
    broken: Arc<Mutex<HashSet<String>>>,
    pub requests: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl DirectoryStub {
    pub async fn start() -> (Self, String) {
        let stub = Self::default();
        let router = Router::new()
            .route("/auth/v1/admin/users/:id", get(get_admin_user))
            .with_state(stub.clone());
        let url = spawn_server(router).await;
        (stub, url)
    }

    pub fn add_user(&self, id: &str, email: &str, full_name: Option<&str>) {
        let metadata = match full_name {
            Some(name) => json!({ "full_name": name }),
            None => json!({}),
        };
        self.users.lock().unwrap().insert(
            id.to_string(),
            json!({ "id": id, "email": email, "user_metadata": metadata }),
        );
    }

    /// Make lookups for `id` answer 500.
    pub fn break_user(&self, id: &str) {
        self.broken.lock().unwrap().insert(id.to_string());
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

async fn get_admin_user(
    State(stub): State<DirectoryStub>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let apikey = headers
        .get("apikey")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    stub.requests.lock().unwrap().push((id.clone(), apikey));

    if stub.broken.lock().unwrap().contains(&id) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    match stub.users.lock().unwrap().get(&id) {
        Some(user) => Json(user.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "msg": "User not found" }))).into_response(),
    }
}

/// In-memory database plus an email stub wired into a lifecycle context.
pub struct TestEnv {
    pub db: Arc<Database>,
    pub email: EmailStub,
    pub ctx: LifecycleContext,
}

pub fn email_config(url: &str) -> EmailConfig {
    EmailConfig {
        service_url: url.to_string(),
        ..EmailConfig::default()
    }
}

pub async fn setup() -> TestEnv {
    let db = Arc::new(
        Database::in_memory()
            .await
            .expect("failed to create database"),
    );
    let (email, email_url) = EmailStub::start().await;

    let ctx = LifecycleContext::new(
        Arc::clone(&db),
        UserDirectory::Database(Arc::clone(&db)),
        EmailClient::new(&email_config(&email_url)),
        BrandingConfig::default(),
    );

    TestEnv { db, email, ctx }
}

/// Same as [`setup`] but resolving users through a Supabase admin stub.
pub async fn setup_with_supabase() -> (TestEnv, DirectoryStub) {
    let mut env = setup().await;
    let (directory, url) = DirectoryStub::start().await;
    env.ctx.users = UserDirectory::Supabase(SupabaseAdmin::new(url, "service-role-key"));
    (env, directory)
}

pub fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").expect("bad test timestamp")
}

/// An active, monthly, non-auto-renew entitlement ending at `end_date`.
pub fn entitlement(id: &str, user_id: &str, feature_key: &str, end_date: NaiveDateTime) -> Entitlement {
    let start_date = end_date - Duration::days(30);
    Entitlement {
        id: id.to_string(),
        user_id: user_id.to_string(),
        feature_key: feature_key.to_string(),
        bundle_id: None,
        status: EntitlementStatus::Active,
        billing_period: BillingPeriod::Monthly,
        start_date,
        end_date,
        price_at_purchase: Some(49_900),
        auto_renew: false,
        cancelled_at: None,
        created_at: start_date,
        updated_at: start_date,
    }
}

pub async fn insert(db: &Database, entitlement: &Entitlement) {
    db.insert_entitlement(entitlement)
        .await
        .expect("failed to insert entitlement");
}

pub async fn seed_user(db: &Database, id: &str, email: Option<&str>, full_name: Option<&str>) {
    db.upsert_user(&UserProfile {
        id: id.to_string(),
        email: email.map(str::to_string),
        full_name: full_name.map(str::to_string),
    })
    .await
    .expect("failed to seed user");
}

pub async fn seed_feature(
    db: &Database,
    key: &str,
    name: &str,
    monthly_paise: Option<i64>,
    annual_paise: Option<i64>,
) {
    db.upsert_feature(&Feature {
        feature_key: key.to_string(),
        feature_name: name.to_string(),
        addon_price_monthly: monthly_paise,
        addon_price_annual: annual_paise,
    })
    .await
    .expect("failed to seed feature");
}

/// Seed a catalog feature listed for sale at ₹199/month and ₹1999/year.
pub async fn seed_addon(
    db: &Database,
    key: &str,
    category: &str,
    target_roles: &[&str],
    sort_order: Option<i64>,
) {
    db.upsert_catalog_entry(&CatalogEntry {
        feature: Feature {
            feature_key: key.to_string(),
            feature_name: format!("{key} add-on"),
            addon_price_monthly: Some(19_900),
            addon_price_annual: Some(199_900),
        },
        is_addon: true,
        category: Some(category.to_string()),
        description: Some(format!("About {key}")),
        target_roles: target_roles.iter().map(|r| r.to_string()).collect(),
        sort_order,
    })
    .await
    .expect("failed to seed add-on");
}

pub fn sqlite_pool(db: &Database) -> &SqlitePool {
    match db {
        Database::SQLite(pool) => pool,
        #[allow(unreachable_patterns)]
        _ => panic!("integration tests run against SQLite"),
    }
}

/// Run a raw statement with CHECK constraints switched off, to plant rows
/// the schema would otherwise refuse. Checks stay off for the rest of the
/// test, as on a table created before the constraints existed.
pub async fn write_unchecked(db: &Database, statement: &str) {
    let pool = sqlite_pool(db);
    sqlx::query("PRAGMA ignore_check_constraints = ON")
        .execute(pool)
        .await
        .expect("failed to relax checks");
    sqlx::query(statement)
        .execute(pool)
        .await
        .expect("failed to run unchecked write");
}

/// Stored `status` text, read without parsing the rest of the row.
pub async fn stored_status(db: &Database, id: &str) -> String {
    sqlx::query_scalar("SELECT status FROM user_entitlements WHERE id = ?")
        .bind(id)
        .fetch_one(sqlite_pool(db))
        .await
        .expect("failed to read status")
}

/// Stored `end_date`, read without parsing the rest of the row.
pub async fn stored_end_date(db: &Database, id: &str) -> NaiveDateTime {
    sqlx::query_scalar("SELECT end_date FROM user_entitlements WHERE id = ?")
        .bind(id)
        .fetch_one(sqlite_pool(db))
        .await
        .expect("failed to read end_date")
}

pub async fn reload(db: &Database, id: &str) -> Entitlement {
    db.get_entitlement(id)
        .await
        .expect("failed to load entitlement")
        .expect("entitlement missing")
}
