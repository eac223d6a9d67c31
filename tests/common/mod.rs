//! Shared test helpers for integration tests.

#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use std::sync::Arc;
use tower::ServiceExt;

use randomise_me::config::AppConfig;
use randomise_me::db::Database;
use randomise_me::notify::RecordingNotifier;
use randomise_me::server::middleware_auth::Claims;
use randomise_me::server::{build_router, AppState};
use randomise_me::store::MemoryStore;

pub const TEST_SECRET: &str = "test-secret";

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
/// Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

/// Connect, apply the schema and empty every table.
pub async fn setup_test_db() -> Database {
    let db = Database::connect(&test_db_url())
        .await
        .expect("Failed to connect to test database");
    db.migrate().await.expect("Failed to apply schema");
    truncate_all_tables(db.pool()).await;
    db
}

pub async fn truncate_all_tables(pool: &sqlx::PgPool) {
    sqlx::raw_sql(
        "TRUNCATE TABLE reports, invitations, participants, trial_groups, variables,
                        trials, tutorial_examples
         RESTART IDENTITY CASCADE",
    )
    .execute(pool)
    .await
    .unwrap();
}

/// A router over an in-memory store, with handles on its side effects.
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn test_config() -> AppConfig {
    AppConfig {
        jwt_secret: Some(TEST_SECRET.to_string()),
        random_seed: Some(7),
        ..AppConfig::default()
    }
}

pub fn build_test_app() -> TestApp {
    build_test_app_with(test_config())
}

pub fn build_test_app_with(config: AppConfig) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let state = AppState::new(store.clone(), notifier.clone(), config);
    TestApp {
        router: build_router(state.clone()),
        state,
        store,
        notifier,
    }
}

/// Bearer header value for `user` (email `<user>@example.com`).
pub fn bearer(user: &str) -> String {
    let claims = Claims {
        sub: user.to_string(),
        email: format!("{}@example.com", user),
        exp: Some((chrono::Utc::now().timestamp() + 3600) as u64),
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {}", token)
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::json!(null))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
    }

    /// Trial id from a `/trial/<id>` redirect.
    pub fn redirected_trial_id(&self) -> i64 {
        let location = self.location().expect("redirect location");
        location
            .trim_start_matches("/trial/")
            .parse()
            .unwrap_or_else(|_| panic!("not a trial redirect: {}", location))
    }
}

pub async fn send(app: &TestApp, request: Request<Body>) -> TestResponse {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    TestResponse {
        status,
        headers,
        body,
    }
}

fn builder(method: &str, uri: &str, user: Option<&str>) -> axum::http::request::Builder {
    let mut b = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        b = b.header(header::AUTHORIZATION, bearer(user));
    }
    b
}

pub async fn get(app: &TestApp, uri: &str, user: Option<&str>) -> TestResponse {
    send(app, builder("GET", uri, user).body(Body::empty()).unwrap()).await
}

pub async fn post_empty(app: &TestApp, uri: &str, user: Option<&str>) -> TestResponse {
    send(app, builder("POST", uri, user).body(Body::empty()).unwrap()).await
}

pub async fn post_form(app: &TestApp, uri: &str, user: Option<&str>, body: &str) -> TestResponse {
    let request = builder("POST", uri, user)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn post_json(
    app: &TestApp,
    uri: &str,
    user: Option<&str>,
    body: &serde_json::Value,
) -> TestResponse {
    let request = builder("POST", uri, user)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

/// A valid creation payload; `overrides` are merged over the defaults.
pub fn trial_payload(title: &str, overrides: serde_json::Value) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "title": title,
        "description": "",
        "group_a": "Drink coffee",
        "group_b": "Drink tea",
        "variable": { "question": "How alert do you feel? (1-10)", "style": "score" },
    });
    if let (Some(base), Some(extra)) = (payload.as_object_mut(), overrides.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    payload
}

/// Create a multi-participant trial through the API and return its id.
pub async fn create_trial(app: &TestApp, owner: &str, overrides: serde_json::Value) -> i64 {
    let resp = post_json(app, "/trial/new", Some(owner), &trial_payload("Coffee vs tea", overrides)).await;
    assert_eq!(resp.status, StatusCode::FOUND, "create failed: {}", resp.text());
    resp.redirected_trial_id()
}

/// Create a self-trial through the API and return its id.
pub async fn create_n1_trial(app: &TestApp, owner: &str, overrides: serde_json::Value) -> i64 {
    let resp = post_json(app, "/trial/new/n1", Some(owner), &trial_payload("Morning walk", overrides)).await;
    assert_eq!(resp.status, StatusCode::FOUND, "create failed: {}", resp.text());
    resp.redirected_trial_id()
}
