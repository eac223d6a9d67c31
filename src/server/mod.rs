//! # Server: HTTP Surface
//!
//! Runs the axum router that exposes trial discovery, creation, the owner's
//! administration pages, participation (join, leave, randomise, report) and
//! data export.
//!
//! ## Request Path
//!
//! ```text
//! CORS ─▶ catch-panic ─▶ request span + latency ─▶ trace ─▶ body limit ─▶ timeout ─▶ handler
//! ```
//!
//! Each trial handler names the gate chain it runs (see [`crate::access::chains`])
//! and calls [`gatekeeper::guard`] before touching any state.
//!
//! ## Module Structure
//!
//! - [`errors`]: `ViewError` and its HTTP mapping
//! - [`middleware_auth`]: bearer-token identity extractor
//! - [`gatekeeper`]: gate chain evaluation and visibility lookups
//! - `routes_*`: one file per concern

pub mod errors;
mod gatekeeper;
pub mod middleware_auth;
mod routes_admin;
mod routes_create;
mod routes_detail;
mod routes_discovery;
mod routes_export;
mod routes_health;
mod routes_participation;
mod routes_tutorial;

use anyhow::{Context, Result};
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Instrument};

use crate::config::AppConfig;
use crate::db::Database;
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::prom_metrics;
use crate::store::{MemoryStore, TrialStore};

pub struct AppState {
    pub store: Arc<dyn TrialStore>,
    pub notifier: Arc<dyn Notifier>,
    pub config: AppConfig,
    /// Source of arm randomisation. Never held across an await.
    pub rng: Mutex<StdRng>,
    pub prom_metrics: prom_metrics::Metrics,
}

impl AppState {
    pub fn new(
        store: Arc<dyn TrialStore>,
        notifier: Arc<dyn Notifier>,
        config: AppConfig,
    ) -> Arc<Self> {
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Arc::new(AppState {
            store,
            notifier,
            config,
            rng: Mutex::new(rng),
            prom_metrics: prom_metrics::Metrics::new(),
        })
    }

    /// Today's date for closing decisions.
    pub fn today(&self) -> chrono::NaiveDate {
        chrono::Utc::now().date_naive()
    }
}

/// Assigns or propagates `x-request-id`, wraps the request in a span and
/// records its latency.
async fn request_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let method = req.method().to_string();
    let raw_path = req.uri().path().to_string();
    let norm_path = prom_metrics::normalize_path(&raw_path);
    let start = std::time::Instant::now();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %raw_path,
    );
    let mut response = next.run(req).instrument(span).await;

    state
        .prom_metrics
        .http_request_duration
        .get_or_create(&prom_metrics::HttpLabel {
            method,
            path: norm_path,
        })
        .observe(start.elapsed().as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs);
    let body_limit = state.config.body_limit_bytes;

    Router::new()
        .route("/healthz", get(routes_health::handler_healthz))
        .route("/readyz", get(routes_health::handler_readyz))
        .route("/metrics", get(routes_health::handler_metrics))
        // Discovery
        .route("/trials", get(routes_discovery::handler_active))
        .route("/trials/mine", get(routes_discovery::handler_mine))
        .route("/trials/featured", get(routes_discovery::handler_featured))
        .route("/trials/search", get(routes_discovery::handler_search))
        // Creation
        .route(
            "/trial/new",
            get(routes_create::handler_landing).post(routes_create::handler_create),
        )
        .route(
            "/trial/new/n1",
            get(routes_create::handler_n1_form).post(routes_create::handler_create_n1),
        )
        .route(
            "/trial/{pk}/reproduce",
            get(routes_create::handler_reproduce_form).post(routes_create::handler_reproduce),
        )
        .route(
            "/trial/{pk}/reproduce/n1",
            get(routes_create::handler_reproduce_n1_form)
                .post(routes_create::handler_reproduce_n1),
        )
        .route(
            "/tutorial",
            get(routes_tutorial::handler_tutorial).post(routes_tutorial::handler_tutorial_submit),
        )
        .route(
            "/tutorial/example/{id}",
            get(routes_tutorial::handler_example).post(routes_tutorial::handler_example_submit),
        )
        // Detail and contact
        .route("/trial/{pk}", get(routes_detail::handler_detail))
        .route("/trial/question", post(routes_detail::handler_question))
        // Owner administration
        .route(
            "/trial/{pk}/edit",
            get(routes_admin::handler_edit_form).post(routes_admin::handler_edit),
        )
        .route("/trial/{pk}/peek", get(routes_admin::handler_peek))
        .route("/trial/{pk}/stop", post(routes_admin::handler_stop))
        .route("/trial/invite", post(routes_admin::handler_invite))
        // Participation
        .route(
            "/trial/{pk}/join",
            get(routes_participation::handler_join_page).post(routes_participation::handler_join),
        )
        .route(
            "/trial/{pk}/leave",
            get(routes_participation::handler_leave_page)
                .post(routes_participation::handler_leave),
        )
        .route(
            "/trial/{pk}/randomise",
            post(routes_participation::handler_randomise),
        )
        .route(
            "/trial/{pk}/report",
            get(routes_participation::handler_report_form)
                .post(routes_participation::handler_report),
        )
        // Export
        .route("/trial/{pk}/csv", get(routes_export::handler_csv))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(CatchPanicLayer::new())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            request_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        .with_state(state)
}

/// Pick the store, seed tutorial examples, pick the notifier.
pub async fn build_state(config: AppConfig) -> Result<Arc<AppState>> {
    let store: Arc<dyn TrialStore> = match config.database_url.as_deref() {
        Some(url) => {
            let database = Database::connect(url).await?;
            database.migrate().await.context("applying schema")?;
            info!("using PostgreSQL store");
            Arc::new(database)
        }
        None => {
            warn!("no database configured, trials are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    for example in &config.tutorial_examples {
        store
            .add_tutorial_example(example)
            .await
            .with_context(|| format!("seeding tutorial example '{}'", example.question))?;
    }

    if config.jwt_secret.is_none() {
        warn!("no JWT secret configured, bearer tokens are decoded without verification");
    }

    let notifier: Arc<dyn Notifier> = match config.notify_webhook.as_deref() {
        Some(url) => Arc::new(WebhookNotifier::new(url)?),
        None => Arc::new(LogNotifier),
    };

    Ok(AppState::new(store, notifier, config))
}

pub async fn run(config: AppConfig) -> Result<()> {
    let port = config.port;
    let state = build_state(config).await?;
    let app = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "server running");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                ctrl_c.await.ok();
                info!("received SIGINT, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT, shutting down");
    }
}
