use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use portfoliofy_handle_registry::{IdentityRegistry, RegistryError, Rejection};
use serde::Serialize;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::handles::{
    handle_availability, handle_claim, handle_lookup_identity, handle_release_handle,
    handle_release_identity, handle_rename, handle_resolve,
};

/// Message shown for every infrastructure failure. Carries no handle-specific
/// detail.
pub const GENERIC_FAILURE_MESSAGE: &str = "something went wrong, try again";

/// Key probed by `/health` to confirm the store answers.
const HEALTH_PROBE_KEY: &str = "health:probe";

/// Claim and rename bodies are two short strings.
const MAX_BODY_BYTES: usize = 16 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<IdentityRegistry>,
    pub start_time: Instant,
    pub node_id: String,
    pub req_count: Arc<AtomicUsize>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(registry: Arc<IdentityRegistry>, node_id: impl Into<String>) -> Self {
        Self {
            registry,
            start_time: Instant::now(),
            node_id: node_id.into(),
            req_count: Arc::new(AtomicUsize::new(0)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics = handle;
        self
    }

    pub(crate) fn record_request(&self, route: &'static str) -> u64 {
        metrics::counter!("http_requests_total", "route" => route).increment(1);
        self.req_count.fetch_add(1, Ordering::Relaxed) as u64 + 1
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

pub(crate) type SharedState = Arc<AppState>;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    node_id: String,
    backend: &'static str,
    store_reachable: bool,
    uptime_seconds: u64,
    req_total: u64,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<Rejection>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    reason: Option<Rejection>,
}

impl ApiError {
    fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
            reason: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn reason(&self) -> Option<Rejection> {
        self.reason
    }

    /// Business rejection, surfaced so the UI can show an inline message.
    pub fn rejected(reason: Rejection) -> Self {
        let (status, message) = match reason {
            Rejection::Reserved => (StatusCode::CONFLICT, "this username is reserved"),
            Rejection::Taken => (StatusCode::CONFLICT, "this username is already taken"),
            Rejection::AlreadyBound => (
                StatusCode::CONFLICT,
                "this account already has a username",
            ),
            Rejection::NotBound => (StatusCode::NOT_FOUND, "no username is bound"),
            Rejection::InvalidHandle => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "usernames are 3 or more characters of a-z, 0-9 and '-'",
            ),
            Rejection::InvalidIdentity => {
                (StatusCode::UNPROCESSABLE_ENTITY, "identity must not be empty")
            }
            Rejection::PartialWrite => {
                (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE_MESSAGE)
            }
        };
        Self {
            status,
            message: message.to_string(),
            reason: Some(reason),
        }
    }

    pub(crate) fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn service_unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        warn!("Registry failure: {}", err);
        Self::service_unavailable(GENERIC_FAILURE_MESSAGE)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let payload = Json(ErrorResponse {
            ok: false,
            error: self.message,
            reason: self.reason,
        });
        (self.status, payload).into_response()
    }
}

pub async fn start_server(state: AppState, addr: &str) -> Result<()> {
    let shared = Arc::new(state);
    let app = build_router(shared);
    let listener = bind_listener(addr).await?;
    info!("HTTP API listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server terminated unexpectedly")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn bind_listener(addr: &str) -> Result<tokio::net::TcpListener> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        tokio::net::TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {socket_addr}"))
    } else {
        tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {addr}"))
    }
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .route("/handles/claim", post(handle_claim))
        .route("/handles/rename", post(handle_rename))
        .route("/handles/:handle/availability", get(handle_availability))
        .route(
            "/handles/:handle",
            get(handle_resolve).delete(handle_release_handle),
        )
        .route("/identities/:identity/handle", get(handle_lookup_identity))
        .route("/identities/:identity", delete(handle_release_identity))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let req_total = state.record_request("health");
    let store = state.registry.store();
    let store_reachable = match store.exists(HEALTH_PROBE_KEY).await {
        Ok(_) => true,
        Err(err) => {
            warn!("Health probe against {} failed: {}", store.backend(), err);
            false
        }
    };

    Json(HealthResponse {
        status: if store_reachable { "ok" } else { "degraded" },
        node_id: state.node_id.clone(),
        backend: store.backend(),
        store_reachable,
        uptime_seconds: state.uptime_seconds(),
        req_total,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_metrics(State(state): State<SharedState>) -> Result<Response, ApiError> {
    state.record_request("metrics");
    let Some(handle) = state.metrics.as_ref() else {
        return Err(ApiError::service_unavailable(
            "metrics exporter is disabled",
        ));
    };

    let mut response = handle.render().into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    Ok(response)
}
