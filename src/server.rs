//! HTTP surface: health, metrics and the upgrade control endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use prometheus_client::registry::Registry;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::VuoError;
use crate::orchestrator::Orchestrator;
use crate::refresh::Refresher;
use crate::state::UpgradeState;

/// Shared readiness state.
#[derive(Clone, Default)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub refresher: Refresher,
    pub registry: Arc<Registry>,
    pub health: HealthState,
}

#[derive(Deserialize)]
pub struct IgnoreAlertsRequest {
    pub enabled: bool,
}

/// Body of `GET /api/domains/{id}/status`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainStatus {
    pub domain_id: String,
    pub running: bool,
    pub ignore_alerts: bool,
    #[serde(flatten)]
    pub state: UpgradeState,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/domains", get(list_domains))
        .route("/api/domains/refresh", post(refresh_domains))
        .route("/api/capacity", get(capacity))
        .route("/api/domains/{id}/upgrade", post(start_upgrade))
        .route("/api/domains/{id}/acknowledge", post(acknowledge))
        .route("/api/domains/{id}/abandon", post(abandon))
        .route("/api/domains/{id}/status", get(domain_status))
        .route("/api/domains/{id}/ignore-alerts", put(set_ignore_alerts))
        .with_state(state)
}

/// Serve the router until `shutdown` is cancelled.
pub async fn serve(port: u16, state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    state.health.set_ready(true);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Server shutting down");
        })
        .await?;
    Ok(())
}

fn error_body(status: StatusCode, err: &VuoError) -> Response {
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<AppState>) -> StatusCode {
    if state.health.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match crate::metrics::render(&state.registry) {
        Ok(body) => (StatusCode::OK, body),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics".to_string(),
        ),
    }
}

async fn list_domains(State(state): State<AppState>) -> Response {
    match state.refresher.cache().updates() {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "No refresh has completed yet" })),
        )
            .into_response(),
    }
}

async fn refresh_domains(State(state): State<AppState>) -> Response {
    match state.refresher.refresh_updates().await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => {
            error!(error = %e, "Requested refresh failed");
            error_body(StatusCode::BAD_GATEWAY, &e)
        }
    }
}

async fn capacity(State(state): State<AppState>) -> Response {
    match state.refresher.cache().capacity() {
        Some(rows) => (StatusCode::OK, Json(rows)).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "No capacity refresh has completed yet" })),
        )
            .into_response(),
    }
}

async fn start_upgrade(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.start_upgrade(&id) {
        Ok(run_id) => (
            StatusCode::ACCEPTED,
            Json(json!({ "domainId": id, "runId": run_id })),
        )
            .into_response(),
        Err(e @ VuoError::RunInProgress(_)) => {
            warn!(domain = %id, "Rejected upgrade request: run in progress");
            error_body(StatusCode::CONFLICT, &e)
        }
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn acknowledge(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.orchestrator.acknowledge(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn abandon(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.orchestrator.abandon(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn domain_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<DomainStatus> {
    let sink = state.orchestrator.sink();
    Json(DomainStatus {
        running: state.orchestrator.is_running(&id),
        ignore_alerts: sink.ignore_alerts(&id),
        state: sink.state(&id),
        domain_id: id,
    })
}

async fn set_ignore_alerts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IgnoreAlertsRequest>,
) -> StatusCode {
    if !is_known_domain(&state, &id) {
        warn!(domain = %id, "Rejected ignore-alerts update for unknown domain");
        return StatusCode::NOT_FOUND;
    }
    info!(domain = %id, enabled = body.enabled, "Ignore-alerts flag updated");
    state.orchestrator.sink().set_ignore_alerts(&id, body.enabled);
    StatusCode::NO_CONTENT
}

/// A domain is known once it has run state, appears in the last refresh, or
/// already carries the ignore-alerts flag.
fn is_known_domain(state: &AppState, id: &str) -> bool {
    let sink = state.orchestrator.sink();
    sink.has_state(id)
        || sink.ignore_alerts(id)
        || state
            .refresher
            .cache()
            .updates()
            .is_some_and(|snapshot| snapshot.domains.iter().any(|d| d.id == id))
}
