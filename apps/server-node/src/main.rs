use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{
    ClientStatus, HealthStatus, NodeStatusResponse, NodeSummary, PurgeReport, ReportAck, StatusSample,
};
use serde::Deserialize;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

mod config;
mod poller;
mod registry;
mod service;
mod ui;

use config::ServerConfig;
use registry::{StatusRegistry, SystemClock};
use service::{NodeStatusService, ServiceError};

#[derive(Clone)]
struct ServerState {
    service: Arc<NodeStatusService>,
    retention_ceiling_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    let config = ServerConfig::from_env().context("failed to load server configuration")?;

    let registry = Arc::new(StatusRegistry::new(config.window, Arc::new(SystemClock)));
    let service = Arc::new(NodeStatusService::new(registry));
    let state = ServerState {
        service: service.clone(),
        retention_ceiling_secs: config.retention_ceiling_secs,
    };

    let shutdown = CancellationToken::new();
    let purge_task = tokio::spawn(run_purge_sweep(
        service.clone(),
        config.retention_ceiling_secs,
        Duration::from_secs(config.purge_interval_secs),
        shutdown.clone(),
    ));
    let poller_task = tokio::spawn(poller::run_poller(
        service.clone(),
        config.poll_targets.clone(),
        Duration::from_secs(config.poll_interval_secs),
        Duration::from_secs(config.poll_timeout_secs),
        shutdown.clone(),
    ));

    let app = build_router(state, &config);

    info!(
        bind_addr = %config.bind_addr,
        website_dir = %config.website_dir.display(),
        poll_targets = config.poll_targets.len(),
        "badnode server listening"
    );
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            serve_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    let (purge_result, poller_result) = tokio::join!(purge_task, poller_task);
    log_task_exit("purge sweep", purge_result);
    log_task_exit("node poller", poller_result);
    service.shutdown();

    Ok(())
}

fn build_router(state: ServerState, config: &ServerConfig) -> Router {
    let website = &config.website_dir;

    Router::new()
        .route("/", get(ui::index))
        .route("/health", get(health))
        .route("/openapi.json", get(ui::openapi))
        .route("/nodes", get(list_nodes))
        .route("/nodes/{node_id}/status", post(report_status).get(get_status))
        .route("/admin/purge", post(purge_nodes))
        .route_service("/favicon.ico", ServeFile::new(website.join("favicon.ico")))
        .nest_service("/assets", ServeDir::new(website.join("assets")))
        .nest_service("/icons", ServeDir::new(website.join("icons")))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Returns false when the task panicked or was aborted.
fn log_task_exit(task: &'static str, result: Result<(), JoinError>) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            error!(task, error = %err, "background task ended abnormally");
            false
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c; shutting down");
    }
    info!("shutdown requested");
}

/// Periodically drops nodes not seen within the retention ceiling.
async fn run_purge_sweep(
    service: Arc<NodeStatusService>,
    retention_ceiling_secs: u64,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; nothing can be stale at startup.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if !service.registry().is_empty() {
                    service.purge_unseen_for(retention_ceiling_secs);
                }
            }
        }
    }
}

async fn health(State(state): State<ServerState>) -> Json<HealthStatus> {
    let counts = state.service.counts();
    Json(HealthStatus {
        role: "badnode-server".to_string(),
        online: true,
        total_nodes: counts.total,
        healthy_nodes: counts.healthy,
        bad_nodes: counts.bad,
    })
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        error_response(StatusCode::BAD_REQUEST, self.to_string())
    }
}

async fn report_status(
    State(state): State<ServerState>,
    Path(node_id): Path<String>,
    payload: Result<Json<StatusSample>, JsonRejection>,
) -> Result<(StatusCode, Json<ReportAck>), ServiceError> {
    let Json(sample) = payload
        .map_err(|rejection| state.service.reject("report", Some(&node_id), rejection.body_text()))?;
    let ack = state.service.report(&node_id, sample)?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

async fn get_status(
    State(state): State<ServerState>,
    Path(node_id): Path<String>,
) -> Result<Json<NodeStatusResponse>, ServiceError> {
    state.service.query(&node_id).map(Json)
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    health: Option<String>,
}

async fn list_nodes(
    State(state): State<ServerState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<NodeSummary>>, ServiceError> {
    let Query(query) =
        query.map_err(|rejection| state.service.reject("list", None, rejection.body_text()))?;
    state.service.list(query.health.as_deref()).map(Json)
}

#[derive(Debug, Deserialize)]
struct PurgeQuery {
    older_than_unix: Option<u64>,
    unseen_for_secs: Option<u64>,
}

async fn purge_nodes(
    State(state): State<ServerState>,
    query: Result<Query<PurgeQuery>, QueryRejection>,
) -> Result<Json<PurgeReport>, ServiceError> {
    let Query(query) =
        query.map_err(|rejection| state.service.reject("purge", None, rejection.body_text()))?;

    let report = match (query.older_than_unix, query.unseen_for_secs) {
        (Some(older_than_unix), None) => state.service.purge(older_than_unix),
        (None, Some(unseen_for_secs)) => state.service.purge_unseen_for(unseen_for_secs),
        _ => {
            return Err(state.service.reject(
                "purge",
                None,
                "pass exactly one of older_than_unix or unseen_for_secs",
            ));
        }
    };

    Ok(Json(report))
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
