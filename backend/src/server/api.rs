//! HTTP API surface.
//!
//! Identity arrives as a gateway-injected `X-User-Email` header; everything
//! under `/api/v1` is scoped to that owner. The status PUT is the one
//! exception: controllers identify themselves in the report body.

use anyhow::{Context, Result};
use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use bosun_common::auth::{AuthSettings, UserEmail};

use crate::error::Error;
use crate::models::{
    Condition, CreateClusterRequest, ListClustersRequest, StatusReport, UpdateClusterRequest,
};

use super::AppState;

/// Status upsert body; the cluster id comes from the path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReportBody {
    pub controller_name: String,
    pub observed_generation: i64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub force: bool,
}

pub async fn run_server(
    cancel: CancellationToken,
    port: u16,
    state: AppState,
    auth: AuthSettings,
) -> Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/v1/clusters", get(list_clusters).post(create_cluster))
        .route(
            "/api/v1/clusters/{id}",
            get(get_cluster).put(update_cluster).delete(delete_cluster),
        )
        .route(
            "/api/v1/clusters/{id}/status",
            get(get_cluster_status).put(put_cluster_status),
        )
        .layer(axum::middleware::from_fn(
            bosun_common::access_log::public_error_only,
        ))
        .layer(Extension(auth))
        .layer(cors)
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .context("failed to bind API server")?;
    tracing::info!(%addr, "starting API server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .context("API server failed")?;

    tracing::info!("API server stopped gracefully");
    Ok(())
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    "OK"
}

/// List the caller's clusters
pub async fn list_clusters(
    State(state): State<AppState>,
    UserEmail(owner): UserEmail,
    Query(req): Query<ListClustersRequest>,
) -> Result<impl IntoResponse, Error> {
    let response = state.service.list_clusters(&owner, req).await?;
    Ok(Json(response))
}

/// Create a new cluster
pub async fn create_cluster(
    State(state): State<AppState>,
    UserEmail(owner): UserEmail,
    Json(req): Json<CreateClusterRequest>,
) -> Result<impl IntoResponse, Error> {
    let cluster = state.service.create_cluster(&owner, req).await?;
    Ok((StatusCode::CREATED, Json(cluster)))
}

/// Get a cluster by ID
pub async fn get_cluster(
    State(state): State<AppState>,
    UserEmail(owner): UserEmail,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
    let cluster = state.service.get_cluster(&owner, id).await?;
    Ok(Json(cluster))
}

/// Replace a cluster's spec
pub async fn update_cluster(
    State(state): State<AppState>,
    UserEmail(owner): UserEmail,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateClusterRequest>,
) -> Result<impl IntoResponse, Error> {
    let cluster = state.service.update_cluster(&owner, id, req).await?;
    Ok(Json(cluster))
}

/// Soft-delete a cluster. Refuses active clusters unless `force=true`.
pub async fn delete_cluster(
    State(state): State<AppState>,
    UserEmail(owner): UserEmail,
    Path(id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> Result<impl IntoResponse, Error> {
    state.service.delete_cluster(&owner, id, query.force).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// Aggregate status for a cluster
pub async fn get_cluster_status(
    State(state): State<AppState>,
    UserEmail(owner): UserEmail,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
    let status = state.service.aggregate_status(&owner, id).await?;
    Ok(Json(status))
}

/// Controller status upsert. Controller identity is required in the body;
/// the owner header plays no part here.
pub async fn put_cluster_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusReportBody>,
) -> Result<impl IntoResponse, Error> {
    if body.controller_name.trim().is_empty() {
        return Err(Error::Unauthorized("controller identity required".into()));
    }
    let report = StatusReport {
        cluster_id: id,
        controller_name: body.controller_name,
        observed_generation: body.observed_generation,
        conditions: body.conditions,
        metadata: body.metadata,
    };
    state.service.record_status(report).await?;
    Ok(StatusCode::NO_CONTENT)
}
