// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP API surface: registry, synchronous invocation, and design jobs.
//!
//! Errors surface as problem JSON `{error, details?}` with the status
//! mapping of the gateway error taxonomy.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::application::jobs::{GenerateRequest, JobService};
use crate::application::registry::{PublishRequest, RegistryService};
use crate::application::tracker::JobTracker;
use crate::domain::error::GatewayError;
use crate::domain::job::JobId;
use crate::domain::server::ServerId;
use crate::infrastructure::broker::ToolBroker;
use crate::presentation::{streams, ws};

pub struct AppState {
    pub registry: Arc<RegistryService>,
    pub jobs: Arc<JobService>,
    pub broker: Arc<ToolBroker>,
    pub tracker: Arc<JobTracker>,
    pub start_time: Instant,
}

/// Build the gateway router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v0/servers", get(list_servers))
        .route("/v0/servers/{server_id}", get(get_server))
        .route("/v0/servers/{server_id}", delete(delete_server))
        .route("/v0/publish", post(publish_server))
        .route("/invoke", post(invoke_tool))
        .route("/api/mcp/tools/generate", post(generate))
        .route("/api/mcp/tools/refine", post(refine))
        .route("/api/mcp/tools/job/{job_id}", get(get_job))
        .route("/api/streams/jobs/{job_id}", get(streams::job_stream))
        .route("/ws", get(ws::websocket))
        .with_state(state)
}

/// Problem-JSON error wrapper.
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "error": self.0.to_string(),
            "details": {"code": self.0.code()},
        });
        (status, Json(body)).into_response()
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

#[derive(Deserialize)]
struct ListQuery {
    search: Option<String>,
    capability: Option<String>,
}

async fn list_servers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let servers = state
        .registry
        .list_servers(query.search.as_deref(), query.capability.as_deref())
        .await?;
    Ok(Json(json!(servers)))
}

async fn get_server(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = ServerId::parse(&server_id)?;
    let descriptor = state.registry.get_server(&id).await?;
    Ok(Json(json!(descriptor)))
}

async fn publish_server(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PublishRequest>,
) -> Result<Json<Value>, ApiError> {
    let descriptor = state.registry.publish(request).await?;
    Ok(Json(json!(descriptor)))
}

async fn delete_server(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = ServerId::parse(&server_id)?;
    state.registry.soft_delete(&id).await?;
    Ok(Json(json!({"deleted": id})))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvokeBody {
    server_id: String,
    tool: String,
    #[serde(default)]
    arguments: Value,
}

async fn invoke_tool(
    State(state): State<Arc<AppState>>,
    Json(body): Json<InvokeBody>,
) -> Result<Json<Value>, ApiError> {
    let id = ServerId::parse(&body.server_id)?;
    let descriptor = state.registry.get_server(&id).await?;
    let arguments = if body.arguments.is_null() {
        json!({})
    } else {
        body.arguments
    };
    state
        .registry
        .validate_arguments(&id, &body.tool, &arguments)
        .await?;
    let result = state
        .broker
        .invoke(&descriptor, &body.tool, arguments, None)
        .await?;
    Ok(Json(json!({"result": result})))
}

async fn generate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<Value>, ApiError> {
    let job_id = state.jobs.generate(request).await?;
    Ok(Json(json!({"jobId": job_id})))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefineBody {
    job_id: JobId,
    instructions: String,
}

async fn refine(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefineBody>,
) -> Result<Json<Value>, ApiError> {
    let job_id = state.jobs.refine(body.job_id, body.instructions).await?;
    Ok(Json(json!({"jobId": job_id})))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<JobId>,
) -> Result<Json<Value>, ApiError> {
    let (job, assets) = state.jobs.get_job(job_id).await?;
    Ok(Json(json!({"job": job, "assets": assets})))
}
