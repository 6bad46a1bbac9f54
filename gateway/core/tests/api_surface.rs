// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP surface test over the in-memory stack with the event bus
//! disabled, exercising the degraded direct-invocation mode.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use aegis_mcp_core::application::consumer::ResultConsumer;
use aegis_mcp_core::application::jobs::{JobService, SyncPipeline};
use aegis_mcp_core::application::registry::RegistryService;
use aegis_mcp_core::application::tasks::DurableTaskService;
use aegis_mcp_core::application::tracker::JobTracker;
use aegis_mcp_core::application::worker::DesignWorker;
use aegis_mcp_core::domain::repository::{
    AssetRepository, DurableTaskRepository, JobRepository, ServerRepository,
};
use aegis_mcp_core::infrastructure::broker::http::{HttpBroker, HttpConfig};
use aegis_mcp_core::infrastructure::broker::stdio::{StdioBroker, StdioConfig};
use aegis_mcp_core::infrastructure::broker::ToolBroker;
use aegis_mcp_core::infrastructure::bus::{EventBus, EventProducer, ProducerConfig, TopicConfig};
use aegis_mcp_core::infrastructure::identity::{IdentityClient, ShapeOnlyVerifier};
use aegis_mcp_core::infrastructure::repositories::{
    InMemoryAssetRepository, InMemoryDurableTaskRepository, InMemoryJobRepository,
    InMemoryServerRepository,
};
use aegis_mcp_core::presentation::api::{app, AppState};

const SCRIPTED_SERVER: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"method":"initialize"'*) printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{}}' ;;
    *'"method":"tools/list"'*) printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"generate_svg","description":"Generate an SVG","inputSchema":{"type":"object","properties":{"description":{"type":"string"}},"required":["description"]}}]}}'; exit 0 ;;
    *'"method":"tools/call"'*) printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"<svg/>"}],"isError":false}}'; exit 0 ;;
  esac
done
"#;

fn build_app() -> (axum::Router, Arc<InMemoryJobRepository>) {
    let servers: Arc<dyn ServerRepository> = Arc::new(InMemoryServerRepository::new());
    let jobs_repo = Arc::new(InMemoryJobRepository::new());
    let assets = Arc::new(InMemoryAssetRepository::new());
    let topics = TopicConfig::default();

    // Bus disabled: requests run through the direct pipeline.
    let bus = Arc::new(EventBus::new(16, false));
    let producer = EventProducer::new(bus, ProducerConfig::default());
    let stdio = Arc::new(StdioBroker::new(StdioConfig {
        init_timeout: Duration::from_secs(5),
        call_timeout: Duration::from_secs(5),
        discovery_timeout: Duration::from_secs(5),
        ..StdioConfig::default()
    }));
    let broker = Arc::new(ToolBroker::new(
        stdio.clone(),
        HttpBroker::new(HttpConfig::default()),
    ));
    let registry = Arc::new(RegistryService::new(
        servers.clone(),
        IdentityClient::new(),
        Arc::new(ShapeOnlyVerifier),
        stdio,
    ));
    let tracker = Arc::new(JobTracker::new(64));
    let worker = Arc::new(DesignWorker::new(
        servers,
        jobs_repo.clone() as Arc<dyn JobRepository>,
        assets.clone() as Arc<dyn AssetRepository>,
        Arc::new(DurableTaskService::new(
            Arc::new(InMemoryDurableTaskRepository::new()) as Arc<dyn DurableTaskRepository>,
        )),
        broker.clone(),
        producer.clone(),
        topics.clone(),
        tracker.clone(),
    ));
    let consumer = Arc::new(ResultConsumer::new(
        jobs_repo.clone() as Arc<dyn JobRepository>,
        assets.clone() as Arc<dyn AssetRepository>,
        tracker.clone(),
    ));
    let jobs = Arc::new(JobService::new(
        jobs_repo.clone() as Arc<dyn JobRepository>,
        assets as Arc<dyn AssetRepository>,
        producer,
        topics,
        Some(SyncPipeline { worker, consumer }),
    ));

    let state = Arc::new(AppState {
        registry,
        jobs,
        broker,
        tracker,
        start_time: Instant::now(),
    });
    (app(state), jobs_repo)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn publish_body() -> Value {
    json!({
        "serverId": "io.github.mcpmessenger/mcp-server",
        "name": "MCP Messenger",
        "description": "Scripted design server",
        "command": "sh",
        "args": ["-c", SCRIPTED_SERVER],
        "capabilities": ["design"],
    })
}

async fn publish(router: &axum::Router) {
    let response = router
        .clone()
        .oneshot(
            Request::post("/v0/publish")
                .header("content-type", "application/json")
                .body(Body::from(publish_body().to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_reports_ok() {
    let (router, _jobs) = build_app();
    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn publish_then_fetch_with_encoded_id() {
    let (router, _jobs) = build_app();
    publish(&router).await;

    let response = router
        .clone()
        .oneshot(
            Request::get("/v0/servers/io.github.mcpmessenger%2Fmcp-server")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["serverId"], "io.github.mcpmessenger/mcp-server");
    // Discovery filled the catalog from the live server.
    assert_eq!(body["tools"].as_array().unwrap().len(), 1);

    let listed = router
        .clone()
        .oneshot(
            Request::get("/v0/servers?search=messenger&capability=design")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(listed).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_publish_is_a_400_problem() {
    let (router, _jobs) = build_app();
    let response = router
        .oneshot(
            Request::post("/v0/publish")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"serverId": "missing-slash", "name": "x"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["details"]["code"], "invalid_argument");
    assert!(body["error"].as_str().unwrap().contains("serverId"));
}

#[tokio::test]
async fn unknown_server_is_a_404_problem() {
    let (router, _jobs) = build_app();
    let response = router
        .oneshot(
            Request::post("/invoke")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "serverId": "acme/ghost",
                        "tool": "generate_svg",
                        "arguments": {},
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invoke_validates_arguments_against_tool_schema() {
    let (router, _jobs) = build_app();
    publish(&router).await;

    let rejected = router
        .clone()
        .oneshot(
            Request::post("/invoke")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "serverId": "io.github.mcpmessenger/mcp-server",
                        "tool": "generate_svg",
                        "arguments": {"unexpected": true},
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

    let accepted = router
        .clone()
        .oneshot(
            Request::post("/invoke")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "serverId": "io.github.mcpmessenger/mcp-server",
                        "tool": "generate_svg",
                        "arguments": {"description": "icon"},
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::OK);
    let body = body_json(accepted).await;
    assert_eq!(body["result"]["isError"], false);
    assert_eq!(body["result"]["content"][0]["type"], "text");
    assert_eq!(body["result"]["content"][0]["text"], "<svg/>");
}

#[tokio::test]
async fn generate_runs_direct_pipeline_when_bus_disabled() {
    let (router, jobs_repo) = build_app();
    publish(&router).await;

    let response = router
        .clone()
        .oneshot(
            Request::post("/api/mcp/tools/generate")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "description": "blue minimalist icon",
                        "serverId": "io.github.mcpmessenger/mcp-server",
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let job_id = body["jobId"].as_str().unwrap().to_string();

    // Direct pipeline finishes shortly after the accept.
    let mut completed = false;
    for _ in 0..200 {
        let uuid = uuid::Uuid::parse_str(&job_id).unwrap();
        if let Some(job) = jobs_repo
            .find_by_id(aegis_mcp_core::domain::job::JobId(uuid))
            .await
            .unwrap()
        {
            if job.status.is_terminal() {
                completed = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(completed, "direct pipeline never finished");

    let details = router
        .clone()
        .oneshot(
            Request::get(format!("/api/mcp/tools/job/{}", job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(details.status(), StatusCode::OK);
    let body = body_json(details).await;
    assert_eq!(body["job"]["status"], "COMPLETED");
    assert_eq!(body["job"]["progress"], 100);
    assert_eq!(body["assets"][0]["version"], 1);
    assert_eq!(body["assets"][0]["isLatest"], true);
}
