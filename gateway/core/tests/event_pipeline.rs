// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end fabric test: publish a stdio server, submit a generation
//! request, let the worker and result consumer drive the job through
//! the topics, then refine the produced asset.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use aegis_mcp_core::application::consumer::ResultConsumer;
use aegis_mcp_core::application::jobs::{GenerateRequest, JobService};
use aegis_mcp_core::application::registry::{PublishRequest, RegistryService};
use aegis_mcp_core::application::tasks::DurableTaskService;
use aegis_mcp_core::application::tracker::JobTracker;
use aegis_mcp_core::application::worker::DesignWorker;
use aegis_mcp_core::domain::job::{JobId, JobStatus};
use aegis_mcp_core::domain::repository::{
    AssetRepository, DurableTaskRepository, JobRepository, ServerRepository,
};
use aegis_mcp_core::domain::server::ServerId;
use aegis_mcp_core::domain::task::DurableTaskStatus;
use aegis_mcp_core::infrastructure::broker::http::{HttpBroker, HttpConfig};
use aegis_mcp_core::infrastructure::broker::stdio::{StdioBroker, StdioConfig};
use aegis_mcp_core::infrastructure::broker::ToolBroker;
use aegis_mcp_core::infrastructure::bus::{
    spawn_consumer, EventBus, EventProducer, ProducerConfig, TopicConfig,
};
use aegis_mcp_core::infrastructure::identity::{IdentityClient, ShapeOnlyVerifier};
use aegis_mcp_core::infrastructure::repositories::{
    InMemoryAssetRepository, InMemoryDurableTaskRepository, InMemoryJobRepository,
    InMemoryServerRepository,
};

/// Line-oriented JSON-RPC server used for both discovery and calls. A
/// fresh child is spawned per invocation, so each run answers one
/// initialize plus one id-2 request.
const SCRIPTED_SERVER: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"method":"initialize"'*) printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05"}}' ;;
    *'"method":"tools/list"'*) printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"generate_svg","description":"Generate an SVG","inputSchema":{"type":"object"}},{"name":"refine_svg","description":"Refine an SVG","inputSchema":{"type":"object"}}]}}'; exit 0 ;;
    *'"name":"refine_svg"'*) printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"<svg width=\"32\"/>"}],"isError":false}}'; exit 0 ;;
    *'"method":"tools/call"'*) printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"<svg width=\"16\"/>"}],"isError":false}}'; exit 0 ;;
  esac
done
"#;

struct Fabric {
    registry: Arc<RegistryService>,
    jobs: Arc<JobService>,
    jobs_repo: Arc<InMemoryJobRepository>,
    assets: Arc<InMemoryAssetRepository>,
    tasks: Arc<InMemoryDurableTaskRepository>,
    cancel: CancellationToken,
}

async fn start_fabric() -> Fabric {
    let servers: Arc<dyn ServerRepository> = Arc::new(InMemoryServerRepository::new());
    let jobs_repo = Arc::new(InMemoryJobRepository::new());
    let assets = Arc::new(InMemoryAssetRepository::new());
    let tasks = Arc::new(InMemoryDurableTaskRepository::new());
    let topics = TopicConfig::default();

    let bus = Arc::new(EventBus::new(256, true));
    let producer = EventProducer::new(bus.clone(), ProducerConfig::default());
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
            tasks.clone() as Arc<dyn DurableTaskRepository>,
        )),
        broker,
        producer.clone(),
        topics.clone(),
        tracker.clone(),
    ));
    let consumer = Arc::new(ResultConsumer::new(
        jobs_repo.clone() as Arc<dyn JobRepository>,
        assets.clone() as Arc<dyn AssetRepository>,
        tracker,
    ));
    let jobs = Arc::new(JobService::new(
        jobs_repo.clone() as Arc<dyn JobRepository>,
        assets.clone() as Arc<dyn AssetRepository>,
        producer.clone(),
        topics.clone(),
        None,
    ));

    let cancel = CancellationToken::new();
    spawn_consumer(
        bus.clone(),
        producer.clone(),
        topics.requests.clone(),
        topics.dlq.clone(),
        "test-workers".into(),
        worker,
        0,
        cancel.clone(),
    );
    spawn_consumer(
        bus,
        producer,
        topics.results.clone(),
        topics.dlq.clone(),
        "test-gateway".into(),
        consumer,
        1,
        cancel.clone(),
    );

    Fabric {
        registry,
        jobs,
        jobs_repo,
        assets,
        tasks,
        cancel,
    }
}

async fn publish_scripted_server(registry: &RegistryService) {
    registry
        .publish(PublishRequest {
            server_id: "io.github.mcpmessenger/mcp-server".into(),
            name: "MCP Messenger".into(),
            description: "Scripted design server".into(),
            version: Some("1.0.0".into()),
            command: Some("sh".into()),
            args: vec!["-c".into(), SCRIPTED_SERVER.into()],
            env: Default::default(),
            endpoint: None,
            headers: Default::default(),
            tools: vec![],
            capabilities: vec!["design".into()],
            manifest: None,
            metadata: None,
            auth_config: None,
        })
        .await
        .expect("publish succeeds");
}

async fn wait_for_terminal(fabric: &Fabric, job_id: JobId) -> aegis_mcp_core::domain::job::Job {
    for _ in 0..200 {
        if let Some(job) = fabric.jobs_repo.find_by_id(job_id).await.unwrap() {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {} did not reach a terminal state", job_id);
}

#[tokio::test]
async fn generate_flows_through_topics_to_completion() {
    let fabric = start_fabric().await;
    publish_scripted_server(&fabric.registry).await;

    // Discovery replaced the submitted (empty) catalog.
    let listed = fabric.registry.list_servers(None, None).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].tools.len(), 2);

    let job_id = fabric
        .jobs
        .generate(GenerateRequest {
            description: "blue minimalist icon".into(),
            style: Some("minimalist".into()),
            color_palette: None,
            size: None,
            server_id: Some("io.github.mcpmessenger/mcp-server".into()),
            user_id: None,
            client_id: None,
        })
        .await
        .unwrap();

    let job = wait_for_terminal(&fabric, job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert!(job.completed_at.is_some());

    let assets = fabric.assets.find_by_job(job_id).await.unwrap();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].version, 1);
    assert!(assets[0].is_latest);

    // The brokered invocation was mirrored as a completed durable task
    // against the server.
    let server_id = ServerId::parse("io.github.mcpmessenger/mcp-server").unwrap();
    let operations = fabric.tasks.find_by_server(&server_id).await.unwrap();
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].status, DurableTaskStatus::Completed);
    assert_eq!(operations[0].progress, 100);
    assert!(operations[0].output.is_some());

    fabric.cancel.cancel();
}

#[tokio::test]
async fn refinement_links_lineage_and_bumps_version() {
    let fabric = start_fabric().await;
    publish_scripted_server(&fabric.registry).await;

    let first = fabric
        .jobs
        .generate(GenerateRequest {
            description: "blue minimalist icon".into(),
            style: None,
            color_palette: None,
            size: None,
            server_id: Some("io.github.mcpmessenger/mcp-server".into()),
            user_id: None,
            client_id: None,
        })
        .await
        .unwrap();
    wait_for_terminal(&fabric, first).await;
    let parent_asset = fabric
        .assets
        .find_latest_for_job(first)
        .await
        .unwrap()
        .unwrap();

    let second = fabric
        .jobs
        .refine(first, "make it larger".into())
        .await
        .unwrap();
    assert_ne!(first, second);

    let refined_job = wait_for_terminal(&fabric, second).await;
    assert_eq!(refined_job.status, JobStatus::Completed);
    assert_eq!(refined_job.parent_job_id, Some(first));

    let refined = fabric
        .assets
        .find_latest_for_job(second)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refined.version, parent_asset.version + 1);
    assert_eq!(refined.parent_job_id, Some(first));
    assert_eq!(refined.parent_asset_id, Some(parent_asset.id));
    assert!(refined.is_latest);

    // The parent job keeps its own latest asset.
    let parent_after = fabric
        .assets
        .find_latest_for_job(first)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parent_after.id, parent_asset.id);
    assert!(parent_after.is_latest);

    fabric.cancel.cancel();
}

#[tokio::test]
async fn refine_rejects_jobs_without_assets() {
    let fabric = start_fabric().await;
    publish_scripted_server(&fabric.registry).await;

    let pending = fabric
        .jobs
        .generate(GenerateRequest {
            description: "icon".into(),
            style: None,
            color_palette: None,
            size: None,
            server_id: Some("io.github.mcpmessenger/mcp-server".into()),
            user_id: None,
            client_id: None,
        })
        .await
        .unwrap();
    // Unknown job outright.
    let missing = fabric
        .jobs
        .refine(JobId::new(), "bigger".into())
        .await
        .unwrap_err();
    assert!(matches!(
        missing,
        aegis_mcp_core::domain::error::GatewayError::NotFound(_)
    ));

    wait_for_terminal(&fabric, pending).await;
    fabric.cancel.cancel();
}
