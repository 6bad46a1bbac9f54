// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Gateway daemon: wiring, consumer lifecycle, and graceful shutdown.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use aegis_mcp_core::application::consumer::ResultConsumer;
use aegis_mcp_core::application::handover::HandoverConsumer;
use aegis_mcp_core::application::healer::{Healer, HealerConfig};
use aegis_mcp_core::application::jobs::{JobService, SyncPipeline};
use aegis_mcp_core::application::memory::MemoryService;
use aegis_mcp_core::application::registry::RegistryService;
use aegis_mcp_core::application::tasks::DurableTaskService;
use aegis_mcp_core::application::tracker::JobTracker;
use aegis_mcp_core::application::vault::{ConsentService, TokenVault};
use aegis_mcp_core::application::worker::DesignWorker;
use aegis_mcp_core::config::GatewayConfig;
use aegis_mcp_core::domain::repository::{
    AssetRepository, ConsentRepository, DurableTaskRepository, JobRepository, MemoryRepository,
    ServerRepository,
};
use aegis_mcp_core::infrastructure::broker::http::{HttpBroker, HttpConfig};
use aegis_mcp_core::infrastructure::broker::stdio::{StdioBroker, StdioConfig};
use aegis_mcp_core::infrastructure::bus::{
    spawn_consumer, spawn_dlq_consumer, EventBus, EventProducer, ProducerConfig,
};
use aegis_mcp_core::infrastructure::crypto::TokenCipher;
use aegis_mcp_core::infrastructure::identity::{IdentityClient, ShapeOnlyVerifier};
use aegis_mcp_core::infrastructure::oauth::OAuthHttpClient;
use aegis_mcp_core::infrastructure::repositories::{
    postgres_asset::PostgresAssetRepository, postgres_consent::PostgresConsentRepository,
    postgres_job::PostgresJobRepository, postgres_memory::PostgresMemoryRepository,
    postgres_server::PostgresServerRepository, postgres_task::PostgresDurableTaskRepository,
    InMemoryAssetRepository, InMemoryConsentRepository, InMemoryDurableTaskRepository,
    InMemoryJobRepository, InMemoryMemoryRepository, InMemoryServerRepository,
};
use aegis_mcp_core::presentation::api::{app, AppState};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub async fn run(port_override: Option<u16>) -> Result<()> {
    let mut config = GatewayConfig::from_env();
    if let Some(port) = port_override {
        config.port = port;
    }
    if config.uses_dev_encryption_secret() {
        warn!("ENCRYPTION_SECRET not set; token vault is using the development secret");
    }

    // Store layer: PostgreSQL when configured, in-memory otherwise.
    let pool = match config.database_url.as_deref() {
        Some(url) => {
            info!("connecting to PostgreSQL");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .context("failed to connect to PostgreSQL")?;
            MIGRATOR
                .run(&pool)
                .await
                .context("failed to apply migrations")?;
            info!("database migrations applied");
            Some(pool)
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory repositories");
            None
        }
    };

    let (servers, jobs_repo, assets, consents, memory_repo, tasks_repo): (
        Arc<dyn ServerRepository>,
        Arc<dyn JobRepository>,
        Arc<dyn AssetRepository>,
        Arc<dyn ConsentRepository>,
        Arc<dyn MemoryRepository>,
        Arc<dyn DurableTaskRepository>,
    ) = match pool.as_ref() {
        Some(pool) => (
            Arc::new(PostgresServerRepository::new(pool.clone())),
            Arc::new(PostgresJobRepository::new(pool.clone())),
            Arc::new(PostgresAssetRepository::new(pool.clone())),
            Arc::new(PostgresConsentRepository::new(pool.clone())),
            Arc::new(PostgresMemoryRepository::new(pool.clone())),
            Arc::new(PostgresDurableTaskRepository::new(pool.clone())),
        ),
        None => (
            Arc::new(InMemoryServerRepository::new()),
            Arc::new(InMemoryJobRepository::new()),
            Arc::new(InMemoryAssetRepository::new()),
            Arc::new(InMemoryConsentRepository::new()),
            Arc::new(InMemoryMemoryRepository::new()),
            Arc::new(InMemoryDurableTaskRepository::new()),
        ),
    };

    // Event fabric.
    let bus = Arc::new(EventBus::new(1024, config.events_enabled));
    let producer = EventProducer::new(bus.clone(), ProducerConfig::default());
    if !config.events_enabled {
        warn!("event bus disabled; requests run through direct invocation");
    }

    // Transports.
    let stdio = Arc::new(StdioBroker::new(StdioConfig::default()));
    let broker = Arc::new(aegis_mcp_core::infrastructure::broker::ToolBroker::new(
        stdio.clone(),
        HttpBroker::new(HttpConfig::default()),
    ));

    // Services.
    let registry = Arc::new(RegistryService::new(
        servers.clone(),
        IdentityClient::new(),
        Arc::new(ShapeOnlyVerifier),
        stdio,
    ));
    let tracker = Arc::new(JobTracker::new(256));
    let memory_service = Arc::new(MemoryService::new(memory_repo));
    let task_service = Arc::new(DurableTaskService::new(tasks_repo));
    let worker = Arc::new(DesignWorker::new(
        servers.clone(),
        jobs_repo.clone(),
        assets.clone(),
        task_service,
        broker.clone(),
        producer.clone(),
        config.topics.clone(),
        tracker.clone(),
    ));
    let result_consumer = Arc::new(ResultConsumer::new(
        jobs_repo.clone(),
        assets.clone(),
        tracker.clone(),
    ));
    let job_service = Arc::new(JobService::new(
        jobs_repo,
        assets,
        producer.clone(),
        config.topics.clone(),
        Some(SyncPipeline {
            worker: worker.clone(),
            consumer: result_consumer.clone(),
        }),
    ));

    let cipher = Arc::new(
        TokenCipher::new(&config.encryption_secret, &config.encryption_salt)
            .context("invalid encryption configuration")?,
    );
    // Held by the process for consent flows and token refresh; the HTTP
    // surface for these is internal-only.
    let _vault = TokenVault::new(servers, cipher, OAuthHttpClient::new());
    let _consent = ConsentService::new(consents);

    // Consumer groups.
    let cancel = CancellationToken::new();
    let mut consumer_tasks = Vec::new();
    if config.events_enabled {
        consumer_tasks.push(spawn_consumer(
            bus.clone(),
            producer.clone(),
            config.topics.requests.clone(),
            config.topics.dlq.clone(),
            config.groups.workers.clone(),
            worker,
            0,
            cancel.clone(),
        ));
        consumer_tasks.push(spawn_consumer(
            bus.clone(),
            producer.clone(),
            config.topics.results.clone(),
            config.topics.dlq.clone(),
            config.groups.gateway.clone(),
            result_consumer,
            1,
            cancel.clone(),
        ));
        consumer_tasks.push(spawn_consumer(
            bus.clone(),
            producer.clone(),
            config.topics.all_topic(),
            config.topics.dlq.clone(),
            config.groups.handover.clone(),
            Arc::new(HandoverConsumer::new(registry.clone(), memory_service)),
            0,
            cancel.clone(),
        ));
        let healer = Arc::new(Healer::new(
            registry.clone(),
            producer.clone(),
            config.topics.clone(),
            HealerConfig::default(),
            cancel.clone(),
        ));
        consumer_tasks.push(spawn_dlq_consumer(
            bus.clone(),
            config.topics.dlq.clone(),
            config.groups.healer.clone(),
            healer,
            cancel.clone(),
        ));
    }

    if config.metrics_port != 0 {
        let address = std::net::SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(address)
            .install()
            .context("failed to start metrics exporter")?;
        info!(%address, "Prometheus exporter listening");
    }

    // HTTP surface.
    let state = Arc::new(AppState {
        registry,
        jobs: job_service,
        broker,
        tracker,
        start_time: Instant::now(),
    });
    let cors = match config.cors_origin.as_deref() {
        Some(origin) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin.parse().context("invalid CORS_ORIGIN")?))
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::permissive(),
    };
    let router = app(state).layer(cors);

    let address = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind to {}", address))?;
    info!(%address, "gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    // Orderly teardown: stop consumers, then drop the pool.
    cancel.cancel();
    for task in consumer_tasks {
        let _ = task.await;
    }
    drop(pool);
    info!("gateway shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C");
        },
        _ = terminate => {
            info!("received SIGTERM");
        },
    }
}
