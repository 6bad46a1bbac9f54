// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Design Worker
//!
//! Consumes the request topic. For each request: moves the job to
//! `PROCESSING`, resolves the target server, invokes the generation tool
//! through the transport broker under a timeout, records the produced
//! asset, and publishes `DesignReady` or `DesignFailed` on the result
//! topic. The worker never marks a job terminal; the result topic is the
//! single source of truth for completion, which keeps workers
//! horizontally scalable and the audit trail replayable.
//!
//! Progress checkpoints are fixed: 10 on pickup, 30 before the tool
//! call, 70 after it returns, 90 once the asset is stored.
//!
//! Every brokered invocation is also mirrored as a durable task against
//! the target server, so operators can audit remote operations per
//! server independently of the job log. Task bookkeeping failures are
//! logged and never fail the job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::application::tasks::DurableTaskService;
use crate::application::tracker::JobTracker;
use crate::domain::asset::{Asset, AssetContent};
use crate::domain::error::GatewayError;
use crate::domain::events::{BusEvent, DesignFailed, DesignReady, DesignRequest};
use crate::domain::job::Job;
use crate::domain::repository::{AssetRepository, JobRepository, ServerRepository};
use crate::domain::server::ServerDescriptor;
use crate::domain::task::DurableTaskStatus;
use crate::infrastructure::broker::{ContentPart, InvokeResult, ToolBroker};
use crate::infrastructure::bus::{EventHandler, EventProducer, TopicConfig};

const GENERATE_TOOL: &str = "generate_svg";
const REFINE_TOOL: &str = "refine_svg";

pub struct DesignWorker {
    servers: Arc<dyn ServerRepository>,
    jobs: Arc<dyn JobRepository>,
    assets: Arc<dyn AssetRepository>,
    tasks: Arc<DurableTaskService>,
    broker: Arc<ToolBroker>,
    producer: EventProducer,
    topics: TopicConfig,
    tracker: Arc<JobTracker>,
}

impl DesignWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        servers: Arc<dyn ServerRepository>,
        jobs: Arc<dyn JobRepository>,
        assets: Arc<dyn AssetRepository>,
        tasks: Arc<DurableTaskService>,
        broker: Arc<ToolBroker>,
        producer: EventProducer,
        topics: TopicConfig,
        tracker: Arc<JobTracker>,
    ) -> Self {
        Self {
            servers,
            jobs,
            assets,
            tasks,
            broker,
            producer,
            topics,
            tracker,
        }
    }

    /// Process one request and return the result event. Public so the
    /// bus-disabled deployment mode can run the pipeline in-request.
    pub async fn process(&self, request: DesignRequest) -> BusEvent {
        match self.try_process(&request).await {
            Ok(ready) => BusEvent::Ready(ready),
            Err(err) => {
                warn!(job_id = %request.job_id, %err, "design request failed");
                BusEvent::Failed(DesignFailed {
                    job_id: request.job_id,
                    server_id: request.server_id.clone(),
                    error_message: err.to_string(),
                    retryable: err.is_retryable(),
                    retry_count: request.retry_count,
                })
            }
        }
    }

    async fn try_process(&self, request: &DesignRequest) -> Result<DesignReady, GatewayError> {
        let mut job = self
            .jobs
            .find_by_id(request.job_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("job {}", request.job_id)))?;

        // Replays of an already-produced job return the existing asset.
        if job.status.is_terminal() && request.retry_count == 0 {
            if let Some(asset) = self.assets.find_latest_for_job(job.id).await? {
                return Ok(ready_event(&job, &asset));
            }
        }

        if request.retry_count > 0 {
            job.resume_processing()?;
            job.set_progress(job.progress.max(10), Some("retrying".into()))?;
        } else {
            job.start_processing(10)?;
        }
        self.jobs.save(&job).await?;
        self.tracker.notify_status(&job);

        let descriptor = self.resolve_server(request).await?;
        let tool = pick_tool(&descriptor, request.refinement)?;
        let arguments = self.build_arguments(request).await?;

        self.checkpoint(&mut job, 30, "invoking tool server").await?;

        // Mirror the remote operation as a durable task on the target
        // server.
        let operation = match self
            .tasks
            .track(descriptor.server_id.clone(), None)
            .await
        {
            Ok(task) => Some(task),
            Err(err) => {
                warn!(server = %descriptor.server_id, %err, "could not record durable operation");
                None
            }
        };

        let timeout = request.timeout_secs.map(Duration::from_secs);
        let invoked = self
            .broker
            .invoke(&descriptor, &tool, arguments, timeout)
            .await;

        if let Some(operation) = &operation {
            let (status, progress, output, error) = match &invoked {
                Ok(result) if !result.is_error => (
                    DurableTaskStatus::Completed,
                    100,
                    result.first_text().map(|text| json!({"content": text})),
                    None,
                ),
                Ok(result) => (
                    DurableTaskStatus::Failed,
                    job.progress,
                    None,
                    Some(
                        result
                            .first_text()
                            .unwrap_or("tool reported an error")
                            .to_string(),
                    ),
                ),
                Err(err) => (
                    DurableTaskStatus::Failed,
                    job.progress,
                    None,
                    Some(err.to_string()),
                ),
            };
            if let Err(err) = self
                .tasks
                .report(operation.id, status, progress, output, error)
                .await
            {
                warn!(task = %operation.id, %err, "could not report durable operation");
            }
        }

        let result = invoked?;
        if result.is_error {
            return Err(GatewayError::Upstream(format!(
                "tool '{}' reported an error: {}",
                tool,
                result.first_text().unwrap_or("(no detail)")
            )));
        }

        self.checkpoint(&mut job, 70, "storing result").await?;

        let asset = self.record_asset(&job, request, &result).await?;

        self.checkpoint(&mut job, 90, "finalizing").await?;

        info!(job_id = %job.id, asset_id = %asset.id, "design produced");
        Ok(ready_event(&job, &asset))
    }

    async fn checkpoint(
        &self,
        job: &mut Job,
        progress: u8,
        message: &str,
    ) -> Result<(), GatewayError> {
        job.set_progress(progress.max(job.progress), Some(message.to_string()))?;
        self.jobs.save(job).await?;
        self.tracker.notify_progress(job);
        Ok(())
    }

    async fn resolve_server(
        &self,
        request: &DesignRequest,
    ) -> Result<ServerDescriptor, GatewayError> {
        if let Some(server_id) = &request.server_id {
            let descriptor = self
                .servers
                .find_by_id(server_id)
                .await?
                .filter(|d| d.is_active)
                .ok_or_else(|| GatewayError::NotFound(format!("server {}", server_id)))?;
            return Ok(descriptor);
        }

        // No explicit target: first active server exposing a usable tool.
        let candidates = self.servers.list_active().await?;
        candidates
            .into_iter()
            .find(|d| !d.tools.is_empty())
            .ok_or_else(|| {
                GatewayError::PreconditionFailed(
                    "no active server with tools is registered".to_string(),
                )
            })
    }

    async fn build_arguments(&self, request: &DesignRequest) -> Result<Value, GatewayError> {
        let mut arguments = json!({"description": request.description});
        if let Some(style) = &request.style {
            arguments["style"] = json!(style);
        }
        if let Some(palette) = &request.color_palette {
            arguments["colorPalette"] = json!(palette);
        }
        if let Some(size) = &request.size {
            arguments["size"] = json!(size);
        }
        if request.refinement {
            if let Some(instructions) = &request.instructions {
                arguments["instructions"] = json!(instructions);
            }
            if let Some(parent_job_id) = request.parent_job_id {
                if let Some(parent) = self.assets.find_latest_for_job(parent_job_id).await? {
                    if let AssetContent::Inline(markup) = &parent.content {
                        arguments["source"] = json!(markup);
                    }
                }
            }
        }
        Ok(arguments)
    }

    async fn record_asset(
        &self,
        job: &Job,
        request: &DesignRequest,
        result: &InvokeResult,
    ) -> Result<Asset, GatewayError> {
        // Idempotence under redelivery: reuse an asset this job already
        // produced.
        if let Some(existing) = self.assets.find_latest_for_job(job.id).await? {
            return Ok(existing);
        }

        let (content, asset_type) = extract_content(result)?;
        let asset = if request.refinement {
            let parent_job = request.parent_job_id.ok_or_else(|| {
                GatewayError::InvalidArgument("refinement without a parent job".to_string())
            })?;
            let parent = self
                .assets
                .find_latest_for_job(parent_job)
                .await?
                .ok_or_else(|| {
                    GatewayError::PreconditionFailed(format!(
                        "parent job {} has no asset to refine",
                        parent_job
                    ))
                })?;
            Asset::refinement_of(job.id, &parent, content, asset_type)
        } else {
            Asset::new(job.id, content, asset_type)
        };
        self.assets.save_as_latest(&asset).await?;
        Ok(asset)
    }
}

fn pick_tool(descriptor: &ServerDescriptor, refinement: bool) -> Result<String, GatewayError> {
    let preferred = if refinement { REFINE_TOOL } else { GENERATE_TOOL };
    if descriptor.tool(preferred).is_some() {
        return Ok(preferred.to_string());
    }
    if refinement && descriptor.tool(GENERATE_TOOL).is_some() {
        return Ok(GENERATE_TOOL.to_string());
    }
    descriptor
        .tools
        .first()
        .map(|t| t.name.clone())
        .ok_or_else(|| {
            GatewayError::PreconditionFailed(format!(
                "server '{}' exposes no tools",
                descriptor.server_id
            ))
        })
}

fn extract_content(result: &InvokeResult) -> Result<(AssetContent, String), GatewayError> {
    for part in &result.content {
        match part {
            ContentPart::Text { text } => {
                let asset_type = if text.trim_start().starts_with("<svg") {
                    "image/svg+xml"
                } else {
                    "text/plain"
                };
                return Ok((AssetContent::Inline(text.clone()), asset_type.to_string()));
            }
            ContentPart::Resource { url, mime_type } => {
                return Ok((
                    AssetContent::Url(url.clone()),
                    mime_type.clone().unwrap_or_else(|| "application/octet-stream".to_string()),
                ));
            }
            ContentPart::Image { data, mime_type } => {
                return Ok((
                    AssetContent::Inline(data.clone()),
                    mime_type.clone().unwrap_or_else(|| "image/png".to_string()),
                ));
            }
        }
    }
    Err(GatewayError::Protocol(
        "tool returned no content parts".to_string(),
    ))
}

fn ready_event(job: &Job, asset: &Asset) -> DesignReady {
    let payload = match &asset.content {
        AssetContent::Inline(text) => json!({"content": text}),
        AssetContent::Url(url) => json!({"url": url}),
    };
    DesignReady {
        job_id: job.id,
        asset_id: asset.id,
        payload,
        asset_type: asset.asset_type.clone(),
    }
}

#[async_trait]
impl EventHandler for DesignWorker {
    async fn handle(&self, event: BusEvent) -> Result<(), GatewayError> {
        let BusEvent::RequestReceived(request) = event else {
            return Ok(());
        };
        let result = self.process(request).await;
        let failed_retryably = matches!(
            &result,
            BusEvent::Failed(DesignFailed { retryable: true, .. })
        );
        self.producer.publish(&self.topics.results, &result).await?;

        // Returning an error routes the original request event to the
        // DLQ so the healer can replay it; the failure event above still
        // reaches the gateway consumer either way.
        if failed_retryably {
            if let BusEvent::Failed(failed) = &result {
                return Err(GatewayError::Upstream(failed.error_message.clone()));
            }
        }
        Ok(())
    }
}
