// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Job Service
//!
//! Accepts generation and refinement requests, owns job creation, and
//! feeds the request topic. When the event bus is disabled by
//! configuration the service degrades to direct invocation: the worker
//! and result-consumer pipeline runs in-process instead of through
//! topics, with identical state transitions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::application::consumer::ResultConsumer;
use crate::application::worker::DesignWorker;
use crate::domain::asset::Asset;
use crate::domain::error::GatewayError;
use crate::domain::events::{BusEvent, DesignRequest};
use crate::domain::job::{Job, JobId};
use crate::domain::repository::{AssetRepository, JobRepository};
use crate::domain::server::ServerId;
use crate::infrastructure::bus::{EventProducer, TopicConfig};

/// Body of `POST /api/mcp/tools/generate`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_palette: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// Direct-invocation fallback used when the bus is disabled.
pub struct SyncPipeline {
    pub worker: Arc<DesignWorker>,
    pub consumer: Arc<ResultConsumer>,
}

pub struct JobService {
    jobs: Arc<dyn JobRepository>,
    assets: Arc<dyn AssetRepository>,
    producer: EventProducer,
    topics: TopicConfig,
    sync_pipeline: Option<SyncPipeline>,
}

impl JobService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        assets: Arc<dyn AssetRepository>,
        producer: EventProducer,
        topics: TopicConfig,
        sync_pipeline: Option<SyncPipeline>,
    ) -> Self {
        Self {
            jobs,
            assets,
            producer,
            topics,
            sync_pipeline,
        }
    }

    /// Accept a generation request and return the tracking job id.
    pub async fn generate(&self, request: GenerateRequest) -> Result<JobId, GatewayError> {
        if request.description.trim().is_empty() {
            return Err(GatewayError::InvalidArgument(
                "description must not be empty".to_string(),
            ));
        }
        let server_id = request
            .server_id
            .as_deref()
            .map(ServerId::parse)
            .transpose()?;

        let job = Job::new(request.description.clone(), server_id.clone());
        self.jobs.save(&job).await?;

        let event = BusEvent::RequestReceived(DesignRequest {
            job_id: job.id,
            server_id,
            description: request.description,
            style: request.style,
            color_palette: request.color_palette,
            size: request.size,
            refinement: false,
            parent_job_id: None,
            instructions: None,
            status: None,
            retry_count: 0,
            timeout_secs: None,
        });
        self.dispatch(event).await?;
        Ok(job.id)
    }

    /// Accept a refinement of a previously produced job.
    pub async fn refine(
        &self,
        parent_job_id: JobId,
        instructions: String,
    ) -> Result<JobId, GatewayError> {
        if instructions.trim().is_empty() {
            return Err(GatewayError::InvalidArgument(
                "instructions must not be empty".to_string(),
            ));
        }
        let parent = self
            .jobs
            .find_by_id(parent_job_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("job {}", parent_job_id)))?;
        if self
            .assets
            .find_latest_for_job(parent_job_id)
            .await?
            .is_none()
        {
            return Err(GatewayError::PreconditionFailed(format!(
                "job {} has no asset to refine",
                parent_job_id
            )));
        }

        let mut job = Job::new(parent.description.clone(), parent.server_id.clone());
        job.refinement_notes = Some(instructions.clone());
        job.parent_job_id = Some(parent_job_id);
        self.jobs.save(&job).await?;

        let event = BusEvent::RequestReceived(DesignRequest {
            job_id: job.id,
            server_id: parent.server_id,
            description: parent.description,
            style: None,
            color_palette: None,
            size: None,
            refinement: true,
            parent_job_id: Some(parent_job_id),
            instructions: Some(instructions),
            status: None,
            retry_count: 0,
            timeout_secs: None,
        });
        self.dispatch(event).await?;
        Ok(job.id)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<(Job, Vec<Asset>), GatewayError> {
        let job = self
            .jobs
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("job {}", job_id)))?;
        let assets = self.assets.find_by_job(job_id).await?;
        Ok((job, assets))
    }

    async fn dispatch(&self, event: BusEvent) -> Result<(), GatewayError> {
        if self.producer.bus().is_enabled() {
            return self.producer.publish(&self.topics.requests, &event).await;
        }

        // Degraded mode: run the worker and consumer inline on a task so
        // the caller still gets its job id immediately.
        let Some(pipeline) = &self.sync_pipeline else {
            return Err(GatewayError::Internal(
                "event bus disabled and no direct pipeline configured".to_string(),
            ));
        };
        let worker = Arc::clone(&pipeline.worker);
        let consumer = Arc::clone(&pipeline.consumer);
        let BusEvent::RequestReceived(request) = event else {
            return Ok(());
        };
        tokio::spawn(async move {
            let result = worker.process(request).await;
            if let Err(err) = consumer.apply(result).await {
                error!(%err, "direct pipeline failed to apply result");
            }
        });
        Ok(())
    }
}
