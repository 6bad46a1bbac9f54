// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Gateway Result Consumer
//!
//! Subscribes to the result topic and owns terminal job transitions.
//! `DesignReady` marks the job completed at progress 100 and back-fills
//! an asset when none exists (covers replay of the result stream).
//! `DesignFailed` marks the job failed with the error message. Every
//! status write fans out through the job tracker. Replayed events are
//! no-ops, so at-least-once delivery is safe.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::application::tracker::JobTracker;
use crate::domain::asset::{Asset, AssetContent};
use crate::domain::error::GatewayError;
use crate::domain::events::{BusEvent, DesignFailed, DesignReady};
use crate::domain::repository::{AssetRepository, JobRepository};
use crate::infrastructure::bus::EventHandler;

pub struct ResultConsumer {
    jobs: Arc<dyn JobRepository>,
    assets: Arc<dyn AssetRepository>,
    tracker: Arc<JobTracker>,
}

impl ResultConsumer {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        assets: Arc<dyn AssetRepository>,
        tracker: Arc<JobTracker>,
    ) -> Self {
        Self {
            jobs,
            assets,
            tracker,
        }
    }

    /// Apply one result event. Public so the bus-disabled deployment mode
    /// can run the pipeline in-request.
    pub async fn apply(&self, event: BusEvent) -> Result<(), GatewayError> {
        match event {
            BusEvent::Ready(ready) => self.apply_ready(ready).await,
            BusEvent::Failed(failed) => self.apply_failed(failed).await,
            _ => Ok(()),
        }
    }

    async fn apply_ready(&self, ready: DesignReady) -> Result<(), GatewayError> {
        let Some(mut job) = self.jobs.find_by_id(ready.job_id).await? else {
            warn!(job_id = %ready.job_id, "DesignReady for unknown job; dropping");
            return Ok(());
        };

        if !job.complete() {
            // Replay of an already-completed job: state is untouched.
            return Ok(());
        }
        self.jobs.save(&job).await?;

        let asset = match self.assets.find_latest_for_job(job.id).await? {
            Some(existing) => existing,
            None => {
                // Result arrived without a stored asset (e.g. replay after
                // a partial failure); back-fill from the event payload.
                let content = ready
                    .payload
                    .get("content")
                    .and_then(serde_json::Value::as_str)
                    .map(|text| AssetContent::Inline(text.to_string()))
                    .or_else(|| {
                        ready
                            .payload
                            .get("url")
                            .and_then(serde_json::Value::as_str)
                            .map(|url| AssetContent::Url(url.to_string()))
                    })
                    .unwrap_or_else(|| AssetContent::Inline(ready.payload.to_string()));
                let asset = Asset::new(job.id, content, ready.asset_type.clone());
                self.assets.save_as_latest(&asset).await?;
                asset
            }
        };

        info!(job_id = %job.id, asset_id = %asset.id, "job completed");
        self.tracker.notify_complete(&job, Some(asset));
        Ok(())
    }

    async fn apply_failed(&self, failed: DesignFailed) -> Result<(), GatewayError> {
        let Some(mut job) = self.jobs.find_by_id(failed.job_id).await? else {
            warn!(job_id = %failed.job_id, "DesignFailed for unknown job; dropping");
            return Ok(());
        };

        if !job.fail(&failed.error_message) {
            return Ok(());
        }
        self.jobs.save(&job).await?;

        info!(job_id = %job.id, error = %failed.error_message, "job failed");
        self.tracker.notify_complete(&job, None);
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ResultConsumer {
    async fn handle(&self, event: BusEvent) -> Result<(), GatewayError> {
        self.apply(event).await
    }
}
