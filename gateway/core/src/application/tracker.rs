// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Job Tracker - Subscriber Fan-Out
//!
//! In-memory registry of live subscribers per job. Each subscription gets
//! its own bounded channel; a slow subscriber lags and loses the oldest
//! progress frames (with a warning on the receiving side) instead of
//! blocking fan-out or other subscribers. Dropping the subscription
//! handle unsubscribes.
//!
//! The SSE and WebSocket adapters register subscriptions and translate
//! [`JobUpdate`] frames to their wire format. On a terminal transition
//! the tracker emits a completion frame carrying the job's latest asset.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::asset::Asset;
use crate::domain::job::{Job, JobId, JobStatus};

/// One frame pushed to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobUpdate {
    #[serde(rename_all = "camelCase")]
    JobStatus {
        job_id: JobId,
        status: JobStatus,
        progress: u8,
    },
    #[serde(rename_all = "camelCase")]
    JobProgress {
        job_id: JobId,
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    JobComplete {
        job_id: JobId,
        status: JobStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        asset: Option<Asset>,
    },
}

struct Subscriber {
    id: u64,
    sender: broadcast::Sender<JobUpdate>,
}

/// Fan-out hub shared by the result consumer, workers, and the streaming
/// adapters.
pub struct JobTracker {
    subscribers: DashMap<JobId, Vec<Subscriber>>,
    next_id: AtomicU64,
    channel_capacity: usize,
}

impl JobTracker {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            channel_capacity,
        }
    }

    /// Register interest in one job. The returned handle unsubscribes on
    /// drop.
    pub fn subscribe(self: &Arc<Self>, job_id: JobId) -> JobSubscription {
        let (sender, receiver) = broadcast::channel(self.channel_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(job_id)
            .or_default()
            .push(Subscriber { id, sender });
        debug!(%job_id, subscriber = id, "subscriber registered");
        JobSubscription {
            job_id,
            id,
            receiver,
            tracker: Arc::clone(self),
        }
    }

    pub fn subscriber_count(&self, job_id: JobId) -> usize {
        self.subscribers
            .get(&job_id)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Push a status frame (worker picked the job up).
    pub fn notify_status(&self, job: &Job) {
        self.fan_out(
            job.id,
            JobUpdate::JobStatus {
                job_id: job.id,
                status: job.status,
                progress: job.progress,
            },
        );
    }

    /// Push a progress frame.
    pub fn notify_progress(&self, job: &Job) {
        self.fan_out(
            job.id,
            JobUpdate::JobProgress {
                job_id: job.id,
                progress: job.progress,
                message: job.progress_message.clone(),
            },
        );
    }

    /// Push the terminal frame with the latest asset, then forget the
    /// job's subscriber list.
    pub fn notify_complete(&self, job: &Job, asset: Option<Asset>) {
        self.fan_out(
            job.id,
            JobUpdate::JobComplete {
                job_id: job.id,
                status: job.status,
                error_message: job.error_message.clone(),
                asset,
            },
        );
        self.subscribers.remove(&job.id);
    }

    /// Deliver to every subscriber, dropping ones whose receiver is gone.
    /// A send can only fail when the receiver was dropped, so one bad
    /// subscriber cannot poison the rest.
    fn fan_out(&self, job_id: JobId, update: JobUpdate) {
        if let Some(mut list) = self.subscribers.get_mut(&job_id) {
            list.retain(|subscriber| subscriber.sender.send(update.clone()).is_ok());
        }
    }

    fn unsubscribe(&self, job_id: JobId, subscriber_id: u64) {
        if let Some(mut list) = self.subscribers.get_mut(&job_id) {
            list.retain(|subscriber| subscriber.id != subscriber_id);
        }
        self.subscribers
            .remove_if(&job_id, |_, list| list.is_empty());
    }
}

/// Live subscription handle. Receive frames via [`Self::recv`]; dropping
/// the handle unsubscribes.
pub struct JobSubscription {
    job_id: JobId,
    id: u64,
    receiver: broadcast::Receiver<JobUpdate>,
    tracker: Arc<JobTracker>,
}

impl JobSubscription {
    /// Next frame, or `None` once the channel closed. Lagged receivers
    /// skip the dropped frames and keep going.
    pub async fn recv(&mut self) -> Option<JobUpdate> {
        loop {
            match self.receiver.recv().await {
                Ok(update) => return Some(update),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(job_id = %self.job_id, dropped = n, "subscriber lagged; oldest frames dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for JobSubscription {
    fn drop(&mut self) {
        self.tracker.unsubscribe(self.job_id, self.id);
    }
}
