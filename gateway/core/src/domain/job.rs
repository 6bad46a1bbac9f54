// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Job aggregate.
//!
//! A job tracks one client request from acceptance to a terminal state.
//! Ownership is split across the fabric: workers move a job to
//! `Processing` and advance progress; only the gateway result consumer
//! moves it to `Completed` or `Failed`, driven by result-topic events.
//! Progress is monotonically non-decreasing until a terminal transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::GatewayError;
use crate::domain::server::ServerId;

/// Unique identifier for a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// 0 to 100. Never decreases except on a transition to `Failed`.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<ServerId>,
    pub description: String,
    /// Refinement instructions, when this job refines a previous result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refinement_notes: Option<String>,
    /// Job whose latest asset this job refines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_job_id: Option<JobId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(description: impl Into<String>, server_id: Option<ServerId>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            progress: 0,
            progress_message: None,
            error_message: None,
            server_id,
            description: description.into(),
            refinement_notes: None,
            parent_job_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Worker-side transition into `Processing`. Rejected once terminal.
    pub fn start_processing(&mut self, progress: u8) -> Result<(), GatewayError> {
        if self.status.is_terminal() {
            return Err(GatewayError::PreconditionFailed(format!(
                "job {} is already {:?}",
                self.id, self.status
            )));
        }
        self.status = JobStatus::Processing;
        self.set_progress(progress, None)?;
        Ok(())
    }

    /// Worker-side revival of a failed job for a healer-driven retry.
    /// Completed jobs stay completed.
    pub fn resume_processing(&mut self) -> Result<(), GatewayError> {
        if self.status == JobStatus::Completed {
            return Err(GatewayError::PreconditionFailed(format!(
                "job {} is already COMPLETED",
                self.id
            )));
        }
        self.status = JobStatus::Processing;
        self.error_message = None;
        self.completed_at = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Monotonic progress update. A lower value than the current one is an
    /// error except when the job is failing.
    pub fn set_progress(
        &mut self,
        progress: u8,
        message: Option<String>,
    ) -> Result<(), GatewayError> {
        if self.status.is_terminal() {
            return Err(GatewayError::PreconditionFailed(format!(
                "job {} is already {:?}",
                self.id, self.status
            )));
        }
        if progress < self.progress {
            return Err(GatewayError::InvalidArgument(format!(
                "progress may not decrease ({} -> {})",
                self.progress, progress
            )));
        }
        self.progress = progress.min(100);
        if message.is_some() {
            self.progress_message = message;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Gateway-consumer transition to `Completed`. Replays are a no-op so
    /// at-least-once delivery stays idempotent.
    pub fn complete(&mut self) -> bool {
        if self.status == JobStatus::Completed {
            return false;
        }
        self.status = JobStatus::Completed;
        self.progress = 100;
        let now = Utc::now();
        self.updated_at = now;
        self.completed_at = Some(now);
        true
    }

    /// Gateway-consumer transition to `Failed`. Replays are a no-op.
    pub fn fail(&mut self, error_message: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error_message = Some(error_message.into());
        let now = Utc::now();
        self.updated_at = now;
        self.completed_at = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_monotonic() {
        let mut job = Job::new("blue minimalist icon", None);
        job.start_processing(10).unwrap();
        job.set_progress(30, Some("invoking".into())).unwrap();
        job.set_progress(70, None).unwrap();
        assert!(job.set_progress(50, None).is_err());
        assert_eq!(job.progress, 70);
    }

    #[test]
    fn completed_at_set_only_on_terminal() {
        let mut job = Job::new("icon", None);
        assert!(job.completed_at.is_none());
        job.start_processing(10).unwrap();
        assert!(job.completed_at.is_none());
        assert!(job.complete());
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn replayed_completion_is_noop() {
        let mut job = Job::new("icon", None);
        job.start_processing(10).unwrap();
        assert!(job.complete());
        let completed_at = job.completed_at;
        assert!(!job.complete());
        assert_eq!(job.completed_at, completed_at);
    }

    #[test]
    fn fail_after_complete_is_noop() {
        let mut job = Job::new("icon", None);
        job.start_processing(10).unwrap();
        job.complete();
        assert!(!job.fail("late failure"));
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error_message.is_none());
    }

    #[test]
    fn processing_rejected_once_terminal() {
        let mut job = Job::new("icon", None);
        job.start_processing(10).unwrap();
        job.fail("boom");
        assert!(job.start_processing(10).is_err());
    }

    #[test]
    fn status_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Pending).unwrap(),
            "\"PENDING\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::Completed).unwrap(),
            "\"COMPLETED\""
        );
    }
}
