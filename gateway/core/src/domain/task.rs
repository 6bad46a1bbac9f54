// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Durable task: a long-running operation surfaced by a remote server.
//!
//! Tracked independently of jobs. A durable task mirrors whatever the
//! remote side reports, so status strings and output stay open-ended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::server::ServerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DurableTaskId(pub Uuid);

impl DurableTaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DurableTaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DurableTaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurableTaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl DurableTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableTask {
    pub id: DurableTaskId,
    pub server_id: ServerId,
    /// Identifier assigned by the remote server, when it reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_task_id: Option<String>,
    pub status: DurableTaskStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DurableTask {
    pub fn new(server_id: ServerId, remote_task_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: DurableTaskId::new(),
            server_id,
            remote_task_id,
            status: DurableTaskStatus::Pending,
            progress: 0,
            output: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a remote status report. Progress reports on a terminal task
    /// are ignored so replays stay idempotent.
    pub fn apply_report(
        &mut self,
        status: DurableTaskStatus,
        progress: u8,
        output: Option<Value>,
        error_message: Option<String>,
    ) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.progress = progress.min(100).max(self.progress);
        if output.is_some() {
            self.output = output;
        }
        if error_message.is_some() {
            self.error_message = error_message;
        }
        self.updated_at = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::server::ServerId;

    #[test]
    fn report_after_terminal_ignored() {
        let id = ServerId::parse("acme/renderer").unwrap();
        let mut task = DurableTask::new(id, Some("render-42".into()));
        assert!(task.apply_report(DurableTaskStatus::Running, 40, None, None));
        assert!(task.apply_report(DurableTaskStatus::Completed, 100, None, None));
        assert!(!task.apply_report(DurableTaskStatus::Running, 10, None, None));
        assert_eq!(task.status, DurableTaskStatus::Completed);
        assert_eq!(task.progress, 100);
    }
}
