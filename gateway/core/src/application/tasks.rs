// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Durable task tracking.
//!
//! Long-running operations surfaced by remote servers are mirrored here
//! so clients can poll them without holding a connection to the server.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::error::GatewayError;
use crate::domain::repository::DurableTaskRepository;
use crate::domain::server::ServerId;
use crate::domain::task::{DurableTask, DurableTaskId, DurableTaskStatus};

pub struct DurableTaskService {
    tasks: Arc<dyn DurableTaskRepository>,
}

impl DurableTaskService {
    pub fn new(tasks: Arc<dyn DurableTaskRepository>) -> Self {
        Self { tasks }
    }

    /// Start tracking a remote operation.
    pub async fn track(
        &self,
        server_id: ServerId,
        remote_task_id: Option<String>,
    ) -> Result<DurableTask, GatewayError> {
        let task = DurableTask::new(server_id, remote_task_id);
        self.tasks.save(&task).await?;
        Ok(task)
    }

    /// Apply a status report from the remote side. Reports against a
    /// terminal task are ignored.
    pub async fn report(
        &self,
        id: DurableTaskId,
        status: DurableTaskStatus,
        progress: u8,
        output: Option<Value>,
        error_message: Option<String>,
    ) -> Result<DurableTask, GatewayError> {
        let mut task = self
            .tasks
            .find_by_id(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("task {}", id)))?;
        if task.apply_report(status, progress, output, error_message) {
            self.tasks.save(&task).await?;
        }
        Ok(task)
    }

    pub async fn get(&self, id: DurableTaskId) -> Result<DurableTask, GatewayError> {
        self.tasks
            .find_by_id(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("task {}", id)))
    }

    pub async fn list_for_server(
        &self,
        server_id: &ServerId,
    ) -> Result<Vec<DurableTask>, GatewayError> {
        Ok(self.tasks.find_by_server(server_id).await?)
    }
}
