// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Repository Pattern - Storage Backend Abstraction
//
// One repository trait per aggregate root. Two implementations exist for
// each: in-memory (development, tests, and DATABASE_URL-less deployments)
// and PostgreSQL. Workflow mutation is serialized per server by the
// store's row-level update; the registry adds no cross-server transactions.

use async_trait::async_trait;

use crate::domain::asset::Asset;
use crate::domain::job::{Job, JobId};
use crate::domain::memory::{MemoryEntry, MemoryScope};
use crate::domain::server::{ServerDescriptor, ServerId, WorkflowSlot};
use crate::domain::task::{DurableTask, DurableTaskId};

/// Repository errors.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

/// Catalog of tool-server descriptors.
#[async_trait]
pub trait ServerRepository: Send + Sync {
    /// Upsert by `server_id`.
    async fn save(&self, descriptor: &ServerDescriptor) -> Result<(), RepositoryError>;

    /// Fetch regardless of `is_active`.
    async fn find_by_id(
        &self,
        id: &ServerId,
    ) -> Result<Option<ServerDescriptor>, RepositoryError>;

    /// All descriptors with `is_active == true`.
    async fn list_active(&self) -> Result<Vec<ServerDescriptor>, RepositoryError>;

    /// Replace the workflow slot for one server. The update is serialized
    /// per row by the backend.
    async fn update_workflow(
        &self,
        id: &ServerId,
        slot: &WorkflowSlot,
    ) -> Result<(), RepositoryError>;
}

/// Job lifecycle storage.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn save(&self, job: &Job) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, RepositoryError>;
}

/// Asset storage. Saving as latest clears `is_latest` on the job's other
/// assets in the same write.
#[async_trait]
pub trait AssetRepository: Send + Sync {
    async fn save_as_latest(&self, asset: &Asset) -> Result<(), RepositoryError>;
    async fn find_by_job(&self, job_id: JobId) -> Result<Vec<Asset>, RepositoryError>;
    async fn find_latest_for_job(&self, job_id: JobId)
        -> Result<Option<Asset>, RepositoryError>;
}

/// Durable task storage.
#[async_trait]
pub trait DurableTaskRepository: Send + Sync {
    async fn save(&self, task: &DurableTask) -> Result<(), RepositoryError>;
    async fn find_by_id(
        &self,
        id: DurableTaskId,
    ) -> Result<Option<DurableTask>, RepositoryError>;
    async fn find_by_server(
        &self,
        server_id: &ServerId,
    ) -> Result<Vec<DurableTask>, RepositoryError>;
}

/// Memory entry storage with `(owner, key)` upsert semantics.
#[async_trait]
pub trait MemoryRepository: Send + Sync {
    /// Insert or replace the entry for `(entry.scope.owner(), entry.key)`.
    async fn upsert(&self, entry: &MemoryEntry) -> Result<(), RepositoryError>;
    async fn find(
        &self,
        scope: &MemoryScope,
        key: &str,
    ) -> Result<Option<MemoryEntry>, RepositoryError>;
    async fn list_for_scope(
        &self,
        scope: &MemoryScope,
    ) -> Result<Vec<MemoryEntry>, RepositoryError>;
    async fn delete(&self, scope: &MemoryScope, key: &str) -> Result<(), RepositoryError>;
}

/// Registered OAuth client: the scope universe consents are checked against.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthClientRegistration {
    pub client_id: String,
    pub name: String,
    pub registered_scopes: Vec<String>,
}

/// One user's consent grant for one client.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecord {
    pub client_id: String,
    pub user_id: String,
    pub scopes: Vec<String>,
    pub granted_at: chrono::DateTime<chrono::Utc>,
}

/// OAuth consent storage.
#[async_trait]
pub trait ConsentRepository: Send + Sync {
    async fn save_client(
        &self,
        client: &OAuthClientRegistration,
    ) -> Result<(), RepositoryError>;
    async fn find_client(
        &self,
        client_id: &str,
    ) -> Result<Option<OAuthClientRegistration>, RepositoryError>;
    async fn save_consent(&self, consent: &ConsentRecord) -> Result<(), RepositoryError>;
    async fn find_consent(
        &self,
        client_id: &str,
        user_id: &str,
    ) -> Result<Option<ConsentRecord>, RepositoryError>;
    async fn revoke_consent(&self, client_id: &str, user_id: &str)
        -> Result<(), RepositoryError>;
}
