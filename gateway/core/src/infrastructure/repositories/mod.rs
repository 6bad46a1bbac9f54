// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository implementations.
//!
//! In-memory variants back development, tests, and deployments without a
//! database; the `postgres_*` modules persist the same aggregates as
//! JSONB documents with generated filter columns.

pub mod postgres_asset;
pub mod postgres_consent;
pub mod postgres_job;
pub mod postgres_memory;
pub mod postgres_server;
pub mod postgres_task;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::asset::Asset;
use crate::domain::job::{Job, JobId};
use crate::domain::memory::{MemoryEntry, MemoryScope};
use crate::domain::repository::{
    AssetRepository, ConsentRecord, ConsentRepository, DurableTaskRepository, JobRepository,
    MemoryRepository, OAuthClientRegistration, RepositoryError, ServerRepository,
};
use crate::domain::server::{ServerDescriptor, ServerId, WorkflowSlot};
use crate::domain::task::{DurableTask, DurableTaskId};

// ---------------------------------------------------------------------------
// Servers
// ---------------------------------------------------------------------------

pub struct InMemoryServerRepository {
    servers: RwLock<HashMap<ServerId, ServerDescriptor>>,
}

impl InMemoryServerRepository {
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryServerRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServerRepository for InMemoryServerRepository {
    async fn save(&self, descriptor: &ServerDescriptor) -> Result<(), RepositoryError> {
        self.servers
            .write()
            .await
            .insert(descriptor.server_id.clone(), descriptor.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &ServerId,
    ) -> Result<Option<ServerDescriptor>, RepositoryError> {
        Ok(self.servers.read().await.get(id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<ServerDescriptor>, RepositoryError> {
        let mut active: Vec<ServerDescriptor> = self
            .servers
            .read()
            .await
            .values()
            .filter(|d| d.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.server_id.as_str().cmp(b.server_id.as_str()));
        Ok(active)
    }

    async fn update_workflow(
        &self,
        id: &ServerId,
        slot: &WorkflowSlot,
    ) -> Result<(), RepositoryError> {
        let mut servers = self.servers.write().await;
        let descriptor = servers
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("server {}", id)))?;
        descriptor.workflow = slot.clone();
        descriptor.updated_at = Utc::now();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn save(&self, job: &Job) -> Result<(), RepositoryError> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, RepositoryError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

pub struct InMemoryAssetRepository {
    assets: RwLock<Vec<Asset>>,
}

impl InMemoryAssetRepository {
    pub fn new() -> Self {
        Self {
            assets: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryAssetRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetRepository for InMemoryAssetRepository {
    async fn save_as_latest(&self, asset: &Asset) -> Result<(), RepositoryError> {
        let mut assets = self.assets.write().await;
        for existing in assets.iter_mut() {
            if existing.job_id == asset.job_id {
                existing.is_latest = false;
            }
        }
        let mut latest = asset.clone();
        latest.is_latest = true;
        assets.push(latest);
        Ok(())
    }

    async fn find_by_job(&self, job_id: JobId) -> Result<Vec<Asset>, RepositoryError> {
        let mut matching: Vec<Asset> = self
            .assets
            .read()
            .await
            .iter()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect();
        matching.sort_by_key(|a| a.version);
        Ok(matching)
    }

    async fn find_latest_for_job(
        &self,
        job_id: JobId,
    ) -> Result<Option<Asset>, RepositoryError> {
        Ok(self
            .assets
            .read()
            .await
            .iter()
            .find(|a| a.job_id == job_id && a.is_latest)
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// Durable tasks
// ---------------------------------------------------------------------------

pub struct InMemoryDurableTaskRepository {
    tasks: RwLock<HashMap<DurableTaskId, DurableTask>>,
}

impl InMemoryDurableTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryDurableTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableTaskRepository for InMemoryDurableTaskRepository {
    async fn save(&self, task: &DurableTask) -> Result<(), RepositoryError> {
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: DurableTaskId,
    ) -> Result<Option<DurableTask>, RepositoryError> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn find_by_server(
        &self,
        server_id: &ServerId,
    ) -> Result<Vec<DurableTask>, RepositoryError> {
        let mut matching: Vec<DurableTask> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| &t.server_id == server_id)
            .cloned()
            .collect();
        matching.sort_by_key(|t| t.created_at);
        Ok(matching)
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

pub struct InMemoryMemoryRepository {
    entries: RwLock<HashMap<(String, String), MemoryEntry>>,
}

impl InMemoryMemoryRepository {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryRepository for InMemoryMemoryRepository {
    async fn upsert(&self, entry: &MemoryEntry) -> Result<(), RepositoryError> {
        let key = (entry.scope.owner().to_string(), entry.key.clone());
        self.entries.write().await.insert(key, entry.clone());
        Ok(())
    }

    async fn find(
        &self,
        scope: &MemoryScope,
        key: &str,
    ) -> Result<Option<MemoryEntry>, RepositoryError> {
        Ok(self
            .entries
            .read()
            .await
            .get(&(scope.owner().to_string(), key.to_string()))
            .cloned())
    }

    async fn list_for_scope(
        &self,
        scope: &MemoryScope,
    ) -> Result<Vec<MemoryEntry>, RepositoryError> {
        let owner = scope.owner().to_string();
        let mut matching: Vec<MemoryEntry> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|((entry_owner, _), _)| entry_owner == &owner)
            .map(|(_, entry)| entry.clone())
            .collect();
        matching.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(matching)
    }

    async fn delete(&self, scope: &MemoryScope, key: &str) -> Result<(), RepositoryError> {
        self.entries
            .write()
            .await
            .remove(&(scope.owner().to_string(), key.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OAuth consent
// ---------------------------------------------------------------------------

pub struct InMemoryConsentRepository {
    clients: RwLock<HashMap<String, OAuthClientRegistration>>,
    consents: RwLock<HashMap<(String, String), ConsentRecord>>,
}

impl InMemoryConsentRepository {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            consents: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryConsentRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConsentRepository for InMemoryConsentRepository {
    async fn save_client(
        &self,
        client: &OAuthClientRegistration,
    ) -> Result<(), RepositoryError> {
        self.clients
            .write()
            .await
            .insert(client.client_id.clone(), client.clone());
        Ok(())
    }

    async fn find_client(
        &self,
        client_id: &str,
    ) -> Result<Option<OAuthClientRegistration>, RepositoryError> {
        Ok(self.clients.read().await.get(client_id).cloned())
    }

    async fn save_consent(&self, consent: &ConsentRecord) -> Result<(), RepositoryError> {
        self.consents
            .write()
            .await
            .insert((consent.client_id.clone(), consent.user_id.clone()), consent.clone());
        Ok(())
    }

    async fn find_consent(
        &self,
        client_id: &str,
        user_id: &str,
    ) -> Result<Option<ConsentRecord>, RepositoryError> {
        Ok(self
            .consents
            .read()
            .await
            .get(&(client_id.to_string(), user_id.to_string()))
            .cloned())
    }

    async fn revoke_consent(
        &self,
        client_id: &str,
        user_id: &str,
    ) -> Result<(), RepositoryError> {
        self.consents
            .write()
            .await
            .remove(&(client_id.to_string(), user_id.to_string()));
        Ok(())
    }
}
