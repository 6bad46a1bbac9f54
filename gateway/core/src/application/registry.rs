// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Registry Service
//!
//! Catalog of tool-server descriptors. Publish is upsert by server id and
//! performs, in order: id and tool-shape validation, schema-cache build,
//! identity verification against the well-known endpoint (non-fatal), and
//! stdio tool discovery under a hard ceiling (non-fatal, empty catalog on
//! failure).
//!
//! The workflow group (`lock` / `transition` / `unlock` /
//! `increment_attempts` / `workflow_state`) is the only code that mutates
//! a server's workflow slot. Terminal transitions release the lock.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::domain::error::GatewayError;
use crate::domain::repository::ServerRepository;
use crate::domain::server::{
    AuthConfig, IdentityInfo, ServerDescriptor, ServerId, ToolDef, WorkflowSlot,
};
use crate::domain::workflow::WorkflowState;
use crate::infrastructure::broker::stdio::StdioBroker;
use crate::infrastructure::identity::{IdentityClient, IdentityVerifier};

/// Publish request body: the caller-supplied slice of a descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub server_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub tools: Vec<ToolDef>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_config: Option<AuthConfig>,
}

pub struct RegistryService {
    servers: Arc<dyn ServerRepository>,
    identity_client: IdentityClient,
    verifier: Arc<dyn IdentityVerifier>,
    stdio: Arc<StdioBroker>,
    /// Compiled argument validators, keyed by `(server_id, tool)`.
    schemas: DashMap<(String, String), Arc<jsonschema::Validator>>,
}

impl RegistryService {
    pub fn new(
        servers: Arc<dyn ServerRepository>,
        identity_client: IdentityClient,
        verifier: Arc<dyn IdentityVerifier>,
        stdio: Arc<StdioBroker>,
    ) -> Self {
        Self {
            servers,
            identity_client,
            verifier,
            stdio,
            schemas: DashMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------------

    /// Upsert a descriptor. Identity and discovery failures are non-fatal.
    pub async fn publish(
        &self,
        request: PublishRequest,
    ) -> Result<ServerDescriptor, GatewayError> {
        let server_id = ServerId::parse(&request.server_id)?;
        for tool in &request.tools {
            tool.validate_shape()?;
        }

        let existing = self.servers.find_by_id(&server_id).await?;

        let mut descriptor = ServerDescriptor::new(server_id.clone(), request.name);
        descriptor.description = request.description;
        descriptor.version = request.version;
        descriptor.command = request.command;
        descriptor.args = request.args;
        descriptor.env = request.env;
        descriptor.endpoint = request.endpoint;
        descriptor.headers = request.headers;
        descriptor.tools = request.tools;
        descriptor.capabilities = request.capabilities;
        descriptor.manifest = request.manifest;
        descriptor.metadata = request.metadata;
        descriptor.auth_config = request.auth_config;

        // Re-publishing keeps workflow coordination and token material.
        if let Some(existing) = existing {
            descriptor.workflow = existing.workflow;
            descriptor.encrypted_tokens = existing.encrypted_tokens;
            descriptor.token_expires_at = existing.token_expires_at;
        }

        if let Some(endpoint) = descriptor.endpoint.clone() {
            descriptor.identity = self.verify_identity(&endpoint).await;
        }

        if descriptor.has_stdio_transport() {
            descriptor.tools = match self.stdio.discover_tools(&descriptor).await {
                Ok(tools) => {
                    info!(server = %descriptor.server_id, count = tools.len(), "tool discovery complete");
                    tools
                }
                Err(err) => {
                    warn!(server = %descriptor.server_id, %err, "tool discovery failed; publishing with empty catalog");
                    Vec::new()
                }
            };
        }

        self.cache_schemas(&descriptor)?;
        self.servers.save(&descriptor).await?;
        Ok(descriptor)
    }

    async fn verify_identity(&self, endpoint: &str) -> IdentityInfo {
        match self.identity_client.fetch(endpoint).await {
            Ok(document) => {
                let verified = self.verifier.verify(&document);
                IdentityInfo {
                    verified,
                    verified_at: verified.then(Utc::now),
                    public_key: Some(document.public_key),
                    signature: Some(document.signature),
                    origin_url: Some(endpoint.to_string()),
                }
            }
            Err(err) => {
                warn!(endpoint, %err, "identity fetch failed; publishing unverified");
                IdentityInfo {
                    verified: false,
                    verified_at: None,
                    public_key: None,
                    signature: None,
                    origin_url: Some(endpoint.to_string()),
                }
            }
        }
    }

    fn cache_schemas(&self, descriptor: &ServerDescriptor) -> Result<(), GatewayError> {
        for tool in &descriptor.tools {
            let validator = jsonschema::validator_for(&tool.input_schema).map_err(|e| {
                GatewayError::InvalidArgument(format!(
                    "tool '{}' has an invalid input schema: {}",
                    tool.name, e
                ))
            })?;
            self.schemas.insert(
                (descriptor.server_id.to_string(), tool.name.clone()),
                Arc::new(validator),
            );
        }
        Ok(())
    }

    /// List active servers with optional search and capability filters.
    pub async fn list_servers(
        &self,
        search: Option<&str>,
        capability: Option<&str>,
    ) -> Result<Vec<ServerDescriptor>, GatewayError> {
        let mut servers = self.servers.list_active().await?;
        if let Some(needle) = search {
            servers.retain(|d| d.matches_search(needle));
        }
        if let Some(capability) = capability {
            servers.retain(|d| d.has_capability(capability));
        }
        Ok(servers)
    }

    /// Fetch one active server.
    pub async fn get_server(&self, id: &ServerId) -> Result<ServerDescriptor, GatewayError> {
        match self.servers.find_by_id(id).await? {
            Some(descriptor) if descriptor.is_active => Ok(descriptor),
            _ => Err(GatewayError::NotFound(format!("server {}", id))),
        }
    }

    /// Soft delete: the record stays, hidden from listings.
    pub async fn soft_delete(&self, id: &ServerId) -> Result<(), GatewayError> {
        let mut descriptor = self
            .servers
            .find_by_id(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("server {}", id)))?;
        descriptor.is_active = false;
        descriptor.updated_at = Utc::now();
        self.servers.save(&descriptor).await?;
        Ok(())
    }

    /// Validate invocation arguments against the pre-built schema cache,
    /// compiling lazily after a restart.
    pub async fn validate_arguments(
        &self,
        server_id: &ServerId,
        tool: &str,
        arguments: &Value,
    ) -> Result<(), GatewayError> {
        let key = (server_id.to_string(), tool.to_string());
        let validator = match self.schemas.get(&key) {
            Some(validator) => Arc::clone(validator.value()),
            None => {
                let descriptor = self.get_server(server_id).await?;
                let tool_def = descriptor
                    .tool(tool)
                    .ok_or_else(|| {
                        GatewayError::NotFound(format!("tool '{}' on server {}", tool, server_id))
                    })?
                    .clone();
                self.cache_schemas(&descriptor)?;
                self.schemas
                    .get(&key)
                    .map(|v| Arc::clone(v.value()))
                    .ok_or_else(|| {
                        GatewayError::Internal(format!(
                            "schema cache missing for tool '{}'",
                            tool_def.name
                        ))
                    })?
            }
        };

        if let Err(error) = validator.validate(arguments) {
            return Err(GatewayError::InvalidArgument(format!(
                "arguments for '{}' failed validation: {}",
                tool, error
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Workflow group
    // -----------------------------------------------------------------------

    /// Acquire the workflow slot: sets the state, the owner, and zeroes
    /// the attempt counter.
    pub async fn lock(
        &self,
        id: &ServerId,
        state: &str,
        owner: &str,
        context_id: Option<String>,
    ) -> Result<WorkflowSlot, GatewayError> {
        let state = WorkflowState::parse(state)?;
        let slot = WorkflowSlot {
            workflow_state: Some(state.as_str().to_string()),
            locked_by: Some(owner.to_string()),
            workflow_attempts: 0,
            context_id,
            workflow_updated_at: Some(Utc::now()),
        };
        self.servers.update_workflow(id, &slot).await?;
        Ok(slot)
    }

    /// Move to a new state. Terminal states release the lock.
    pub async fn transition(
        &self,
        id: &ServerId,
        new_state: WorkflowState,
        owner: Option<&str>,
    ) -> Result<WorkflowSlot, GatewayError> {
        let descriptor = self
            .servers
            .find_by_id(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("server {}", id)))?;

        let mut slot = descriptor.workflow;
        slot.workflow_state = Some(new_state.as_str().to_string());
        if new_state.is_terminal() {
            slot.locked_by = None;
        } else if let Some(owner) = owner {
            slot.locked_by = Some(owner.to_string());
        }
        slot.workflow_updated_at = Some(Utc::now());
        self.servers.update_workflow(id, &slot).await?;
        Ok(slot)
    }

    /// The only way the attempt counter grows.
    pub async fn increment_attempts(&self, id: &ServerId) -> Result<u32, GatewayError> {
        let descriptor = self
            .servers
            .find_by_id(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("server {}", id)))?;

        let mut slot = descriptor.workflow;
        slot.workflow_attempts += 1;
        slot.workflow_updated_at = Some(Utc::now());
        let attempts = slot.workflow_attempts;
        self.servers.update_workflow(id, &slot).await?;
        Ok(attempts)
    }

    /// Clear the owner and the attempt counter.
    pub async fn unlock(&self, id: &ServerId) -> Result<(), GatewayError> {
        let descriptor = self
            .servers
            .find_by_id(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("server {}", id)))?;

        let mut slot = descriptor.workflow;
        slot.locked_by = None;
        slot.workflow_attempts = 0;
        slot.workflow_updated_at = Some(Utc::now());
        self.servers.update_workflow(id, &slot).await?;
        Ok(())
    }

    pub async fn workflow_state(&self, id: &ServerId) -> Result<WorkflowSlot, GatewayError> {
        let descriptor = self
            .servers
            .find_by_id(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("server {}", id)))?;
        Ok(descriptor.workflow)
    }

    /// Repository handle for collaborators that read descriptors directly.
    pub fn servers(&self) -> &Arc<dyn ServerRepository> {
        &self.servers
    }
}
