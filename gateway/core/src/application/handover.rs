// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Handover-bus consumer.
//!
//! Listens on the global fan-out topic and mirrors cross-server
//! handovers into the registry and the conversation memory: the carried
//! context id lands in the target server's workflow slot so a later
//! `lock` call can pick the orchestration up where the previous server
//! left it, and the handover's snapshot URL and intent are remembered
//! under the context's conversation scope for the next server to
//! recall. Recovery signals are logged and counted; acting on them is
//! the orchestrator's job.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::application::memory::MemoryService;
use crate::application::registry::RegistryService;
use crate::domain::error::GatewayError;
use crate::domain::events::{BusEvent, HandoverPayload};
use crate::domain::memory::{MemoryKind, MemoryScope};
use crate::infrastructure::bus::EventHandler;

/// Memory key for the latest snapshot URL of a handover context.
pub const MEMORY_KEY_SNAPSHOT_URL: &str = "memory_snapshot_url";
/// Memory key for the last handover intent of a context.
pub const MEMORY_KEY_LAST_INTENT: &str = "last_intent";

pub struct HandoverConsumer {
    registry: Arc<RegistryService>,
    memory: Arc<MemoryService>,
}

impl HandoverConsumer {
    pub fn new(registry: Arc<RegistryService>, memory: Arc<MemoryService>) -> Self {
        Self { registry, memory }
    }

    /// Persist the handover's context into conversation memory, keyed by
    /// the context id, so the receiving server can recall where the
    /// previous one left off.
    async fn remember_context(&self, payload: &HandoverPayload) -> Result<(), GatewayError> {
        let scope = MemoryScope {
            conversation_id: Some(payload.context_id.clone()),
            user_id: None,
        };
        if let Some(url) = &payload.memory_snapshot_url {
            self.memory
                .remember(
                    scope.clone(),
                    MemoryKind::Context,
                    MEMORY_KEY_SNAPSHOT_URL,
                    url,
                    7,
                    None,
                )
                .await?;
        }
        self.memory
            .remember(
                scope,
                MemoryKind::Context,
                MEMORY_KEY_LAST_INTENT,
                &payload.intent,
                5,
                None,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for HandoverConsumer {
    async fn handle(&self, event: BusEvent) -> Result<(), GatewayError> {
        match event {
            BusEvent::Handover {
                name,
                server_id,
                payload,
                ..
            } => {
                info!(
                    event = name,
                    server = %server_id,
                    context = payload.context_id,
                    intent = payload.intent,
                    status = payload.status,
                    "handover received"
                );
                metrics::counter!("gateway_handover_events_total").increment(1);

                self.remember_context(&payload).await?;

                // Stash the context id on the target's workflow slot so
                // the next lock holder can resume with it. A held lock is
                // left untouched; a handover for an unregistered server
                // is dropped rather than dead-lettered.
                let mut slot = match self.registry.workflow_state(&server_id).await {
                    Ok(slot) => slot,
                    Err(GatewayError::NotFound(_)) => {
                        debug!(server = %server_id, "handover for unregistered server; dropping");
                        return Ok(());
                    }
                    Err(err) => return Err(err),
                };
                if slot.locked_by.is_none() {
                    slot.context_id = Some(payload.context_id.clone());
                    slot.workflow_updated_at = Some(Utc::now());
                    self.registry
                        .servers()
                        .update_workflow(&server_id, &slot)
                        .await?;
                }
                Ok(())
            }
            BusEvent::Recovery {
                name,
                server_id,
                recovery_status,
                strategy,
                ..
            } => {
                debug!(
                    event = name,
                    server = server_id.map(|s| s.to_string()).unwrap_or_default(),
                    status = recovery_status,
                    strategy = strategy.unwrap_or_default(),
                    "recovery signal observed"
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::PublishRequest;
    use crate::domain::server::ServerId;
    use crate::infrastructure::broker::stdio::{StdioBroker, StdioConfig};
    use crate::infrastructure::identity::{IdentityClient, ShapeOnlyVerifier};
    use crate::infrastructure::repositories::{
        InMemoryMemoryRepository, InMemoryServerRepository,
    };

    async fn consumer_with_server() -> (HandoverConsumer, Arc<RegistryService>, Arc<MemoryService>, ServerId)
    {
        let registry = Arc::new(RegistryService::new(
            Arc::new(InMemoryServerRepository::new()),
            IdentityClient::new(),
            Arc::new(ShapeOnlyVerifier),
            Arc::new(StdioBroker::new(StdioConfig::default())),
        ));
        registry
            .publish(PublishRequest {
                server_id: "acme/vision".into(),
                name: "Vision".into(),
                description: String::new(),
                version: None,
                command: None,
                args: vec![],
                env: Default::default(),
                endpoint: None,
                headers: Default::default(),
                tools: vec![],
                capabilities: vec![],
                manifest: None,
                metadata: None,
                auth_config: None,
            })
            .await
            .unwrap();
        let memory = Arc::new(MemoryService::new(Arc::new(InMemoryMemoryRepository::new())));
        let consumer = HandoverConsumer::new(registry.clone(), memory.clone());
        (
            consumer,
            registry,
            memory,
            ServerId::parse("acme/vision").unwrap(),
        )
    }

    fn handover(server_id: &ServerId, context_id: &str, snapshot: Option<&str>) -> BusEvent {
        BusEvent::Handover {
            name: "vision.captured".into(),
            server_id: server_id.clone(),
            payload: HandoverPayload {
                context_id: context_id.into(),
                intent: "generate".into(),
                last_tool_output: None,
                memory_snapshot_url: snapshot.map(str::to_string),
                token_budget: None,
                status: "ready".into(),
                metadata: None,
            },
            correlation_id: None,
        }
    }

    fn context_scope(context_id: &str) -> MemoryScope {
        MemoryScope {
            conversation_id: Some(context_id.to_string()),
            user_id: None,
        }
    }

    #[tokio::test]
    async fn handover_stashes_context_on_unlocked_slot() {
        let (consumer, registry, _memory, server_id) = consumer_with_server().await;

        consumer
            .handle(handover(&server_id, "ctx-7", None))
            .await
            .unwrap();

        let slot = registry.workflow_state(&server_id).await.unwrap();
        assert_eq!(slot.context_id.as_deref(), Some("ctx-7"));
    }

    #[tokio::test]
    async fn handover_persists_snapshot_and_intent_to_memory() {
        let (consumer, _registry, memory, server_id) = consumer_with_server().await;

        consumer
            .handle(handover(
                &server_id,
                "ctx-7",
                Some("https://store/snapshots/ctx-7.json"),
            ))
            .await
            .unwrap();

        let scope = context_scope("ctx-7");
        let snapshot = memory
            .recall(&scope, MEMORY_KEY_SNAPSHOT_URL)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.value, "https://store/snapshots/ctx-7.json");
        assert_eq!(snapshot.kind, MemoryKind::Context);

        let intent = memory
            .recall(&scope, MEMORY_KEY_LAST_INTENT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(intent.value, "generate");
    }

    #[tokio::test]
    async fn later_handover_replaces_the_remembered_snapshot() {
        let (consumer, _registry, memory, server_id) = consumer_with_server().await;

        consumer
            .handle(handover(&server_id, "ctx-7", Some("https://store/v1.json")))
            .await
            .unwrap();
        consumer
            .handle(handover(&server_id, "ctx-7", Some("https://store/v2.json")))
            .await
            .unwrap();

        let entries = memory.recall_all(&context_scope("ctx-7")).await.unwrap();
        let snapshot = entries
            .iter()
            .find(|e| e.key == MEMORY_KEY_SNAPSHOT_URL)
            .unwrap();
        assert_eq!(snapshot.value, "https://store/v2.json");
        // Upsert, not a sibling entry.
        assert_eq!(
            entries
                .iter()
                .filter(|e| e.key == MEMORY_KEY_SNAPSHOT_URL)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn held_lock_is_left_untouched() {
        let (consumer, registry, _memory, server_id) = consumer_with_server().await;
        registry
            .lock(&server_id, "planning", "orchestrator-1", Some("ctx-1".into()))
            .await
            .unwrap();

        consumer
            .handle(handover(&server_id, "ctx-9", None))
            .await
            .unwrap();

        let slot = registry.workflow_state(&server_id).await.unwrap();
        assert_eq!(slot.context_id.as_deref(), Some("ctx-1"));
        assert_eq!(slot.locked_by.as_deref(), Some("orchestrator-1"));
    }
}
