// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Healer - Dead-Letter Drain and Recovery
//!
//! Consumes the DLQ. Under the retry budget it bumps the server's
//! workflow attempt counter, waits a linearly growing backoff, and
//! replays the original event with `status = "retry"`. Once the budget
//! is exhausted it parks the workflow in `PlanB` and classifies the
//! error into a recovery strategy:
//!
//! | Error pattern | Strategy |
//! |---|---|
//! | `not found` / `404` | alternative_tool signal |
//! | `timeout` / `ETIMEDOUT` | replay with an extended timeout |
//! | `rate limit` / `429` | wait, then replay |
//! | `ECONNREFUSED` / `network` | short wait, then replay |
//!
//! The healer never invokes tool servers and never mutates jobs; it only
//! emits events and moves registry workflow state. It also never
//! returns an error, so the DLQ consumer cannot itself be poisoned.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::registry::RegistryService;
use crate::domain::events::{
    BusEvent, DlqEnvelope, MessageHeaders, EVENT_HEALER_ALTERNATIVE_TOOL, EVENT_HEALER_RECOVER,
};
use crate::domain::server::ServerId;
use crate::domain::workflow::WorkflowState;
use crate::infrastructure::bus::{DlqHandler, EventProducer, TopicConfig};

/// Matched recovery strategy for an exhausted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    AlternativeTool,
    ExtendedTimeout,
    RateLimitWait,
    NetworkRetry,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlternativeTool => "alternative_tool",
            Self::ExtendedTimeout => "extended_timeout",
            Self::RateLimitWait => "rate_limit_wait",
            Self::NetworkRetry => "network_retry",
        }
    }
}

/// Classify an error message. First match in table order wins.
pub fn classify(message: &str) -> Option<RecoveryStrategy> {
    let lowered = message.to_lowercase();
    if lowered.contains("not found") || lowered.contains("404") {
        Some(RecoveryStrategy::AlternativeTool)
    } else if lowered.contains("timeout") || lowered.contains("etimedout") {
        Some(RecoveryStrategy::ExtendedTimeout)
    } else if lowered.contains("rate limit") || lowered.contains("429") {
        Some(RecoveryStrategy::RateLimitWait)
    } else if lowered.contains("econnrefused") || lowered.contains("network") {
        Some(RecoveryStrategy::NetworkRetry)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct HealerConfig {
    pub max_retries: u32,
    /// Retry n sleeps `retry_base * (n + 1)`.
    pub retry_base: Duration,
    pub rate_limit_wait: Duration,
    pub network_wait: Duration,
    /// Timeout override carried on extended-timeout replays.
    pub extended_timeout_secs: u64,
}

impl Default for HealerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base: Duration::from_secs(5),
            rate_limit_wait: Duration::from_secs(60),
            network_wait: Duration::from_secs(10),
            extended_timeout_secs: 60,
        }
    }
}

pub struct Healer {
    registry: Arc<RegistryService>,
    producer: EventProducer,
    topics: TopicConfig,
    config: HealerConfig,
    cancel: CancellationToken,
}

impl Healer {
    pub fn new(
        registry: Arc<RegistryService>,
        producer: EventProducer,
        topics: TopicConfig,
        config: HealerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            producer,
            topics,
            config,
            cancel,
        }
    }

    async fn heal(&self, envelope: DlqEnvelope) {
        let event = match BusEvent::from_wire(&envelope.event, envelope.format) {
            Ok(event) => event,
            Err(err) => {
                warn!(%err, "DLQ frame does not decode; skipping");
                return;
            }
        };
        let server_id = event.server_id().cloned();

        if let Some(id) = &server_id {
            match self.registry.workflow_state(id).await {
                Ok(slot) => debug!(
                    server = %id,
                    state = slot.workflow_state.as_deref().unwrap_or("(none)"),
                    attempts = slot.workflow_attempts,
                    "healing dead-lettered event"
                ),
                Err(err) => debug!(server = %id, %err, "no workflow state for server"),
            }
        }

        if envelope.retry_count < self.config.max_retries {
            self.retry(envelope, event, server_id).await;
        } else if envelope.retry_count == self.config.max_retries {
            self.recover(envelope, event, server_id).await;
        } else {
            // A recovery replay failed too; keep the workflow parked,
            // signal, and stop looping.
            if let Some(id) = &server_id {
                let _ = self
                    .registry
                    .transition(id, WorkflowState::PlanB, None)
                    .await;
            }
            let strategy = classify(&envelope.error.message);
            self.emit_recovery(
                EVENT_HEALER_RECOVER,
                &server_id,
                &event,
                strategy,
                "exhausted",
                &envelope,
            )
            .await;
        }
    }

    async fn retry(
        &self,
        envelope: DlqEnvelope,
        event: BusEvent,
        server_id: Option<ServerId>,
    ) {
        if let Some(id) = &server_id {
            if let Err(err) = self.registry.increment_attempts(id).await {
                debug!(server = %id, %err, "could not bump workflow attempts");
            }
        }

        let delay = self.config.retry_base * (envelope.retry_count + 1);
        info!(
            retry = envelope.retry_count + 1,
            delay_ms = delay.as_millis() as u64,
            "replaying dead-lettered event"
        );
        if !self.sleep(delay).await {
            return;
        }
        self.replay(&envelope, event, "retry", None).await;
    }

    async fn recover(
        &self,
        envelope: DlqEnvelope,
        event: BusEvent,
        server_id: Option<ServerId>,
    ) {
        if let Some(id) = &server_id {
            if let Err(err) = self
                .registry
                .transition(id, WorkflowState::PlanB, None)
                .await
            {
                warn!(server = %id, %err, "could not park workflow in PlanB");
            }
        }

        let strategy = classify(&envelope.error.message);
        match strategy {
            Some(RecoveryStrategy::AlternativeTool) => {
                // Signal only; choosing a substitute tool is left to the
                // orchestrator listening on the recovery topic.
                self.emit_recovery(
                    EVENT_HEALER_ALTERNATIVE_TOOL,
                    &server_id,
                    &event,
                    strategy,
                    "signaled",
                    &envelope,
                )
                .await;
            }
            Some(RecoveryStrategy::ExtendedTimeout) => {
                self.replay(
                    &envelope,
                    event.clone(),
                    "retry_extended_timeout",
                    Some(self.config.extended_timeout_secs),
                )
                .await;
                self.emit_recovery(
                    EVENT_HEALER_RECOVER,
                    &server_id,
                    &event,
                    strategy,
                    "retry_extended_timeout",
                    &envelope,
                )
                .await;
            }
            Some(RecoveryStrategy::RateLimitWait) => {
                if !self.sleep(self.config.rate_limit_wait).await {
                    return;
                }
                self.replay(&envelope, event.clone(), "retry_after_rate_limit", None)
                    .await;
                self.emit_recovery(
                    EVENT_HEALER_RECOVER,
                    &server_id,
                    &event,
                    strategy,
                    "retry_after_rate_limit",
                    &envelope,
                )
                .await;
            }
            Some(RecoveryStrategy::NetworkRetry) => {
                if !self.sleep(self.config.network_wait).await {
                    return;
                }
                self.replay(&envelope, event.clone(), "retry_after_network_check", None)
                    .await;
                self.emit_recovery(
                    EVENT_HEALER_RECOVER,
                    &server_id,
                    &event,
                    strategy,
                    "retry_after_network_check",
                    &envelope,
                )
                .await;
            }
            None => {
                self.emit_recovery(
                    EVENT_HEALER_RECOVER,
                    &server_id,
                    &event,
                    None,
                    "no_strategy",
                    &envelope,
                )
                .await;
            }
        }
    }

    /// Replay the original event onto its source topic. Request events
    /// carry the retry status and bumped count; other kinds are
    /// republished unchanged.
    async fn replay(
        &self,
        envelope: &DlqEnvelope,
        event: BusEvent,
        status: &str,
        timeout_secs: Option<u64>,
    ) {
        let result = match event {
            BusEvent::RequestReceived(mut request) => {
                request.status = Some(status.to_string());
                request.retry_count = envelope.retry_count + 1;
                if timeout_secs.is_some() {
                    request.timeout_secs = timeout_secs;
                }
                self.producer
                    .publish(&envelope.source_topic, &BusEvent::RequestReceived(request))
                    .await
            }
            other => {
                let headers = MessageHeaders {
                    event_type: other.name().to_string(),
                    event_id: uuid::Uuid::new_v4(),
                    format: envelope.format,
                };
                self.producer
                    .publish_raw(
                        &envelope.source_topic,
                        other.partition_key(),
                        headers,
                        envelope.event.clone(),
                    )
                    .await
            }
        };
        if let Err(err) = result {
            warn!(%err, topic = envelope.source_topic, "replay publish failed");
        }
    }

    async fn emit_recovery(
        &self,
        name: &str,
        server_id: &Option<ServerId>,
        event: &BusEvent,
        strategy: Option<RecoveryStrategy>,
        recovery_status: &str,
        envelope: &DlqEnvelope,
    ) {
        let recovery = BusEvent::Recovery {
            name: name.to_string(),
            server_id: server_id.clone(),
            job_id: event.job_id(),
            strategy: strategy.map(|s| s.as_str().to_string()),
            recovery_status: recovery_status.to_string(),
            details: Some(json!({
                "error": envelope.error.message,
                "sourceTopic": envelope.source_topic,
                "retryCount": envelope.retry_count,
            })),
        };

        if let Some(id) = server_id {
            let topic = self.topics.server_topic(id);
            if let Err(err) = self.producer.publish_best_effort(&topic, &recovery).await {
                warn!(%err, topic, "recovery publish failed");
            }
        }
        let all = self.topics.all_topic();
        if let Err(err) = self.producer.publish_best_effort(&all, &recovery).await {
            warn!(%err, topic = all, "recovery publish failed");
        }
        metrics::counter!("gateway_healer_recoveries_total").increment(1);
    }

    /// Sleep unless shutdown is requested. Returns false when cancelled.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

#[async_trait]
impl DlqHandler for Healer {
    async fn handle(&self, envelope: DlqEnvelope) {
        // Errors are logged inside; the healer never raises.
        self.heal(envelope).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::{PublishRequest, RegistryService};
    use crate::domain::events::{DesignRequest, DlqError};
    use crate::domain::job::JobId;
    use crate::infrastructure::broker::stdio::{StdioBroker, StdioConfig};
    use crate::infrastructure::bus::{EventBus, ProducerConfig};
    use crate::infrastructure::identity::{IdentityClient, ShapeOnlyVerifier};
    use crate::infrastructure::repositories::InMemoryServerRepository;
    use chrono::Utc;

    async fn registry_with_server() -> (Arc<RegistryService>, ServerId) {
        let registry = Arc::new(RegistryService::new(
            Arc::new(InMemoryServerRepository::new()),
            IdentityClient::new(),
            Arc::new(ShapeOnlyVerifier),
            Arc::new(StdioBroker::new(StdioConfig::default())),
        ));
        registry
            .publish(PublishRequest {
                server_id: "acme/svg-forge".into(),
                name: "SVG Forge".into(),
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
        (registry, ServerId::parse("acme/svg-forge").unwrap())
    }

    fn fast_config() -> HealerConfig {
        HealerConfig {
            max_retries: 3,
            retry_base: Duration::from_millis(5),
            rate_limit_wait: Duration::from_millis(5),
            network_wait: Duration::from_millis(5),
            extended_timeout_secs: 60,
        }
    }

    fn dlq_envelope(server_id: &ServerId, error: &str, retry_count: u32) -> DlqEnvelope {
        let request = DesignRequest {
            job_id: JobId::new(),
            server_id: Some(server_id.clone()),
            description: "icon".into(),
            style: None,
            color_palette: None,
            size: None,
            refinement: false,
            parent_job_id: None,
            instructions: None,
            status: None,
            retry_count,
            timeout_secs: None,
        };
        let (body, headers) = BusEvent::RequestReceived(request).to_wire().unwrap();
        DlqEnvelope {
            event: body,
            format: headers.format,
            source_topic: "t.requests".into(),
            error: DlqError {
                message: error.into(),
                stack: None,
                code: None,
            },
            retry_count,
            failed_at: Utc::now(),
        }
    }

    #[test]
    fn classification_follows_the_table() {
        assert_eq!(classify("tool not found"), Some(RecoveryStrategy::AlternativeTool));
        assert_eq!(classify("HTTP 404"), Some(RecoveryStrategy::AlternativeTool));
        assert_eq!(classify("request timeout"), Some(RecoveryStrategy::ExtendedTimeout));
        assert_eq!(classify("ETIMEDOUT"), Some(RecoveryStrategy::ExtendedTimeout));
        assert_eq!(classify("rate limit exceeded"), Some(RecoveryStrategy::RateLimitWait));
        assert_eq!(classify("got 429"), Some(RecoveryStrategy::RateLimitWait));
        assert_eq!(classify("connect ECONNREFUSED"), Some(RecoveryStrategy::NetworkRetry));
        assert_eq!(classify("network unreachable"), Some(RecoveryStrategy::NetworkRetry));
        assert_eq!(classify("segfault"), None);
    }

    #[tokio::test]
    async fn under_budget_replays_with_retry_status() {
        let (registry, server_id) = registry_with_server().await;
        let bus = Arc::new(EventBus::new(16, true));
        let producer = EventProducer::new(bus.clone(), ProducerConfig::default());
        let mut requests = bus.subscribe("t.requests");

        let healer = Healer::new(
            registry.clone(),
            producer,
            TopicConfig::default(),
            fast_config(),
            CancellationToken::new(),
        );

        healer
            .handle(dlq_envelope(&server_id, "ECONNREFUSED", 0))
            .await;

        let message = requests.recv().await.unwrap();
        let replayed = BusEvent::from_wire(&message.body, message.headers.format).unwrap();
        match replayed {
            BusEvent::RequestReceived(request) => {
                assert_eq!(request.status.as_deref(), Some("retry"));
                assert_eq!(request.retry_count, 1);
            }
            other => panic!("wrong replay: {:?}", other),
        }

        let slot = registry.workflow_state(&server_id).await.unwrap();
        assert_eq!(slot.workflow_attempts, 1);
    }

    #[tokio::test]
    async fn exhausted_network_error_goes_plan_b_with_recovery_signal() {
        let (registry, server_id) = registry_with_server().await;
        let bus = Arc::new(EventBus::new(16, true));
        let producer = EventProducer::new(bus.clone(), ProducerConfig::default());
        let topics = TopicConfig::default();
        let mut requests = bus.subscribe("t.requests");
        let mut fanout = bus.subscribe(&topics.all_topic());

        let healer = Healer::new(
            registry.clone(),
            producer,
            topics,
            fast_config(),
            CancellationToken::new(),
        );

        healer
            .handle(dlq_envelope(&server_id, "connect ECONNREFUSED", 3))
            .await;

        let slot = registry.workflow_state(&server_id).await.unwrap();
        assert_eq!(slot.workflow_state.as_deref(), Some("PlanB"));
        assert!(slot.locked_by.is_none());

        // The request is replayed once more with the network-check status.
        let message = requests.recv().await.unwrap();
        let replayed = BusEvent::from_wire(&message.body, message.headers.format).unwrap();
        match replayed {
            BusEvent::RequestReceived(request) => {
                assert_eq!(request.status.as_deref(), Some("retry_after_network_check"));
                assert_eq!(request.retry_count, 4);
            }
            other => panic!("wrong replay: {:?}", other),
        }

        let recovery = fanout.recv().await.unwrap();
        let decoded = BusEvent::from_wire(&recovery.body, recovery.headers.format).unwrap();
        match decoded {
            BusEvent::Recovery { name, strategy, .. } => {
                assert_eq!(name, EVENT_HEALER_RECOVER);
                assert_eq!(strategy.as_deref(), Some("network_retry"));
            }
            other => panic!("wrong recovery event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unmatched_error_signals_no_strategy_without_replay() {
        let (registry, server_id) = registry_with_server().await;
        let bus = Arc::new(EventBus::new(16, true));
        let producer = EventProducer::new(bus.clone(), ProducerConfig::default());
        let topics = TopicConfig::default();
        let mut requests = bus.subscribe("t.requests");
        let mut fanout = bus.subscribe(&topics.all_topic());

        let healer = Healer::new(
            registry,
            producer,
            topics,
            fast_config(),
            CancellationToken::new(),
        );

        healer.handle(dlq_envelope(&server_id, "segfault", 3)).await;

        let recovery = fanout.recv().await.unwrap();
        let decoded = BusEvent::from_wire(&recovery.body, recovery.headers.format).unwrap();
        match decoded {
            BusEvent::Recovery {
                strategy,
                recovery_status,
                ..
            } => {
                assert!(strategy.is_none());
                assert_eq!(recovery_status, "no_strategy");
            }
            other => panic!("wrong recovery event: {:?}", other),
        }
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn timeout_strategy_extends_the_call_budget() {
        let (registry, server_id) = registry_with_server().await;
        let bus = Arc::new(EventBus::new(16, true));
        let producer = EventProducer::new(bus.clone(), ProducerConfig::default());
        let mut requests = bus.subscribe("t.requests");

        let healer = Healer::new(
            registry,
            producer,
            TopicConfig::default(),
            fast_config(),
            CancellationToken::new(),
        );

        healer
            .handle(dlq_envelope(&server_id, "ETIMEDOUT after 120s", 3))
            .await;

        let message = requests.recv().await.unwrap();
        let replayed = BusEvent::from_wire(&message.body, message.headers.format).unwrap();
        match replayed {
            BusEvent::RequestReceived(request) => {
                assert_eq!(request.status.as_deref(), Some("retry_extended_timeout"));
                assert_eq!(request.timeout_secs, Some(60));
            }
            other => panic!("wrong replay: {:?}", other),
        }
    }
}
