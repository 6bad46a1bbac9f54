// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Event Bus - Topic Pub/Sub for the Gateway Fabric
//!
//! In-process event streaming over tokio broadcast channels, one channel
//! per topic. Consumer groups are long-lived tasks with distinct group
//! ids; each holds its own receiver, so every group observes every
//! message on its subscribed topic. Within a topic, messages are observed
//! in publish order by a group's single consumer task, which yields the
//! per-key ordering guarantee (the partition key of job-lifecycle events
//! is the job id).
//!
//! Delivery is at-least-once: a handler failure is retried up to the
//! group's local budget and then dead-lettered, so handlers must be
//! idempotent. When the bus is disabled by configuration every publish is
//! a no-op and the gateway degrades to synchronous invocation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::domain::error::GatewayError;
use crate::domain::events::{
    BusEvent, DlqEnvelope, DlqError, EventFormat, MessageHeaders,
};
use crate::domain::server::ServerId;

/// Logical topic names, resolved from configuration.
#[derive(Debug, Clone)]
pub struct TopicConfig {
    /// `DesignRequestReceived` events from gateway to workers.
    pub requests: String,
    /// `DesignReady` / `DesignFailed` events from workers to the gateway.
    pub results: String,
    /// Prefix for per-server handover topics and the global fan-out.
    pub handover_prefix: String,
    /// Poisoned events.
    pub dlq: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            requests: "mcp.design.requests".to_string(),
            results: "mcp.design.results".to_string(),
            handover_prefix: "mcp.events".to_string(),
            dlq: "mcp.events.dlq".to_string(),
        }
    }
}

impl TopicConfig {
    /// Handover topic for a single server: dots replace the id's slash.
    pub fn server_topic(&self, server_id: &ServerId) -> String {
        format!("{}.{}", self.handover_prefix, server_id.topic_segment())
    }

    /// Global handover fan-out topic.
    pub fn all_topic(&self) -> String {
        format!("{}.all", self.handover_prefix)
    }
}

/// One message on the wire.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub key: String,
    pub headers: MessageHeaders,
    pub body: Value,
}

/// Topic registry backed by broadcast channels.
pub struct EventBus {
    topics: DashMap<String, broadcast::Sender<BusMessage>>,
    capacity: usize,
    enabled: bool,
}

impl EventBus {
    pub fn new(capacity: usize, enabled: bool) -> Self {
        Self {
            topics: DashMap::new(),
            capacity,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .value()
            .clone()
    }

    /// Subscribe a new receiver to a topic. Each consumer group calls this
    /// once per topic.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        self.sender(topic).subscribe()
    }

    fn receiver_count(&self, topic: &str) -> usize {
        self.sender(topic).receiver_count()
    }
}

/// Producer retry policy.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub send_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_retries: 8,
            initial_backoff: Duration::from_millis(100),
            send_timeout: Duration::from_secs(30),
        }
    }
}

/// Idempotent producer with one in-flight send per call and exponential
/// backoff while a topic has no subscribers yet.
#[derive(Clone)]
pub struct EventProducer {
    bus: Arc<EventBus>,
    config: ProducerConfig,
}

impl EventProducer {
    pub fn new(bus: Arc<EventBus>, config: ProducerConfig) -> Self {
        Self { bus, config }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Publish an event to a topic whose consumer group is expected to be
    /// running. Retries with backoff while the topic has no receivers, up
    /// to the configured budget.
    pub async fn publish(&self, topic: &str, event: &BusEvent) -> Result<(), GatewayError> {
        if !self.bus.enabled {
            return Ok(());
        }
        let (body, headers) = event.to_wire()?;
        let message = BusMessage {
            key: event.partition_key(),
            headers,
            body,
        };
        self.send_with_retry(topic, message).await
    }

    /// Publish without waiting for subscribers. Used for handover fan-out
    /// and recovery signals, where an empty topic is normal.
    pub async fn publish_best_effort(
        &self,
        topic: &str,
        event: &BusEvent,
    ) -> Result<(), GatewayError> {
        if !self.bus.enabled {
            return Ok(());
        }
        let (body, headers) = event.to_wire()?;
        let message = BusMessage {
            key: event.partition_key(),
            headers,
            body,
        };
        self.send_once(topic, message);
        Ok(())
    }

    /// Re-publish a raw wire body, preserving its original headers. Used by
    /// the healer to replay dead-lettered events.
    pub async fn publish_raw(
        &self,
        topic: &str,
        key: String,
        headers: MessageHeaders,
        body: Value,
    ) -> Result<(), GatewayError> {
        if !self.bus.enabled {
            return Ok(());
        }
        self.send_with_retry(topic, BusMessage { key, headers, body })
            .await
    }

    /// Dead-letter an event.
    pub async fn publish_dlq(
        &self,
        dlq_topic: &str,
        original_headers: &MessageHeaders,
        envelope: &DlqEnvelope,
    ) -> Result<(), GatewayError> {
        if !self.bus.enabled {
            return Ok(());
        }
        let body = serde_json::to_value(envelope)?;
        let headers = MessageHeaders {
            event_type: original_headers.event_type.clone(),
            event_id: uuid::Uuid::new_v4(),
            format: original_headers.format,
        };
        metrics::counter!("gateway_bus_dead_lettered_total").increment(1);
        self.send_with_retry(
            dlq_topic,
            BusMessage {
                key: original_headers.event_type.clone(),
                headers,
                body,
            },
        )
        .await
    }

    fn send_once(&self, topic: &str, message: BusMessage) {
        let sender = self.bus.sender(topic);
        let delivered = sender.send(message).unwrap_or(0);
        metrics::counter!("gateway_bus_published_total").increment(1);
        if delivered == 0 {
            debug!(%topic, "published to topic with no subscribers");
        }
    }

    async fn send_with_retry(
        &self,
        topic: &str,
        message: BusMessage,
    ) -> Result<(), GatewayError> {
        let deadline = tokio::time::Instant::now() + self.config.send_timeout;
        let mut backoff = self.config.initial_backoff;
        for attempt in 0..=self.config.max_retries {
            if self.bus.receiver_count(topic) > 0 || attempt == self.config.max_retries {
                self.send_once(topic, message);
                if attempt == self.config.max_retries && self.bus.receiver_count(topic) == 0 {
                    warn!(%topic, "no subscribers after retry budget; message dropped");
                }
                return Ok(());
            }
            if tokio::time::Instant::now() + backoff > deadline {
                self.send_once(topic, message);
                warn!(%topic, "publish deadline reached before a subscriber appeared");
                return Ok(());
            }
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
        Ok(())
    }
}

/// Handler invoked by a consumer group for each decoded event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: BusEvent) -> Result<(), GatewayError>;
}

/// Handler for dead-lettered envelopes. Must not fail: the DLQ consumer
/// cannot itself be poisoned.
#[async_trait]
pub trait DlqHandler: Send + Sync {
    async fn handle(&self, envelope: DlqEnvelope);
}

/// Retry count carried inside an event, for the DLQ envelope.
fn carried_retry_count(event: &BusEvent) -> u32 {
    match event {
        BusEvent::RequestReceived(r) => r.retry_count,
        BusEvent::Failed(f) => f.retry_count,
        _ => 0,
    }
}

/// Spawn a consumer-group task for one topic.
///
/// Handler failures are retried `retry_budget` times in place, then the
/// original wire body is wrapped in a [`DlqEnvelope`] and routed to the
/// DLQ topic; the loop continues with the next message.
pub fn spawn_consumer(
    bus: Arc<EventBus>,
    producer: EventProducer,
    topic: String,
    dlq_topic: String,
    group_id: String,
    handler: Arc<dyn EventHandler>,
    retry_budget: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut receiver = bus.subscribe(&topic);
    tokio::spawn(async move {
        debug!(%topic, %group_id, "consumer group started");
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                received = receiver.recv() => match received {
                    Ok(message) => message,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%topic, %group_id, lagged = n, "consumer lagged; events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            metrics::counter!("gateway_bus_consumed_total").increment(1);

            let event = match BusEvent::from_wire(&message.body, message.headers.format) {
                Ok(event) => event,
                Err(err) => {
                    // Undecodable frames go straight to the DLQ; there is
                    // nothing a retry could change.
                    error!(%topic, %group_id, %err, "dropping undecodable event to DLQ");
                    let envelope = DlqEnvelope {
                        event: message.body.clone(),
                        format: message.headers.format,
                        source_topic: topic.clone(),
                        error: DlqError {
                            message: err.to_string(),
                            stack: None,
                            code: Some(err.code().to_string()),
                        },
                        retry_count: 0,
                        failed_at: Utc::now(),
                    };
                    let _ = producer
                        .publish_dlq(&dlq_topic, &message.headers, &envelope)
                        .await;
                    continue;
                }
            };

            let mut last_error: Option<GatewayError> = None;
            for _attempt in 0..=retry_budget {
                match handler.handle(event.clone()).await {
                    Ok(()) => {
                        last_error = None;
                        break;
                    }
                    Err(err) => last_error = Some(err),
                }
            }

            if let Some(err) = last_error {
                warn!(%topic, %group_id, %err, "handler failed; routing event to DLQ");
                let envelope = DlqEnvelope {
                    event: message.body.clone(),
                    format: message.headers.format,
                    source_topic: topic.clone(),
                    error: DlqError {
                        message: err.to_string(),
                        stack: None,
                        code: Some(err.code().to_string()),
                    },
                    retry_count: carried_retry_count(&event),
                    failed_at: Utc::now(),
                };
                let _ = producer
                    .publish_dlq(&dlq_topic, &message.headers, &envelope)
                    .await;
            }
        }
        debug!(%topic, %group_id, "consumer group stopped");
    })
}

/// Spawn the dead-letter consumer. The handler is infallible by contract;
/// decode failures are logged and skipped.
pub fn spawn_dlq_consumer(
    bus: Arc<EventBus>,
    dlq_topic: String,
    group_id: String,
    handler: Arc<dyn DlqHandler>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut receiver = bus.subscribe(&dlq_topic);
    tokio::spawn(async move {
        debug!(topic = %dlq_topic, %group_id, "DLQ consumer started");
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                received = receiver.recv() => match received {
                    Ok(message) => message,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(topic = %dlq_topic, lagged = n, "DLQ consumer lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            match serde_json::from_value::<DlqEnvelope>(message.body) {
                Ok(envelope) => handler.handle(envelope).await,
                Err(err) => {
                    error!(topic = %dlq_topic, %err, "skipping undecodable DLQ frame");
                }
            }
        }
        debug!(topic = %dlq_topic, %group_id, "DLQ consumer stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::DesignRequest;
    use crate::domain::job::JobId;
    use parking_lot::Mutex;

    fn request_event() -> BusEvent {
        BusEvent::RequestReceived(DesignRequest {
            job_id: JobId::new(),
            server_id: None,
            description: "icon".into(),
            style: None,
            color_palette: None,
            size: None,
            refinement: false,
            parent_job_id: None,
            instructions: None,
            status: None,
            retry_count: 0,
            timeout_secs: None,
        })
    }

    struct Capture {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for Capture {
        async fn handle(&self, event: BusEvent) -> Result<(), GatewayError> {
            self.seen.lock().push(event.name().to_string());
            if self.fail {
                Err(GatewayError::Upstream("ECONNREFUSED".into()))
            } else {
                Ok(())
            }
        }
    }

    struct DlqCapture {
        seen: Mutex<Vec<DlqEnvelope>>,
    }

    #[async_trait]
    impl DlqHandler for DlqCapture {
        async fn handle(&self, envelope: DlqEnvelope) {
            self.seen.lock().push(envelope);
        }
    }

    #[tokio::test]
    async fn publish_reaches_running_consumer() {
        let bus = Arc::new(EventBus::new(16, true));
        let producer = EventProducer::new(bus.clone(), ProducerConfig::default());
        let handler = Arc::new(Capture {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        let cancel = CancellationToken::new();
        let task = spawn_consumer(
            bus.clone(),
            producer.clone(),
            "t.requests".into(),
            "t.dlq".into(),
            "worker-group".into(),
            handler.clone(),
            0,
            cancel.clone(),
        );

        producer.publish("t.requests", &request_event()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            handler.seen.lock().as_slice(),
            &["DesignRequestReceived".to_string()]
        );
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn handler_failure_routes_to_dlq() {
        let bus = Arc::new(EventBus::new(16, true));
        let producer = EventProducer::new(bus.clone(), ProducerConfig::default());
        let handler = Arc::new(Capture {
            seen: Mutex::new(Vec::new()),
            fail: true,
        });
        let dlq = Arc::new(DlqCapture {
            seen: Mutex::new(Vec::new()),
        });
        let cancel = CancellationToken::new();
        let consumer = spawn_consumer(
            bus.clone(),
            producer.clone(),
            "t.requests".into(),
            "t.dlq".into(),
            "worker-group".into(),
            handler.clone(),
            1,
            cancel.clone(),
        );
        let dlq_task = spawn_dlq_consumer(
            bus.clone(),
            "t.dlq".into(),
            "healer-group".into(),
            dlq.clone(),
            cancel.clone(),
        );

        producer.publish("t.requests", &request_event()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        // Retried once locally, then dead-lettered exactly once.
        assert_eq!(handler.seen.lock().len(), 2);
        let envelopes = dlq.seen.lock();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].source_topic, "t.requests");
        assert_eq!(envelopes[0].retry_count, 0);
        assert!(envelopes[0].error.message.contains("ECONNREFUSED"));

        drop(envelopes);
        cancel.cancel();
        consumer.await.unwrap();
        dlq_task.await.unwrap();
    }

    #[tokio::test]
    async fn every_group_sees_every_message() {
        let bus = Arc::new(EventBus::new(16, true));
        let producer = EventProducer::new(bus.clone(), ProducerConfig::default());
        let first = Arc::new(Capture {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        let second = Arc::new(Capture {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        let cancel = CancellationToken::new();
        for (group, handler) in [("gateway", first.clone()), ("audit", second.clone())] {
            spawn_consumer(
                bus.clone(),
                producer.clone(),
                "t.results".into(),
                "t.dlq".into(),
                group.into(),
                handler,
                0,
                cancel.clone(),
            );
        }

        producer.publish("t.results", &request_event()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(first.seen.lock().len(), 1);
        assert_eq!(second.seen.lock().len(), 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn disabled_bus_swallows_publishes() {
        let bus = Arc::new(EventBus::new(16, false));
        let producer = EventProducer::new(bus.clone(), ProducerConfig::default());
        producer.publish("t.requests", &request_event()).await.unwrap();
        assert_eq!(bus.receiver_count("t.requests"), 0);
    }

    #[test]
    fn server_topic_uses_dotted_id() {
        let topics = TopicConfig::default();
        let id = ServerId::parse("org.name/server").unwrap();
        assert_eq!(topics.server_topic(&id), "mcp.events.org.name.server");
        assert_eq!(topics.all_topic(), "mcp.events.all");
    }
}
