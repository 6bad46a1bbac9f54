// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Event Fabric Domain Types
//!
//! Two envelope shapes coexist on the wire, discriminated by the
//! `event-format` message header rather than by structural sniffing:
//!
//! - *Legacy*: `{eventId, eventType, timestamp, jobId, payload, metadata?}`
//!   used for job-lifecycle events.
//! - *Handover*: `{event, serverId, payload: {contextId, intent, ...},
//!   timestamp, correlationId?}` used for cross-server handovers.
//!
//! Internally everything is one canonical [`BusEvent`]; the converters at
//! the bus edges ([`BusEvent::from_wire`] / [`BusEvent::to_wire`]) are the
//! only code that knows about wire shapes, so handlers never branch on
//! envelope layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::error::GatewayError;
use crate::domain::asset::AssetId;
use crate::domain::job::JobId;
use crate::domain::server::ServerId;

/// Job-lifecycle event names.
pub const EVENT_DESIGN_REQUEST_RECEIVED: &str = "DesignRequestReceived";
pub const EVENT_DESIGN_READY: &str = "DesignReady";
pub const EVENT_DESIGN_FAILED: &str = "DesignFailed";

/// Healer recovery event names.
pub const EVENT_HEALER_RECOVER: &str = "tool.healer.recover";
pub const EVENT_HEALER_ALTERNATIVE_TOOL: &str = "tool.healer.alternative_tool";

/// Wire envelope family, carried in the `event-format` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventFormat {
    Legacy,
    Handover,
}

impl EventFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Handover => "handover",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        match raw {
            "legacy" => Ok(Self::Legacy),
            "handover" => Ok(Self::Handover),
            other => Err(GatewayError::Protocol(format!(
                "unknown event format '{}'",
                other
            ))),
        }
    }
}

/// Headers attached to every bus message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeaders {
    #[serde(rename = "event-type")]
    pub event_type: String,
    #[serde(rename = "event-id")]
    pub event_id: Uuid,
    #[serde(rename = "event-format")]
    pub format: EventFormat,
}

/// Payload of `DesignRequestReceived`.
///
/// `status` and `retry_count` are stamped by the healer on re-emission;
/// `timeout_secs` carries the extended-timeout recovery override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignRequest {
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<ServerId>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_palette: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default)]
    pub refinement: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Payload of `DesignReady`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignReady {
    pub job_id: JobId,
    pub asset_id: AssetId,
    pub payload: Value,
    pub asset_type: String,
}

/// Payload of `DesignFailed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignFailed {
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<ServerId>,
    pub error_message: String,
    pub retryable: bool,
    #[serde(default)]
    pub retry_count: u32,
}

/// Inner payload of a handover envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoverPayload {
    pub context_id: String,
    pub intent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tool_output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_snapshot_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<u64>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Canonical internal event. Handler code works on this shape only.
#[derive(Debug, Clone)]
pub enum BusEvent {
    RequestReceived(DesignRequest),
    Ready(DesignReady),
    Failed(DesignFailed),
    Handover {
        name: String,
        server_id: ServerId,
        payload: HandoverPayload,
        correlation_id: Option<String>,
    },
    Recovery {
        name: String,
        server_id: Option<ServerId>,
        job_id: Option<JobId>,
        strategy: Option<String>,
        recovery_status: String,
        details: Option<Value>,
    },
    /// Open extension point: an event kind this build does not know.
    Extension { name: String, payload: Value },
}

impl BusEvent {
    pub fn name(&self) -> &str {
        match self {
            Self::RequestReceived(_) => EVENT_DESIGN_REQUEST_RECEIVED,
            Self::Ready(_) => EVENT_DESIGN_READY,
            Self::Failed(_) => EVENT_DESIGN_FAILED,
            Self::Handover { name, .. } => name,
            Self::Recovery { name, .. } => name,
            Self::Extension { name, .. } => name,
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::RequestReceived(r) => Some(r.job_id),
            Self::Ready(r) => Some(r.job_id),
            Self::Failed(f) => Some(f.job_id),
            Self::Recovery { job_id, .. } => *job_id,
            _ => None,
        }
    }

    pub fn server_id(&self) -> Option<&ServerId> {
        match self {
            Self::RequestReceived(r) => r.server_id.as_ref(),
            Self::Failed(f) => f.server_id.as_ref(),
            Self::Handover { server_id, .. } => Some(server_id),
            Self::Recovery { server_id, .. } => server_id.as_ref(),
            _ => None,
        }
    }

    /// Message key: `jobId` for job-lifecycle events so all events of one
    /// job share a partition, the event name for bus events.
    pub fn partition_key(&self) -> String {
        match self.job_id() {
            Some(job_id) => job_id.to_string(),
            None => self.name().to_string(),
        }
    }

    /// Wire family this event serializes into.
    pub fn format(&self) -> EventFormat {
        match self {
            Self::Handover { .. } => EventFormat::Handover,
            _ => EventFormat::Legacy,
        }
    }

    /// Serialize into the wire envelope for `format()`, returning the body
    /// and the headers to publish alongside it.
    pub fn to_wire(&self) -> Result<(Value, MessageHeaders), GatewayError> {
        let headers = MessageHeaders {
            event_type: self.name().to_string(),
            event_id: Uuid::new_v4(),
            format: self.format(),
        };
        let body = match self {
            Self::Handover {
                name,
                server_id,
                payload,
                correlation_id,
            } => serde_json::to_value(HandoverEnvelope {
                event: name.clone(),
                server_id: server_id.clone(),
                payload: payload.clone(),
                timestamp: Utc::now(),
                correlation_id: correlation_id.clone(),
            })?,
            other => {
                let payload = match other {
                    Self::RequestReceived(r) => serde_json::to_value(r)?,
                    Self::Ready(r) => serde_json::to_value(r)?,
                    Self::Failed(f) => serde_json::to_value(f)?,
                    Self::Recovery {
                        server_id,
                        strategy,
                        recovery_status,
                        details,
                        ..
                    } => serde_json::json!({
                        "serverId": server_id,
                        "strategy": strategy,
                        "recoveryStatus": recovery_status,
                        "details": details,
                    }),
                    Self::Extension { payload, .. } => payload.clone(),
                    Self::Handover { .. } => unreachable!("matched above"),
                };
                serde_json::to_value(LegacyEnvelope {
                    event_id: headers.event_id,
                    event_type: self.name().to_string(),
                    timestamp: Utc::now(),
                    job_id: self.job_id(),
                    payload,
                    metadata: None,
                })?
            }
        };
        Ok((body, headers))
    }

    /// Decode a wire body according to the header-declared format.
    pub fn from_wire(body: &Value, format: EventFormat) -> Result<Self, GatewayError> {
        match format {
            EventFormat::Handover => {
                let envelope: HandoverEnvelope = serde_json::from_value(body.clone())?;
                Ok(Self::Handover {
                    name: envelope.event,
                    server_id: envelope.server_id,
                    payload: envelope.payload,
                    correlation_id: envelope.correlation_id,
                })
            }
            EventFormat::Legacy => {
                let envelope: LegacyEnvelope = serde_json::from_value(body.clone())?;
                match envelope.event_type.as_str() {
                    EVENT_DESIGN_REQUEST_RECEIVED => Ok(Self::RequestReceived(
                        serde_json::from_value(envelope.payload)?,
                    )),
                    EVENT_DESIGN_READY => {
                        Ok(Self::Ready(serde_json::from_value(envelope.payload)?))
                    }
                    EVENT_DESIGN_FAILED => {
                        Ok(Self::Failed(serde_json::from_value(envelope.payload)?))
                    }
                    name if name.starts_with("tool.healer.") => {
                        let payload = &envelope.payload;
                        let server_id = payload
                            .get("serverId")
                            .and_then(Value::as_str)
                            .map(ServerId::parse)
                            .transpose()?;
                        Ok(Self::Recovery {
                            name: name.to_string(),
                            server_id,
                            job_id: envelope.job_id,
                            strategy: payload
                                .get("strategy")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            recovery_status: payload
                                .get("recoveryStatus")
                                .and_then(Value::as_str)
                                .unwrap_or("unknown")
                                .to_string(),
                            details: payload.get("details").cloned(),
                        })
                    }
                    name => Ok(Self::Extension {
                        name: name.to_string(),
                        payload: envelope.payload,
                    }),
                }
            }
        }
    }
}

/// Job-lifecycle wire envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Cross-server handover wire envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoverEnvelope {
    pub event: String,
    pub server_id: ServerId,
    pub payload: HandoverPayload,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Error detail recorded with a dead-lettered event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Wrapper published to the dead-letter topic. Carries everything the
/// healer needs to replay the original event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqEnvelope {
    /// Original wire body, unmodified.
    pub event: Value,
    /// Wire family of `event`.
    pub format: EventFormat,
    /// Topic the event was consumed from.
    pub source_topic: String,
    pub error: DlqError,
    pub retry_count: u32,
    pub failed_at: DateTime<Utc>,
}
