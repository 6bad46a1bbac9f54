// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Server Descriptor Domain Types
//!
//! Domain types for the tool-server catalog. A [`ServerDescriptor`] is the
//! aggregate root of the registry bounded context: it carries the transport
//! hints the broker dispatches on, the advertised tool catalog, identity
//! verification results, per-server OAuth material, and the workflow slot
//! used to coordinate multi-step orchestrations.
//!
//! ## Key Types
//!
//! | Type | Role |
//! |------|------|
//! | [`ServerId`] | Validated `org.name/server-name` identity |
//! | [`ToolDef`] | One named operation with a JSON-Schema argument shape |
//! | [`ServerDescriptor`] | Catalog entry aggregate |
//! | [`IdentityInfo`] | Result of the well-known identity fetch |
//! | [`AuthConfig`] | Per-server OAuth client configuration |
//! | [`WorkflowSlot`] | Lock owner, attempts, and current workflow state |

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::GatewayError;

fn server_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._-]+/[A-Za-z0-9._-]+$").expect("static pattern compiles")
    })
}

/// Validated server identity of the form `org.name/server-name`.
///
/// The slash is part of the identity, so URL paths carrying a `ServerId`
/// must percent-encode it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// Parse and validate a raw id string.
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        if server_id_pattern().is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(GatewayError::InvalidArgument(format!(
                "serverId '{}' does not match org.name/server-name",
                raw
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Topic-safe rendering used for per-server event topics: the slash is
    /// replaced with a dot so `org.name/server` becomes `org.name.server`.
    pub fn topic_segment(&self) -> String {
        self.0.replace('/', ".")
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named operation exposed by a server.
///
/// `input_schema` must be a JSON Schema object with `"type": "object"`;
/// the registry rejects anything else at publish time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDef {
    /// Shape validation applied before a descriptor is accepted.
    pub fn validate_shape(&self) -> Result<(), GatewayError> {
        if self.name.trim().is_empty() {
            return Err(GatewayError::InvalidArgument(
                "tool is missing a name".to_string(),
            ));
        }
        if self.description.trim().is_empty() {
            return Err(GatewayError::InvalidArgument(format!(
                "tool '{}' is missing a description",
                self.name
            )));
        }
        let schema_type = self.input_schema.get("type").and_then(Value::as_str);
        if schema_type != Some("object") {
            return Err(GatewayError::InvalidArgument(format!(
                "tool '{}' inputSchema.type must be \"object\"",
                self.name
            )));
        }
        Ok(())
    }
}

/// HTTP dialect spoken by an endpoint.
///
/// Endpoints whose path contains `/mcp/invoke` use the bare
/// `{tool, arguments}` body; everything else is JSON-RPC 2.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpDialect {
    JsonRpc,
    CustomInvoke,
}

impl HttpDialect {
    pub fn detect(endpoint: &str) -> Self {
        if endpoint.contains("/mcp/invoke") {
            Self::CustomInvoke
        } else {
            Self::JsonRpc
        }
    }
}

/// Identity verification fields recorded at publish time.
///
/// Verification is a pluggable policy: the current verifier only checks
/// that the `(publicKey, signature)` pair is well formed, so
/// `verified == true` must never be treated as a trust anchor by
/// authorization code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityInfo {
    pub verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub public_key: Option<String>,
    pub signature: Option<String>,
    pub origin_url: Option<String>,
}

/// Per-server OAuth client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub token_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Workflow coordination slot embedded in the descriptor.
///
/// The state column stays a free string for forward compatibility; the
/// registry parses it through [`crate::domain::workflow::WorkflowState`]
/// and rejects names outside the closed set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSlot {
    pub workflow_state: Option<String>,
    pub locked_by: Option<String>,
    pub workflow_attempts: u32,
    pub context_id: Option<String>,
    pub workflow_updated_at: Option<DateTime<Utc>>,
}

/// Catalog entry for one remote tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDescriptor {
    // Identity
    pub server_id: ServerId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    // Transport hints. `command` wins for dispatch when both are present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,

    // Catalog
    #[serde(default)]
    pub tools: Vec<ToolDef>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    // Identity verification
    #[serde(default)]
    pub identity: IdentityInfo,

    // OAuth material. Tokens are stored only in encrypted form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_config: Option<AuthConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_tokens: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<DateTime<Utc>>,

    // Workflow coordination
    #[serde(default)]
    pub workflow: WorkflowSlot,

    // Lifecycle. `is_active == false` means soft-deleted.
    pub is_active: bool,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServerDescriptor {
    /// Minimal constructor used by publish and by tests.
    pub fn new(server_id: ServerId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            server_id,
            name: name.into(),
            description: String::new(),
            version: None,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            endpoint: None,
            headers: HashMap::new(),
            tools: Vec::new(),
            capabilities: Vec::new(),
            manifest: None,
            metadata: None,
            identity: IdentityInfo::default(),
            auth_config: None,
            encrypted_tokens: None,
            token_expires_at: None,
            workflow: WorkflowSlot::default(),
            is_active: true,
            published_at: now,
            updated_at: now,
        }
    }

    /// True when the descriptor can be invoked over a child process.
    pub fn has_stdio_transport(&self) -> bool {
        self.command.as_deref().is_some_and(|c| !c.trim().is_empty())
    }

    /// True when the descriptor can be invoked over HTTP.
    pub fn has_http_transport(&self) -> bool {
        self.endpoint.as_deref().is_some_and(|e| !e.trim().is_empty())
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDef> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Case-insensitive substring match over name, description, and id.
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.name.to_lowercase().contains(&needle)
            || self.description.to_lowercase().contains(&needle)
            || self.server_id.as_str().to_lowercase().contains(&needle)
    }
}
