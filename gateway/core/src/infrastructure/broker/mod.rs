// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Transport Broker
//!
//! Given a server descriptor and `(tool, arguments)`, returns an
//! [`InvokeResult`] whose body is a sequence of typed content parts.
//! Dispatch rule: a descriptor with an `endpoint` and no `command` is
//! invoked over HTTP; a descriptor with a `command` is invoked over a
//! fresh stdio child process; neither is a precondition failure.

pub mod http;
pub mod stdio;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::GatewayError;
use crate::domain::server::ServerDescriptor;

/// One typed fragment of a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    #[serde(rename_all = "camelCase")]
    Text { text: String },
    #[serde(rename_all = "camelCase")]
    Image {
        data: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Resource {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

/// Result of one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResult {
    pub content: Vec<ContentPart>,
    pub is_error: bool,
}

impl InvokeResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// First inline text fragment, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|part| match part {
            ContentPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }
}

/// Interpret a JSON-RPC `result` value as content parts.
///
/// Servers that return a bare value instead of an MCP content array
/// degrade to a single text part carrying the serialized value.
pub(crate) fn parse_content(result: &Value) -> InvokeResult {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let Some(items) = result.get("content").and_then(Value::as_array) else {
        let text = match result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return InvokeResult {
            content: vec![ContentPart::Text { text }],
            is_error,
        };
    };

    let content = items
        .iter()
        .map(|item| match item.get("type").and_then(Value::as_str) {
            Some("text") => ContentPart::Text {
                text: item
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            Some("image") => ContentPart::Image {
                data: item
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                mime_type: item
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            Some("resource") => ContentPart::Resource {
                url: item
                    .get("url")
                    .or_else(|| item.get("resource").and_then(|r| r.get("uri")))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                mime_type: item
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            _ => ContentPart::Text {
                text: item.to_string(),
            },
        })
        .collect();

    InvokeResult { content, is_error }
}

/// Transport dispatcher shared by workers and the synchronous invoke API.
/// The stdio broker is shared with the registry, which reuses it for
/// tool discovery at publish time.
pub struct ToolBroker {
    stdio: std::sync::Arc<stdio::StdioBroker>,
    http: http::HttpBroker,
}

impl ToolBroker {
    pub fn new(stdio: std::sync::Arc<stdio::StdioBroker>, http: http::HttpBroker) -> Self {
        Self { stdio, http }
    }

    /// Invoke `tool` on the server described by `descriptor`.
    ///
    /// `call_timeout_override` replaces the transport's tool-call ceiling,
    /// e.g. for the healer's extended-timeout recovery strategy.
    pub async fn invoke(
        &self,
        descriptor: &ServerDescriptor,
        tool: &str,
        arguments: Value,
        call_timeout_override: Option<std::time::Duration>,
    ) -> Result<InvokeResult, GatewayError> {
        if descriptor.has_http_transport() && !descriptor.has_stdio_transport() {
            self.http
                .invoke(descriptor, tool, arguments, call_timeout_override)
                .await
        } else if descriptor.has_stdio_transport() {
            self.stdio
                .invoke(descriptor, tool, arguments, call_timeout_override)
                .await
        } else {
            Err(GatewayError::PreconditionFailed(format!(
                "server '{}' has neither endpoint nor command",
                descriptor.server_id
            )))
        }
    }

    pub fn stdio(&self) -> &std::sync::Arc<stdio::StdioBroker> {
        &self.stdio
    }
}
