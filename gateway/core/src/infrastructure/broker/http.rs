// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # HTTP Transport - Sessions, Dialects, Accept Negotiation
//!
//! Sessions are keyed by `(endpoint, normalized headers)` and expire after
//! 30 minutes idle; an expired session is re-initialized silently on next
//! use. JSON-RPC endpoints get a one-shot `initialize` on first use,
//! tolerating 4xx responses from servers that need none. Endpoints whose
//! URL contains `/mcp/invoke` speak the custom dialect: no initialize,
//! request body `{tool, arguments}`.
//!
//! Accept negotiation is data-driven: some servers demand one comma-joined
//! header, others repeated header lines. On 406 the broker walks
//! [`ACCEPT_VARIANTS`] in order and memoizes the first accepted variant on
//! the session so later calls skip the search.
//!
//! Responses may arrive as plain JSON, as a JSON-RPC envelope, or as SSE
//! frames whose `data:` lines are concatenated until a blank line and then
//! parsed as JSON. Non-JSON payloads degrade to a single text part.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::debug;

use crate::domain::error::GatewayError;
use crate::domain::server::{HttpDialect, ServerDescriptor};
use crate::infrastructure::broker::{parse_content, InvokeResult};

/// One Accept-header rendering strategy.
#[derive(Debug, Clone, Copy)]
pub struct AcceptVariant {
    pub name: &'static str,
    /// Each element becomes one `Accept` header line.
    pub values: &'static [&'static str],
}

/// Retry order after a 406, as specified: single-joined JSON-first,
/// single-joined SSE-first, the repeated variants, then each alone.
pub const ACCEPT_VARIANTS: &[AcceptVariant] = &[
    AcceptVariant {
        name: "joined-json-first",
        values: &["application/json, text/event-stream"],
    },
    AcceptVariant {
        name: "joined-sse-first",
        values: &["text/event-stream, application/json"],
    },
    AcceptVariant {
        name: "repeated-json-first",
        values: &["application/json", "text/event-stream"],
    },
    AcceptVariant {
        name: "repeated-sse-first",
        values: &["text/event-stream", "application/json"],
    },
    AcceptVariant {
        name: "json-only",
        values: &["application/json"],
    },
    AcceptVariant {
        name: "sse-only",
        values: &["text/event-stream"],
    },
];

/// First attempt before any negotiation: both types, repeated lines.
const DEFAULT_VARIANT: AcceptVariant = AcceptVariant {
    name: "repeated-json-first",
    values: &["application/json", "text/event-stream"],
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    endpoint: String,
    headers_fingerprint: String,
}

#[derive(Debug, Clone)]
struct Session {
    initialized: bool,
    accept_variant: Option<usize>,
    last_used: Instant,
}

impl Session {
    fn fresh() -> Self {
        Self {
            initialized: false,
            accept_variant: None,
            last_used: Instant::now(),
        }
    }
}

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub session_idle: Duration,
    pub call_timeout: Duration,
    pub browser_close_timeout: Duration,
    pub browser_close_settle: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            session_idle: Duration::from_secs(30 * 60),
            call_timeout: Duration::from_secs(120),
            browser_close_timeout: Duration::from_secs(5),
            browser_close_settle: Duration::from_secs(1),
        }
    }
}

pub struct HttpBroker {
    client: reqwest::Client,
    sessions: DashMap<SessionKey, Session>,
    config: HttpConfig,
    next_id: AtomicU64,
}

impl HttpBroker {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            sessions: DashMap::new(),
            config,
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn invoke(
        &self,
        descriptor: &ServerDescriptor,
        tool: &str,
        arguments: Value,
        call_timeout_override: Option<Duration>,
    ) -> Result<InvokeResult, GatewayError> {
        let endpoint = descriptor.endpoint.as_deref().ok_or_else(|| {
            GatewayError::PreconditionFailed(format!(
                "server '{}' has no endpoint",
                descriptor.server_id
            ))
        })?;
        let call_timeout = call_timeout_override.unwrap_or(self.config.call_timeout);
        let headers = expand_auth_headers(&descriptor.headers);
        let key = session_key(endpoint, &headers);
        let dialect = HttpDialect::detect(endpoint);
        self.touch_session(&key);

        if dialect == HttpDialect::JsonRpc {
            self.ensure_initialized(&key, endpoint, &headers).await?;

            // Some browser servers reject concurrent navigation; close any
            // open page first and ignore whatever the close call says.
            if tool == "browser_navigate" {
                self.opportunistic_browser_close(&key, endpoint, &headers)
                    .await;
            }
        }

        let body = match dialect {
            HttpDialect::JsonRpc => json!({
                "jsonrpc": "2.0",
                "id": self.next_id.fetch_add(1, Ordering::Relaxed),
                "method": "tools/call",
                "params": {"name": tool, "arguments": arguments},
            }),
            HttpDialect::CustomInvoke => json!({
                "tool": tool,
                "arguments": arguments,
            }),
        };

        let response = self
            .send_negotiated(&key, endpoint, &headers, &body, call_timeout)
            .await?;
        metrics::counter!("gateway_http_invocations_total").increment(1);
        let result = unwrap_rpc_result(response)?;
        Ok(parse_content(&result))
    }

    /// Drop an expired session so the next use re-initializes silently.
    fn touch_session(&self, key: &SessionKey) {
        let expired = self
            .sessions
            .get(key)
            .map(|s| s.last_used.elapsed() > self.config.session_idle)
            .unwrap_or(false);
        if expired {
            debug!(endpoint = %key.endpoint, "session idle-expired");
            self.sessions.remove(key);
        }
    }

    async fn ensure_initialized(
        &self,
        key: &SessionKey,
        endpoint: &str,
        headers: &[(String, String)],
    ) -> Result<(), GatewayError> {
        let initialized = self
            .sessions
            .get(key)
            .map(|s| s.initialized)
            .unwrap_or(false);
        if initialized {
            return Ok(());
        }

        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": "initialize",
            "params": {
                "protocolVersion": super::stdio::PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "aegis-mcp-gateway",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            },
        });

        match self
            .send_negotiated(key, endpoint, headers, &body, self.config.call_timeout)
            .await
        {
            Ok(_) => {}
            // Servers that need no initialization answer 4xx; proceed.
            Err(GatewayError::Upstream(message)) if message.contains("status 4") => {
                debug!(endpoint, "endpoint declined initialize; proceeding anyway");
            }
            Err(err) => return Err(err),
        }

        self.sessions
            .entry(key.clone())
            .or_insert_with(Session::fresh)
            .initialized = true;
        Ok(())
    }

    async fn opportunistic_browser_close(
        &self,
        key: &SessionKey,
        endpoint: &str,
        headers: &[(String, String)],
    ) {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": "tools/call",
            "params": {"name": "browser_close", "arguments": {}},
        });
        if let Err(err) = self
            .send_negotiated(
                key,
                endpoint,
                headers,
                &body,
                self.config.browser_close_timeout,
            )
            .await
        {
            debug!(endpoint, %err, "browser_close probe failed; navigating anyway");
        }
        tokio::time::sleep(self.config.browser_close_settle).await;
    }

    /// Send with Accept negotiation. The winning variant is memoized per
    /// session; on 406 the ordered variant list is walked once.
    async fn send_negotiated(
        &self,
        key: &SessionKey,
        endpoint: &str,
        headers: &[(String, String)],
        body: &Value,
        call_timeout: Duration,
    ) -> Result<Value, GatewayError> {
        let memoized = self.sessions.get(key).and_then(|s| s.accept_variant);

        let attempt_plan: Vec<(Option<usize>, AcceptVariant)> = match memoized {
            Some(index) => vec![(Some(index), ACCEPT_VARIANTS[index])],
            None => {
                let mut plan = vec![(None, DEFAULT_VARIANT)];
                plan.extend(
                    ACCEPT_VARIANTS
                        .iter()
                        .enumerate()
                        .map(|(i, v)| (Some(i), *v)),
                );
                plan
            }
        };

        let mut tried = Vec::new();
        let mut last_error: Option<GatewayError> = None;

        for (index, variant) in attempt_plan {
            tried.push(variant.name);
            match self
                .send_once(endpoint, headers, variant, body, call_timeout)
                .await
            {
                Ok(value) => {
                    let mut session = self
                        .sessions
                        .entry(key.clone())
                        .or_insert_with(Session::fresh);
                    session.last_used = Instant::now();
                    if session.accept_variant.is_none() {
                        session.accept_variant = index;
                    }
                    return Ok(value);
                }
                Err(SendError::NotAcceptable) => {
                    debug!(endpoint, variant = variant.name, "406; trying next Accept variant");
                    last_error = Some(GatewayError::Upstream(format!(
                        "endpoint rejected every Accept variant (tried: {})",
                        tried.join(", ")
                    )));
                    continue;
                }
                Err(SendError::Fatal(err)) => return Err(err),
            }
        }

        Err(last_error
            .unwrap_or_else(|| GatewayError::Upstream("no Accept variant attempted".to_string())))
    }

    async fn send_once(
        &self,
        endpoint: &str,
        headers: &[(String, String)],
        variant: AcceptVariant,
        body: &Value,
        call_timeout: Duration,
    ) -> Result<Value, SendError> {
        let mut request = self
            .client
            .post(endpoint)
            .timeout(call_timeout)
            .header("content-type", "application/json");
        for accept in variant.values {
            request = request.header("accept", *accept);
        }
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.body(body.to_string()).send().await.map_err(|e| {
            if e.is_timeout() {
                SendError::Fatal(GatewayError::Timeout(format!(
                    "request to {} timed out after {}s",
                    endpoint,
                    call_timeout.as_secs()
                )))
            } else {
                SendError::Fatal(GatewayError::Upstream(format!(
                    "request to {} failed: {}",
                    endpoint, e
                )))
            }
        })?;

        let status = response.status();
        if status.as_u16() == 406 {
            return Err(SendError::NotAcceptable);
        }
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let text = response.text().await.map_err(|e| {
            SendError::Fatal(GatewayError::Protocol(format!(
                "failed to read response body: {}",
                e
            )))
        })?;

        if !status.is_success() {
            return Err(SendError::Fatal(GatewayError::Upstream(format!(
                "endpoint {} returned status {}: {}",
                endpoint,
                status.as_u16(),
                truncate(&text, 200)
            ))));
        }

        parse_response_body(&content_type, &text).map_err(SendError::Fatal)
    }
}

enum SendError {
    /// 406: try the next Accept variant.
    NotAcceptable,
    Fatal(GatewayError),
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

fn session_key(endpoint: &str, headers: &[(String, String)]) -> SessionKey {
    let mut normalized: Vec<String> = headers
        .iter()
        .map(|(k, v)| format!("{}={}", k.to_lowercase(), v))
        .collect();
    normalized.sort();
    SessionKey {
        endpoint: endpoint.to_string(),
        headers_fingerprint: normalized.join("\n"),
    }
}

/// Wrap recognized credential shorthand into its proper header.
fn expand_auth_headers(headers: &HashMap<String, String>) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            if value.starts_with("AIza") {
                ("x-goog-api-key".to_string(), value.clone())
            } else if value.starts_with("Bearer ") {
                ("authorization".to_string(), value.clone())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}

/// Decode a response body: SSE framing, JSON, or raw text fallback.
fn parse_response_body(content_type: &str, text: &str) -> Result<Value, GatewayError> {
    let looks_like_sse = content_type.contains("text/event-stream")
        || text.trim_start().starts_with("event:")
        || text.trim_start().starts_with("data:");
    if looks_like_sse {
        let payload = extract_sse_data(text)?;
        return serde_json::from_str(&payload).map_err(|e| {
            GatewayError::Protocol(format!("SSE data block is not valid JSON: {}", e))
        });
    }

    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(_) if content_type.starts_with("text/") || content_type.is_empty() => {
            // Plain text degrades to a single text content part.
            Ok(json!({"content": [{"type": "text", "text": text}]}))
        }
        Err(e) => Err(GatewayError::Protocol(format!(
            "body with content-type '{}' is not valid JSON: {}",
            content_type, e
        ))),
    }
}

/// Concatenate successive `data:` lines until a blank line ends the frame.
fn extract_sse_data(text: &str) -> Result<String, GatewayError> {
    let mut data = String::new();
    let mut saw_data = false;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            saw_data = true;
            data.push_str(rest.trim_start());
        } else if line.trim().is_empty() && saw_data {
            break;
        }
    }
    if saw_data {
        Ok(data)
    } else {
        Err(GatewayError::Protocol(
            "SSE body contains no data lines".to_string(),
        ))
    }
}

/// Accept the three result shapes: JSON-RPC envelope, bare
/// `{result|error}`, or a raw value.
fn unwrap_rpc_result(value: Value) -> Result<Value, GatewayError> {
    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_i64);
        return Err(GatewayError::Upstream(format!(
            "server returned error{}: {}",
            code.map(|c| format!(" {}", c)).unwrap_or_default(),
            error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
        )));
    }
    if let Some(result) = value.get("result") {
        return Ok(result.clone());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::server::{ServerDescriptor, ServerId};

    fn http_descriptor(endpoint: &str) -> ServerDescriptor {
        let id = ServerId::parse("test/http-server").unwrap();
        let mut descriptor = ServerDescriptor::new(id, "http test server");
        descriptor.endpoint = Some(endpoint.to_string());
        descriptor
    }

    fn broker() -> HttpBroker {
        HttpBroker::new(HttpConfig {
            browser_close_settle: Duration::from_millis(10),
            ..HttpConfig::default()
        })
    }

    #[test]
    fn sse_data_lines_concatenate_until_blank() {
        let body = "event: message\ndata: {\"result\":\ndata: {\"ok\":true}}\n\nevent: done\ndata: ignored\n";
        let data = extract_sse_data(body).unwrap();
        assert_eq!(data, "{\"result\":{\"ok\":true}}");
    }

    #[test]
    fn auth_shorthand_wraps_google_keys_and_bearer_tokens() {
        let mut headers = HashMap::new();
        headers.insert("x-api-key".to_string(), "AIzaSyExample".to_string());
        headers.insert("auth".to_string(), "Bearer tok-123".to_string());
        headers.insert("x-custom".to_string(), "plain".to_string());

        let expanded = expand_auth_headers(&headers);
        assert!(expanded.contains(&("x-goog-api-key".to_string(), "AIzaSyExample".to_string())));
        assert!(expanded.contains(&("authorization".to_string(), "Bearer tok-123".to_string())));
        assert!(expanded.contains(&("x-custom".to_string(), "plain".to_string())));
    }

    #[test]
    fn rpc_error_maps_to_upstream() {
        let err = unwrap_rpc_result(json!({
            "jsonrpc": "2.0", "id": 1,
            "error": {"code": -32601, "message": "method not found"},
        }))
        .unwrap_err();
        assert!(matches!(err, GatewayError::Upstream(_)));
        assert!(err.to_string().contains("-32601"));
    }

    #[test]
    fn plain_and_enveloped_results_unwrap() {
        let bare = unwrap_rpc_result(json!({"result": {"content": []}})).unwrap();
        assert_eq!(bare, json!({"content": []}));

        let raw = unwrap_rpc_result(json!({"answer": 42})).unwrap();
        assert_eq!(raw["answer"], 42);
    }

    #[tokio::test]
    async fn custom_invoke_dialect_sends_bare_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/mcp/invoke")
            .match_body(mockito::Matcher::PartialJson(json!({
                "tool": "generate_svg",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"result":{"content":[{"type":"text","text":"<svg/>"}]}}"#)
            .create_async()
            .await;

        let endpoint = format!("{}/mcp/invoke", server.url());
        let descriptor = http_descriptor(&endpoint);
        let result = broker()
            .invoke(&descriptor, "generate_svg", json!({"description": "icon"}), None)
            .await
            .unwrap();

        assert_eq!(result.first_text(), Some("<svg/>"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn accept_negotiation_recovers_from_406() {
        let mut server = mockito::Server::new_async().await;
        // Catch-all rejection, declared first so specific mocks win.
        let _reject = server
            .mock("POST", "/mcp/invoke")
            .with_status(406)
            .with_body("not acceptable")
            .expect_at_least(1)
            .create_async()
            .await;
        let accept = server
            .mock("POST", "/mcp/invoke")
            .match_header("accept", "text/event-stream, application/json")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("event: message\ndata: {\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"negotiated\"}]}}\n\n")
            .create_async()
            .await;

        let endpoint = format!("{}/mcp/invoke", server.url());
        let descriptor = http_descriptor(&endpoint);
        let result = broker()
            .invoke(&descriptor, "generate_svg", json!({}), None)
            .await
            .unwrap();

        assert_eq!(result.first_text(), Some("negotiated"));
        accept.assert_async().await;
    }

    #[tokio::test]
    async fn browser_navigate_probes_browser_close_first() {
        let mut server = mockito::Server::new_async().await;
        let close = server
            .mock("POST", "/rpc")
            .match_body(mockito::Matcher::Regex("browser_close".to_string()))
            .with_status(500)
            .with_body("close failed")
            .create_async()
            .await;
        let initialize = server
            .mock("POST", "/rpc")
            .match_body(mockito::Matcher::Regex("initialize".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
            .create_async()
            .await;
        let navigate = server
            .mock("POST", "/rpc")
            .match_body(mockito::Matcher::Regex("browser_navigate".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"navigated"}]}}"#)
            .create_async()
            .await;

        let endpoint = format!("{}/rpc", server.url());
        let descriptor = http_descriptor(&endpoint);
        let result = broker()
            .invoke(
                &descriptor,
                "browser_navigate",
                json!({"url": "https://example.com"}),
                None,
            )
            .await
            .unwrap();

        // The failing close probe is swallowed and navigation proceeds.
        assert_eq!(result.first_text(), Some("navigated"));
        close.assert_async().await;
        initialize.assert_async().await;
        navigate.assert_async().await;
    }

    #[tokio::test]
    async fn jsonrpc_session_tolerates_4xx_initialize() {
        let mut server = mockito::Server::new_async().await;
        let _initialize = server
            .mock("POST", "/rpc")
            .match_body(mockito::Matcher::Regex("initialize".to_string()))
            .with_status(404)
            .with_body("no such method")
            .create_async()
            .await;
        let call = server
            .mock("POST", "/rpc")
            .match_body(mockito::Matcher::Regex("tools/call".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"result":{"content":[{"type":"text","text":"ok"}]}}"#)
            .create_async()
            .await;

        let endpoint = format!("{}/rpc", server.url());
        let descriptor = http_descriptor(&endpoint);
        let result = broker()
            .invoke(&descriptor, "generate_svg", json!({}), None)
            .await
            .unwrap();

        assert_eq!(result.first_text(), Some("ok"));
        call.assert_async().await;
    }
}
