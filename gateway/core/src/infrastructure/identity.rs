// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Server identity verification via the well-known endpoint.
//!
//! On publish, servers reachable over HTTP are asked for
//! `/.well-known/mcp-server-identity`. Verification is a pluggable
//! [`IdentityVerifier`]; the default implementation only checks that the
//! `(publicKey, signature)` pair is well formed base64. A real verifier
//! must hash the manifest with a declared algorithm and verify it against
//! the key, so `identityVerified` must never be treated as a trust anchor
//! by authorization code until that lands.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::domain::error::GatewayError;

/// Body of `GET /.well-known/mcp-server-identity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityDocument {
    pub public_key: String,
    pub signature: String,
    pub manifest: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Pluggable signature policy.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, document: &IdentityDocument) -> bool;
}

/// Accepts any well-formed `(publicKey, signature)` pair.
pub struct ShapeOnlyVerifier;

impl IdentityVerifier for ShapeOnlyVerifier {
    fn verify(&self, document: &IdentityDocument) -> bool {
        let b64 = base64::engine::general_purpose::STANDARD;
        !document.public_key.is_empty()
            && !document.signature.is_empty()
            && b64.decode(&document.public_key).is_ok()
            && b64.decode(&document.signature).is_ok()
    }
}

/// Fetches identity documents from registered endpoints.
pub struct IdentityClient {
    client: reqwest::Client,
}

impl IdentityClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Resolve the well-known URL from an endpoint and fetch the document.
    /// All failures are reported as errors; the registry treats them as
    /// non-fatal and publishes with `identityVerified == false`.
    pub async fn fetch(&self, endpoint: &str) -> Result<IdentityDocument, GatewayError> {
        let well_known = well_known_url(endpoint)?;
        debug!(url = %well_known, "fetching server identity");
        let response = self
            .client
            .get(well_known.clone())
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(format!("identity fetch failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(GatewayError::Upstream(format!(
                "identity endpoint returned status {}",
                response.status().as_u16()
            )));
        }
        response
            .json::<IdentityDocument>()
            .await
            .map_err(|e| GatewayError::Protocol(format!("identity document malformed: {}", e)))
    }
}

impl Default for IdentityClient {
    fn default() -> Self {
        Self::new()
    }
}

fn well_known_url(endpoint: &str) -> Result<Url, GatewayError> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| GatewayError::InvalidArgument(format!("endpoint is not a URL: {}", e)))?;
    url.set_path("/.well-known/mcp-server-identity");
    url.set_query(None);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn well_known_url_replaces_path() {
        let url = well_known_url("https://tools.example.com/mcp/invoke?x=1").unwrap();
        assert_eq!(
            url.as_str(),
            "https://tools.example.com/.well-known/mcp-server-identity"
        );
    }

    #[test]
    fn shape_verifier_requires_base64_pair() {
        let verifier = ShapeOnlyVerifier;
        let mut document = IdentityDocument {
            public_key: base64::engine::general_purpose::STANDARD.encode("key"),
            signature: base64::engine::general_purpose::STANDARD.encode("sig"),
            manifest: json!({}),
            server_id: None,
            name: None,
            version: None,
        };
        assert!(verifier.verify(&document));

        document.signature = "not base64!!".into();
        assert!(!verifier.verify(&document));

        document.signature = String::new();
        assert!(!verifier.verify(&document));
    }

    #[tokio::test]
    async fn fetch_parses_document() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/.well-known/mcp-server-identity")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "publicKey": "a2V5",
                    "signature": "c2ln",
                    "manifest": {"tools": []},
                    "serverId": "acme/svg-forge",
                })
                .to_string(),
            )
            .create_async()
            .await;

        let endpoint = format!("{}/mcp", server.url());
        let document = IdentityClient::new().fetch(&endpoint).await.unwrap();
        assert_eq!(document.server_id.as_deref(), Some("acme/svg-forge"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_maps_500_to_upstream() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/.well-known/mcp-server-identity")
            .with_status(500)
            .create_async()
            .await;

        let endpoint = format!("{}/mcp", server.url());
        let err = IdentityClient::new().fetch(&endpoint).await.unwrap_err();
        assert!(matches!(err, GatewayError::Upstream(_)));
    }
}
