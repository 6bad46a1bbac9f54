// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! OAuth token endpoint client.
//!
//! Performs `refresh_token` grants against a server's configured token
//! URL. The vault decides *when* to refresh; this client only speaks the
//! wire protocol.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::GatewayError;
use crate::domain::server::AuthConfig;

/// Decrypted token material stored per server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSet {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenSet {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
}

/// Thin client over the token endpoint.
pub struct OAuthHttpClient {
    client: reqwest::Client,
}

impl OAuthHttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Exchange a refresh token for a new token set. The old refresh
    /// token is kept when the server does not rotate it.
    pub async fn refresh(
        &self,
        auth: &AuthConfig,
        refresh_token: &str,
    ) -> Result<TokenSet, GatewayError> {
        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("client_id", auth.client_id.clone()),
        ];
        if let Some(secret) = &auth.client_secret {
            form.push(("client_secret", secret.clone()));
        }

        let response = self
            .client
            .post(&auth.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(format!("token refresh failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 400 || status.as_u16() == 401 {
            return Err(GatewayError::Unauthenticated(format!(
                "token endpoint rejected refresh (status {})",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(GatewayError::Upstream(format!(
                "token endpoint returned status {}",
                status.as_u16()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Protocol(format!("token response malformed: {}", e)))?;

        Ok(TokenSet {
            access_token: body.access_token,
            refresh_token: body
                .refresh_token
                .or_else(|| Some(refresh_token.to_string())),
            expires_at: body.expires_in.map(|s| Utc::now() + Duration::seconds(s)),
            token_type: body.token_type.unwrap_or_else(default_token_type),
            scope: body.scope,
        })
    }
}

impl Default for OAuthHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn auth(token_url: String) -> AuthConfig {
        AuthConfig {
            client_id: "gateway-client".into(),
            client_secret: Some("s3cret".into()),
            token_url,
            scopes: vec!["tools.read".into()],
        }
    }

    #[tokio::test]
    async fn refresh_parses_token_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                mockito::Matcher::UrlEncoded("refresh_token".into(), "ref-1".into()),
                mockito::Matcher::UrlEncoded("client_id".into(), "gateway-client".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "access_token": "tok-2",
                    "expires_in": 3600,
                    "token_type": "Bearer",
                })
                .to_string(),
            )
            .create_async()
            .await;

        let tokens = OAuthHttpClient::new()
            .refresh(&auth(format!("{}/token", server.url())), "ref-1")
            .await
            .unwrap();

        assert_eq!(tokens.access_token, "tok-2");
        // Refresh token is preserved when the server does not rotate it.
        assert_eq!(tokens.refresh_token.as_deref(), Some("ref-1"));
        assert!(!tokens.is_expired(Utc::now()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_refresh_is_unauthenticated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(401)
            .create_async()
            .await;

        let err = OAuthHttpClient::new()
            .refresh(&auth(format!("{}/token", server.url())), "ref-1")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unauthenticated(_)));
    }
}
