// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Token Vault and OAuth Consent
//!
//! Per-server OAuth tokens live on the descriptor only as an encrypted
//! blob. `get_tokens` transparently refreshes an expired set when a
//! refresh token is present and fails `Unauthenticated` otherwise.
//!
//! The consent store records per-`(client, user)` scope grants, supports
//! revocation, and rejects grants whose scopes are not a subset of the
//! client's registered scopes.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use crate::domain::error::GatewayError;
use crate::domain::repository::{
    ConsentRecord, ConsentRepository, OAuthClientRegistration, ServerRepository,
};
use crate::domain::server::ServerId;
use crate::infrastructure::crypto::TokenCipher;
use crate::infrastructure::oauth::{OAuthHttpClient, TokenSet};

pub struct TokenVault {
    servers: Arc<dyn ServerRepository>,
    cipher: Arc<TokenCipher>,
    oauth: OAuthHttpClient,
}

impl TokenVault {
    pub fn new(
        servers: Arc<dyn ServerRepository>,
        cipher: Arc<TokenCipher>,
        oauth: OAuthHttpClient,
    ) -> Self {
        Self {
            servers,
            cipher,
            oauth,
        }
    }

    /// Encrypt and persist a token set on the server descriptor.
    pub async fn store_tokens(
        &self,
        server_id: &ServerId,
        tokens: &TokenSet,
    ) -> Result<(), GatewayError> {
        let mut descriptor = self
            .servers
            .find_by_id(server_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("server {}", server_id)))?;

        let plaintext = serde_json::to_vec(tokens)?;
        descriptor.encrypted_tokens = Some(self.cipher.encrypt(&plaintext)?);
        descriptor.token_expires_at = tokens.expires_at;
        descriptor.updated_at = Utc::now();
        self.servers.save(&descriptor).await?;
        Ok(())
    }

    /// Decrypt the stored token set, refreshing it first when expired.
    pub async fn get_tokens(&self, server_id: &ServerId) -> Result<TokenSet, GatewayError> {
        let descriptor = self
            .servers
            .find_by_id(server_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("server {}", server_id)))?;

        let blob = descriptor.encrypted_tokens.as_deref().ok_or_else(|| {
            GatewayError::Unauthenticated(format!("server {} has no stored tokens", server_id))
        })?;
        let tokens: TokenSet = serde_json::from_slice(&self.cipher.decrypt(blob)?)?;

        if !tokens.is_expired(Utc::now()) {
            return Ok(tokens);
        }

        let refresh_token = tokens.refresh_token.as_deref().ok_or_else(|| {
            GatewayError::Unauthenticated(format!(
                "tokens for server {} expired and no refresh token is stored",
                server_id
            ))
        })?;
        let auth = descriptor.auth_config.as_ref().ok_or_else(|| {
            GatewayError::Unauthenticated(format!(
                "server {} has tokens but no auth configuration",
                server_id
            ))
        })?;

        let refreshed = self.oauth.refresh(auth, refresh_token).await?;
        self.store_tokens(server_id, &refreshed).await?;
        Ok(refreshed)
    }
}

/// Scope-checked consent grants.
pub struct ConsentService {
    consents: Arc<dyn ConsentRepository>,
}

impl ConsentService {
    pub fn new(consents: Arc<dyn ConsentRepository>) -> Self {
        Self { consents }
    }

    pub async fn register_client(
        &self,
        client: OAuthClientRegistration,
    ) -> Result<(), GatewayError> {
        if client.client_id.trim().is_empty() {
            return Err(GatewayError::InvalidArgument(
                "clientId must not be empty".to_string(),
            ));
        }
        self.consents.save_client(&client).await?;
        Ok(())
    }

    /// Record a grant. Scopes must be a subset of the client's
    /// registered scopes.
    pub async fn grant(
        &self,
        client_id: &str,
        user_id: &str,
        scopes: Vec<String>,
    ) -> Result<ConsentRecord, GatewayError> {
        let client = self
            .consents
            .find_client(client_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("client {}", client_id)))?;

        let registered: HashSet<&str> =
            client.registered_scopes.iter().map(String::as_str).collect();
        let excess: Vec<&str> = scopes
            .iter()
            .map(String::as_str)
            .filter(|scope| !registered.contains(scope))
            .collect();
        if !excess.is_empty() {
            return Err(GatewayError::PermissionDenied(format!(
                "scopes not registered for client {}: {}",
                client_id,
                excess.join(", ")
            )));
        }

        let consent = ConsentRecord {
            client_id: client_id.to_string(),
            user_id: user_id.to_string(),
            scopes,
            granted_at: Utc::now(),
        };
        self.consents.save_consent(&consent).await?;
        Ok(consent)
    }

    pub async fn revoke(&self, client_id: &str, user_id: &str) -> Result<(), GatewayError> {
        self.consents.revoke_consent(client_id, user_id).await?;
        Ok(())
    }

    /// Check that a grant covering `required` scopes exists.
    pub async fn check(
        &self,
        client_id: &str,
        user_id: &str,
        required: &[&str],
    ) -> Result<(), GatewayError> {
        let consent = self
            .consents
            .find_consent(client_id, user_id)
            .await?
            .ok_or_else(|| {
                GatewayError::PermissionDenied(format!(
                    "no consent on record for client {} and user {}",
                    client_id, user_id
                ))
            })?;
        let granted: HashSet<&str> = consent.scopes.iter().map(String::as_str).collect();
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|scope| !granted.contains(scope))
            .collect();
        if !missing.is_empty() {
            return Err(GatewayError::PermissionDenied(format!(
                "consent missing scopes: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}
