// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Process configuration, resolved from environment variables.
//!
//! Everything has a development default except the database URL (absent
//! means in-memory repositories) and the OAuth application (absent means
//! no token refresh). The encryption secret defaults only so local
//! development works; `serve` logs a loud warning when the default is in
//! use.

use crate::infrastructure::bus::TopicConfig;

/// Consumer group ids, one per consumer class.
#[derive(Debug, Clone)]
pub struct ConsumerGroups {
    pub gateway: String,
    pub workers: String,
    pub handover: String,
    pub healer: String,
}

impl ConsumerGroups {
    fn with_client_id(client_id: &str) -> Self {
        Self {
            gateway: format!("{}-gateway", client_id),
            workers: format!("{}-workers", client_id),
            handover: format!("{}-handover", client_id),
            healer: format!("{}-healer", client_id),
        }
    }
}

/// OAuth application credentials for consent flows.
#[derive(Debug, Clone)]
pub struct OAuthAppConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: Option<String>,
    pub database_url: Option<String>,
    /// 0 disables the Prometheus exporter.
    pub metrics_port: u16,
    pub events_enabled: bool,
    pub topics: TopicConfig,
    pub groups: ConsumerGroups,
    pub encryption_secret: String,
    pub encryption_salt: String,
    pub oauth: Option<OAuthAppConfig>,
}

pub const DEV_ENCRYPTION_SECRET: &str = "dev-only-encryption-secret";

impl GatewayConfig {
    pub fn from_env() -> Self {
        let defaults = TopicConfig::default();
        let client_id = env_or("EVENT_BUS_CLIENT_ID", "aegis-mcp-gateway");

        let oauth = match (
            std::env::var("OAUTH_CLIENT_ID").ok(),
            std::env::var("OAUTH_CLIENT_SECRET").ok(),
            std::env::var("OAUTH_REDIRECT_URI").ok(),
        ) {
            (Some(client_id), Some(client_secret), Some(redirect_uri)) => Some(OAuthAppConfig {
                client_id,
                client_secret,
                redirect_uri,
            }),
            _ => None,
        };

        Self {
            host: env_or("AEGIS_MCP_HOST", "0.0.0.0"),
            port: env_parse_or("AEGIS_MCP_PORT", 8090),
            cors_origin: std::env::var("CORS_ORIGIN").ok(),
            database_url: std::env::var("DATABASE_URL").ok(),
            metrics_port: env_parse_or("METRICS_PORT", 0),
            events_enabled: env_parse_or("EVENT_BUS_ENABLED", true),
            topics: TopicConfig {
                requests: env_or("TOPIC_DESIGN_REQUESTS", &defaults.requests),
                results: env_or("TOPIC_DESIGN_RESULTS", &defaults.results),
                handover_prefix: env_or("TOPIC_EVENTS_PREFIX", &defaults.handover_prefix),
                dlq: env_or("TOPIC_EVENTS_DLQ", &defaults.dlq),
            },
            groups: ConsumerGroups::with_client_id(&client_id),
            encryption_secret: env_or("ENCRYPTION_SECRET", DEV_ENCRYPTION_SECRET),
            encryption_salt: env_or("ENCRYPTION_SALT", "aegis-mcp-dev-salt"),
            oauth,
        }
    }

    pub fn uses_dev_encryption_secret(&self) -> bool {
        self.encryption_secret == DEV_ENCRYPTION_SECRET
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = GatewayConfig::from_env();
        assert!(!config.topics.requests.is_empty());
        assert!(!config.topics.dlq.is_empty());
        assert!(config.groups.gateway.ends_with("-gateway"));
        assert!(config.groups.healer.ends_with("-healer"));
    }
}
