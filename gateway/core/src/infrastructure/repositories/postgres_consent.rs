// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::repository::{
    ConsentRecord, ConsentRepository, OAuthClientRegistration, RepositoryError,
};

pub struct PostgresConsentRepository {
    pool: PgPool,
}

impl PostgresConsentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConsentRepository for PostgresConsentRepository {
    async fn save_client(
        &self,
        client: &OAuthClientRegistration,
    ) -> Result<(), RepositoryError> {
        let domain_json = serde_json::to_value(client)?;

        sqlx::query(
            r#"
            INSERT INTO oauth_clients (client_id, domain_json)
            VALUES ($1, $2)
            ON CONFLICT (client_id) DO UPDATE SET
                domain_json = EXCLUDED.domain_json
            "#,
        )
        .bind(&client.client_id)
        .bind(domain_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_client(
        &self,
        client_id: &str,
    ) -> Result<Option<OAuthClientRegistration>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT domain_json
            FROM oauth_clients
            WHERE client_id = $1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            let domain_json: serde_json::Value = row.try_get("domain_json")?;
            Ok(Some(serde_json::from_value(domain_json)?))
        } else {
            Ok(None)
        }
    }

    async fn save_consent(&self, consent: &ConsentRecord) -> Result<(), RepositoryError> {
        let domain_json = serde_json::to_value(consent)?;

        sqlx::query(
            r#"
            INSERT INTO oauth_consents (client_id, user_id, domain_json)
            VALUES ($1, $2, $3)
            ON CONFLICT (client_id, user_id) DO UPDATE SET
                domain_json = EXCLUDED.domain_json
            "#,
        )
        .bind(&consent.client_id)
        .bind(&consent.user_id)
        .bind(domain_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_consent(
        &self,
        client_id: &str,
        user_id: &str,
    ) -> Result<Option<ConsentRecord>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT domain_json
            FROM oauth_consents
            WHERE client_id = $1 AND user_id = $2
            "#,
        )
        .bind(client_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            let domain_json: serde_json::Value = row.try_get("domain_json")?;
            Ok(Some(serde_json::from_value(domain_json)?))
        } else {
            Ok(None)
        }
    }

    async fn revoke_consent(
        &self,
        client_id: &str,
        user_id: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            DELETE FROM oauth_consents
            WHERE client_id = $1 AND user_id = $2
            "#,
        )
        .bind(client_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
