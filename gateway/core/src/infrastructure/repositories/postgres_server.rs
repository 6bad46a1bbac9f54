// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::repository::{RepositoryError, ServerRepository};
use crate::domain::server::{ServerDescriptor, ServerId, WorkflowSlot};

pub struct PostgresServerRepository {
    pool: PgPool,
}

impl PostgresServerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServerRepository for PostgresServerRepository {
    async fn save(&self, descriptor: &ServerDescriptor) -> Result<(), RepositoryError> {
        let domain_json = serde_json::to_value(descriptor)?;

        sqlx::query(
            r#"
            INSERT INTO mcp_servers (server_id, domain_json, is_active, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (server_id) DO UPDATE SET
                domain_json = EXCLUDED.domain_json,
                is_active = EXCLUDED.is_active,
                updated_at = NOW()
            "#,
        )
        .bind(descriptor.server_id.as_str())
        .bind(domain_json)
        .bind(descriptor.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &ServerId,
    ) -> Result<Option<ServerDescriptor>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT domain_json
            FROM mcp_servers
            WHERE server_id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            let domain_json: serde_json::Value = row.try_get("domain_json")?;
            Ok(Some(serde_json::from_value(domain_json)?))
        } else {
            Ok(None)
        }
    }

    async fn list_active(&self) -> Result<Vec<ServerDescriptor>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT domain_json
            FROM mcp_servers
            WHERE is_active
            ORDER BY server_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut descriptors = Vec::with_capacity(rows.len());
        for row in rows {
            let domain_json: serde_json::Value = row.try_get("domain_json")?;
            descriptors.push(serde_json::from_value(domain_json)?);
        }
        Ok(descriptors)
    }

    async fn update_workflow(
        &self,
        id: &ServerId,
        slot: &WorkflowSlot,
    ) -> Result<(), RepositoryError> {
        let slot_json = serde_json::to_value(slot)?;

        // A single UPDATE serializes workflow mutation per row.
        let result = sqlx::query(
            r#"
            UPDATE mcp_servers
            SET domain_json = jsonb_set(domain_json, '{workflow}', $2::jsonb),
                updated_at = NOW()
            WHERE server_id = $1
            "#,
        )
        .bind(id.as_str())
        .bind(slot_json)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("server {}", id)));
        }
        Ok(())
    }
}
