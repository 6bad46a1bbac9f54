// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::repository::{DurableTaskRepository, RepositoryError};
use crate::domain::server::ServerId;
use crate::domain::task::{DurableTask, DurableTaskId};

pub struct PostgresDurableTaskRepository {
    pool: PgPool,
}

impl PostgresDurableTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DurableTaskRepository for PostgresDurableTaskRepository {
    async fn save(&self, task: &DurableTask) -> Result<(), RepositoryError> {
        let domain_json = serde_json::to_value(task)?;

        sqlx::query(
            r#"
            INSERT INTO durable_tasks (id, server_id, domain_json, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (id) DO UPDATE SET
                domain_json = EXCLUDED.domain_json,
                updated_at = NOW()
            "#,
        )
        .bind(task.id.0)
        .bind(task.server_id.as_str())
        .bind(domain_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(
        &self,
        id: DurableTaskId,
    ) -> Result<Option<DurableTask>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT domain_json
            FROM durable_tasks
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            let domain_json: serde_json::Value = row.try_get("domain_json")?;
            Ok(Some(serde_json::from_value(domain_json)?))
        } else {
            Ok(None)
        }
    }

    async fn find_by_server(
        &self,
        server_id: &ServerId,
    ) -> Result<Vec<DurableTask>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT domain_json
            FROM durable_tasks
            WHERE server_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(server_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let domain_json: serde_json::Value = row.try_get("domain_json")?;
            tasks.push(serde_json::from_value(domain_json)?);
        }
        Ok(tasks)
    }
}
