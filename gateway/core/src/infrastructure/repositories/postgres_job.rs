// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::job::{Job, JobId};
use crate::domain::repository::{JobRepository, RepositoryError};

pub struct PostgresJobRepository {
    pool: PgPool,
}

impl PostgresJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for PostgresJobRepository {
    async fn save(&self, job: &Job) -> Result<(), RepositoryError> {
        let domain_json = serde_json::to_value(job)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, status, domain_json, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                domain_json = EXCLUDED.domain_json,
                updated_at = NOW()
            "#,
        )
        .bind(job.id.0)
        .bind(serde_json::to_value(job.status)?.as_str().unwrap_or("PENDING").to_string())
        .bind(domain_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT domain_json
            FROM jobs
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
}
