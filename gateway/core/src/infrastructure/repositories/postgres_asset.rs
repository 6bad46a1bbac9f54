// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::asset::Asset;
use crate::domain::job::JobId;
use crate::domain::repository::{AssetRepository, RepositoryError};

pub struct PostgresAssetRepository {
    pool: PgPool,
}

impl PostgresAssetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssetRepository for PostgresAssetRepository {
    async fn save_as_latest(&self, asset: &Asset) -> Result<(), RepositoryError> {
        let mut latest = asset.clone();
        latest.is_latest = true;
        let domain_json = serde_json::to_value(&latest)?;

        // Demote-then-insert in one transaction keeps exactly one latest
        // asset per job.
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE assets
            SET is_latest = FALSE,
                domain_json = jsonb_set(domain_json, '{isLatest}', 'false')
            WHERE job_id = $1
            "#,
        )
        .bind(asset.job_id.0)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO assets (id, job_id, version, is_latest, domain_json)
            VALUES ($1, $2, $3, TRUE, $4)
            "#,
        )
        .bind(latest.id.0)
        .bind(latest.job_id.0)
        .bind(latest.version as i32)
        .bind(domain_json)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn find_by_job(&self, job_id: JobId) -> Result<Vec<Asset>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT domain_json
            FROM assets
            WHERE job_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(job_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut assets = Vec::with_capacity(rows.len());
        for row in rows {
            let domain_json: serde_json::Value = row.try_get("domain_json")?;
            assets.push(serde_json::from_value(domain_json)?);
        }
        Ok(assets)
    }

    async fn find_latest_for_job(
        &self,
        job_id: JobId,
    ) -> Result<Option<Asset>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT domain_json
            FROM assets
            WHERE job_id = $1 AND is_latest
            "#,
        )
        .bind(job_id.0)
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
