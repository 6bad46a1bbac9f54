// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::memory::{MemoryEntry, MemoryScope};
use crate::domain::repository::{MemoryRepository, RepositoryError};

pub struct PostgresMemoryRepository {
    pool: PgPool,
}

impl PostgresMemoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MemoryRepository for PostgresMemoryRepository {
    async fn upsert(&self, entry: &MemoryEntry) -> Result<(), RepositoryError> {
        let domain_json = serde_json::to_value(entry)?;

        sqlx::query(
            r#"
            INSERT INTO memory_entries (owner, key, domain_json, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (owner, key) DO UPDATE SET
                domain_json = EXCLUDED.domain_json,
                updated_at = NOW()
            "#,
        )
        .bind(entry.scope.owner())
        .bind(&entry.key)
        .bind(domain_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(
        &self,
        scope: &MemoryScope,
        key: &str,
    ) -> Result<Option<MemoryEntry>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT domain_json
            FROM memory_entries
            WHERE owner = $1 AND key = $2
            "#,
        )
        .bind(scope.owner())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            let domain_json: serde_json::Value = row.try_get("domain_json")?;
            Ok(Some(serde_json::from_value(domain_json)?))
        } else {
            Ok(None)
        }
    }

    async fn list_for_scope(
        &self,
        scope: &MemoryScope,
    ) -> Result<Vec<MemoryEntry>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT domain_json
            FROM memory_entries
            WHERE owner = $1
            ORDER BY key ASC
            "#,
        )
        .bind(scope.owner())
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let domain_json: serde_json::Value = row.try_get("domain_json")?;
            entries.push(serde_json::from_value(domain_json)?);
        }
        Ok(entries)
    }

    async fn delete(&self, scope: &MemoryScope, key: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            DELETE FROM memory_entries
            WHERE owner = $1 AND key = $2
            "#,
        )
        .bind(scope.owner())
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
