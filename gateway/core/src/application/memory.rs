// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Conversation memory service.
//!
//! Upserts preserve the original creation time and access statistics of
//! a replaced entry. Reads bump the access counters and never return
//! expired entries.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::error::GatewayError;
use crate::domain::memory::{MemoryEntry, MemoryKind, MemoryScope};
use crate::domain::repository::MemoryRepository;

pub struct MemoryService {
    entries: Arc<dyn MemoryRepository>,
}

impl MemoryService {
    pub fn new(entries: Arc<dyn MemoryRepository>) -> Self {
        Self { entries }
    }

    /// Insert or replace the entry for `(scope, key)`.
    #[allow(clippy::too_many_arguments)]
    pub async fn remember(
        &self,
        scope: MemoryScope,
        kind: MemoryKind,
        key: &str,
        value: &str,
        importance: u8,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<MemoryEntry, GatewayError> {
        let mut entry = MemoryEntry::new(scope.clone(), kind, key, value, importance)?;
        entry.expires_at = expires_at;

        if let Some(existing) = self.entries.find(&scope, key).await? {
            entry.id = existing.id;
            entry.created_at = existing.created_at;
            entry.access_count = existing.access_count;
            entry.last_accessed = existing.last_accessed;
        }
        self.entries.upsert(&entry).await?;
        Ok(entry)
    }

    /// Fetch one entry, bumping its access statistics. Expired entries
    /// read as absent.
    pub async fn recall(
        &self,
        scope: &MemoryScope,
        key: &str,
    ) -> Result<Option<MemoryEntry>, GatewayError> {
        let Some(mut entry) = self.entries.find(scope, key).await? else {
            return Ok(None);
        };
        if entry.is_expired(Utc::now()) {
            self.entries.delete(scope, key).await?;
            return Ok(None);
        }
        entry.record_access();
        self.entries.upsert(&entry).await?;
        Ok(Some(entry))
    }

    /// All live entries for a scope, most important first.
    pub async fn recall_all(
        &self,
        scope: &MemoryScope,
    ) -> Result<Vec<MemoryEntry>, GatewayError> {
        let now = Utc::now();
        let mut entries = self.entries.list_for_scope(scope).await?;
        entries.retain(|entry| !entry.is_expired(now));
        entries.sort_by(|a, b| b.importance.cmp(&a.importance).then(a.key.cmp(&b.key)));
        Ok(entries)
    }

    pub async fn forget(&self, scope: &MemoryScope, key: &str) -> Result<(), GatewayError> {
        self.entries.delete(scope, key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemoryMemoryRepository;
    use chrono::Duration;

    fn scope() -> MemoryScope {
        MemoryScope {
            conversation_id: Some("conv-1".into()),
            user_id: Some("user-1".into()),
        }
    }

    fn service() -> MemoryService {
        MemoryService::new(Arc::new(InMemoryMemoryRepository::new()))
    }

    #[tokio::test]
    async fn upsert_preserves_access_statistics() {
        let service = service();
        service
            .remember(scope(), MemoryKind::Preference, "palette", "blue", 5, None)
            .await
            .unwrap();
        service.recall(&scope(), "palette").await.unwrap();
        service.recall(&scope(), "palette").await.unwrap();

        let replaced = service
            .remember(scope(), MemoryKind::Preference, "palette", "teal", 7, None)
            .await
            .unwrap();
        assert_eq!(replaced.value, "teal");
        assert_eq!(replaced.access_count, 2);
    }

    #[tokio::test]
    async fn recall_bumps_access_count() {
        let service = service();
        service
            .remember(scope(), MemoryKind::Fact, "brand", "acme", 5, None)
            .await
            .unwrap();

        let first = service.recall(&scope(), "brand").await.unwrap().unwrap();
        assert_eq!(first.access_count, 1);
        let second = service.recall(&scope(), "brand").await.unwrap().unwrap();
        assert_eq!(second.access_count, 2);
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let service = service();
        service
            .remember(
                scope(),
                MemoryKind::Context,
                "session",
                "ephemeral",
                3,
                Some(Utc::now() - Duration::seconds(5)),
            )
            .await
            .unwrap();

        assert!(service.recall(&scope(), "session").await.unwrap().is_none());
        assert!(service.recall_all(&scope()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recall_all_orders_by_importance() {
        let service = service();
        service
            .remember(scope(), MemoryKind::Fact, "minor", "x", 2, None)
            .await
            .unwrap();
        service
            .remember(scope(), MemoryKind::Instruction, "major", "y", 9, None)
            .await
            .unwrap();

        let entries = service.recall_all(&scope()).await.unwrap();
        assert_eq!(entries[0].key, "major");
        assert_eq!(entries[1].key, "minor");
    }
}
