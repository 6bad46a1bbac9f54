// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Conversation memory entries.
//!
//! Upsert semantics are keyed by `(conversation_id | user_id, key)`: a
//! second write to the same scope and key replaces the value rather than
//! creating a sibling. Reads bump `access_count` and `last_accessed`, and
//! expired entries are filtered out of every lookup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Preference,
    Fact,
    Context,
    Instruction,
}

/// Scope a memory entry belongs to. At least one of the two ids must be
/// present; conversation scope wins when both are supplied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryScope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl MemoryScope {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.conversation_id.is_none() && self.user_id.is_none() {
            return Err(GatewayError::InvalidArgument(
                "memory entry requires a conversationId or a userId".to_string(),
            ));
        }
        Ok(())
    }

    /// Canonical owner string used as the upsert key prefix.
    pub fn owner(&self) -> &str {
        self.conversation_id
            .as_deref()
            .or(self.user_id.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub id: Uuid,
    #[serde(flatten)]
    pub scope: MemoryScope,
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    pub key: String,
    pub value: String,
    /// 1 (disposable) to 10 (critical).
    pub importance: u8,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(
        scope: MemoryScope,
        kind: MemoryKind,
        key: impl Into<String>,
        value: impl Into<String>,
        importance: u8,
    ) -> Result<Self, GatewayError> {
        scope.validate()?;
        if !(1..=10).contains(&importance) {
            return Err(GatewayError::InvalidArgument(format!(
                "importance must be between 1 and 10, got {}",
                importance
            )));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            scope,
            kind,
            key: key.into(),
            value: value.into(),
            importance,
            access_count: 0,
            last_accessed: now,
            expires_at: None,
            created_at: now,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn record_access(&mut self) {
        self.access_count += 1;
        self.last_accessed = Utc::now();
    }
}
