// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Asset aggregate: a produced artifact owned by a job.
//!
//! Versions are monotonic per refinement lineage and exactly one asset per
//! job carries `is_latest == true`. Refinement assets record their parent
//! job and parent asset so lineage can be replayed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub Uuid);

impl AssetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Where the produced content lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum AssetContent {
    /// Content carried inline (e.g. SVG markup).
    Inline(String),
    /// Content stored elsewhere and referenced by URL.
    Url(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: AssetId,
    pub job_id: JobId,
    pub content: AssetContent,
    /// Media type hint, e.g. `image/svg+xml`.
    pub asset_type: String,
    /// Monotonic within a refinement lineage, starting at 1.
    pub version: u32,
    pub is_latest: bool,
    /// Job that produced the refined source, for refinement lineage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_asset_id: Option<AssetId>,
    pub created_at: DateTime<Utc>,
}

impl Asset {
    pub fn new(job_id: JobId, content: AssetContent, asset_type: impl Into<String>) -> Self {
        Self {
            id: AssetId::new(),
            job_id,
            content,
            asset_type: asset_type.into(),
            version: 1,
            is_latest: true,
            parent_job_id: None,
            parent_asset_id: None,
            created_at: Utc::now(),
        }
    }

    /// Build a refinement of `parent`, bumping the parent's version.
    pub fn refinement_of(
        job_id: JobId,
        parent: &Asset,
        content: AssetContent,
        asset_type: impl Into<String>,
    ) -> Self {
        let mut asset = Self::new(job_id, content, asset_type);
        asset.version = parent.version + 1;
        asset.parent_job_id = Some(parent.job_id);
        asset.parent_asset_id = Some(parent.id);
        asset
    }
}
