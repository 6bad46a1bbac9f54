// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workflow state machine for per-server orchestration.
//!
//! Callers coordinate multi-step orchestrations through a lock owner, an
//! attempt counter, and a named state. The store column stays a string for
//! forward compatibility, but the registry boundary only accepts names from
//! the closed set below and rejects unknown transitions.
//!
//! Terminal rule: any state whose name ends in `Completed` or `Failed`,
//! plus `PlanB`, releases the lock on transition.

use serde::{Deserialize, Serialize};

use crate::domain::error::GatewayError;

/// Closed set of workflow state names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowState {
    /// No orchestration in flight.
    Idle,
    /// An orchestrator is deciding what to do next.
    Planning,
    /// Capturing upstream context before generation.
    Capturing,
    /// A generation step is running.
    Generating,
    /// A refinement step is running.
    Refining,
    /// Waiting for a handover from another server.
    AwaitingHandover,
    /// Healer-driven retry in progress.
    Recovering,
    /// Orchestration finished successfully.
    Completed,
    /// Orchestration finished unsuccessfully.
    Failed,
    /// A single generation step finished; outer orchestration continues.
    GenerationCompleted,
    /// A single generation step failed; outer orchestration continues.
    GenerationFailed,
    /// Retries exhausted; an operator-visible fallback is required.
    PlanB,
}

impl WorkflowState {
    /// Canonical string stored in the descriptor's workflow column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Planning => "planning",
            Self::Capturing => "vision.capturing",
            Self::Generating => "generating",
            Self::Refining => "refining",
            Self::AwaitingHandover => "awaiting_handover",
            Self::Recovering => "recovering",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::GenerationCompleted => "GenerationCompleted",
            Self::GenerationFailed => "GenerationFailed",
            Self::PlanB => "PlanB",
        }
    }

    /// Parse a stored or caller-supplied state name. Unknown names are
    /// rejected at the registry boundary.
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        let state = match raw {
            "Idle" => Self::Idle,
            "planning" => Self::Planning,
            "vision.capturing" => Self::Capturing,
            "generating" => Self::Generating,
            "refining" => Self::Refining,
            "awaiting_handover" => Self::AwaitingHandover,
            "recovering" => Self::Recovering,
            "Completed" => Self::Completed,
            "Failed" => Self::Failed,
            "GenerationCompleted" => Self::GenerationCompleted,
            "GenerationFailed" => Self::GenerationFailed,
            "PlanB" => Self::PlanB,
            other => {
                return Err(GatewayError::InvalidArgument(format!(
                    "unknown workflow state '{}'",
                    other
                )))
            }
        };
        Ok(state)
    }

    /// Terminal states release the workflow lock.
    pub fn is_terminal(&self) -> bool {
        self.as_str().ends_with("Completed")
            || self.as_str().ends_with("Failed")
            || matches!(self, Self::PlanB)
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
