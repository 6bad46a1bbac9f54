// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Gateway error taxonomy.
//!
//! One error enum spans the registry, the transport broker, and the event
//! fabric so that HTTP handlers and event consumers map failures uniformly.
//! The variants are *kinds*, not sources: a stdio timer firing and a tool
//! discovery deadline both surface as [`GatewayError::Timeout`].

use crate::domain::repository::RepositoryError;

/// Unified error type returned by application services and transports.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Request failed schema or id-format validation. Maps to HTTP 400.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown server, tool, or job. Maps to HTTP 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation requires state the target does not have, e.g. a descriptor
    /// with neither endpoint nor command. Maps to HTTP 409.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// A broker or discovery timer fired. Retryable. Maps to HTTP 504 when
    /// surfaced synchronously.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Malformed JSON-RPC or unparseable transport framing. Not retried.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote server returned a JSON-RPC error or a non-2xx status after
    /// retry exhaustion. Retryable subject to healer classification.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Token missing or expired with no refresh path. Maps to HTTP 401.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Consent missing or scopes exceeded. Maps to HTTP 403.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Catch-all; logged with full context at the call site.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status code for synchronous surfaces.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidArgument(_) => 400,
            Self::NotFound(_) => 404,
            Self::PreconditionFailed(_) => 409,
            Self::Timeout(_) => 504,
            Self::Protocol(_) => 502,
            Self::Upstream(_) => 502,
            Self::Unauthenticated(_) => 401,
            Self::PermissionDenied(_) => 403,
            Self::Internal(_) => 500,
        }
    }

    /// Whether a worker may re-attempt the operation that produced this
    /// error. Feeds the `retryable` flag on failure events.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Upstream(_) | Self::Internal(_))
    }

    /// Stable machine-readable code used in problem-JSON bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::PreconditionFailed(_) => "precondition_failed",
            Self::Timeout(_) => "timeout",
            Self::Protocol(_) => "protocol_error",
            Self::Upstream(_) => "upstream",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<RepositoryError> for GatewayError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => GatewayError::NotFound(what),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Protocol(err.to_string())
    }
}
