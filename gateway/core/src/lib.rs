// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # aegis-mcp-core
//!
//! The runtime heart of the AEGIS MCP gateway: it owns the catalog of
//! remote tool servers, brokers tool invocations over stdio and HTTP,
//! and runs the event fabric that turns synchronous client requests into
//! asynchronous jobs with progress fan-out over SSE and WebSockets.
//!
//! ## Subsystems
//!
//! | Subsystem | Modules |
//! |---|---|
//! | **Registry** | [`application::registry`], [`domain::server`], [`domain::workflow`] |
//! | **Transport broker** | [`infrastructure::broker`] (stdio + HTTP) |
//! | **Event fabric** | [`infrastructure::bus`], [`application::worker`], [`application::consumer`], [`application::healer`] |
//! | **Job tracking** | [`domain::job`], [`domain::asset`], [`application::jobs`], [`application::tracker`] |
//! | **Token vault** | [`infrastructure::crypto`], [`application::vault`] |
//! | **Overlays** | [`application::memory`], [`application::tasks`] |
//!
//! ## Layer Structure
//!
//! ```text
//! presentation/   <- HTTP API (axum), SSE, WebSocket
//!     |
//! application/    <- Use-cases, services, consumers
//!     |
//! domain/         <- Aggregates, events, repository traits
//!     |
//! infrastructure/ <- Postgres repos, transports, bus, crypto
//! ```

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
