// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod consumer;
pub mod handover;
pub mod healer;
pub mod jobs;
pub mod memory;
pub mod registry;
pub mod tasks;
pub mod tracker;
pub mod vault;
pub mod worker;
