// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod jobs;
pub mod serve;
pub mod servers;

pub use jobs::JobsCommand;
pub use servers::ServersCommand;
