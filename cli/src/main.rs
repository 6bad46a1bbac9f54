// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AEGIS MCP Gateway CLI
//!
//! The `aegis-mcp` binary runs the gateway daemon and offers operator
//! commands that drive a running gateway over its HTTP API.
//!
//! ## Commands
//!
//! - `aegis-mcp serve` - run the gateway daemon
//! - `aegis-mcp servers list|get|publish|delete` - catalog operations
//! - `aegis-mcp jobs generate|status` - design job operations
//!
//! Exit codes: 0 on success, 1 on fatal configuration or store errors.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{JobsCommand, ServersCommand};

/// AEGIS MCP gateway - registry and invocation gateway for MCP servers
#[derive(Parser)]
#[command(name = "aegis-mcp")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log level filter (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "AEGIS_MCP_LOG", default_value = "info")]
    log_level: String,

    /// Base URL of a running gateway, for client commands
    #[arg(
        long,
        global = true,
        env = "AEGIS_MCP_URL",
        default_value = "http://127.0.0.1:8090"
    )]
    gateway_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway daemon
    Serve {
        /// HTTP port (overrides AEGIS_MCP_PORT)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Tool-server catalog operations
    Servers {
        #[command(subcommand)]
        command: ServersCommand,
    },

    /// Design job operations
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await,
        Commands::Servers { command } => commands::servers::run(&cli.gateway_url, command).await,
        Commands::Jobs { command } => commands::jobs::run(&cli.gateway_url, command).await,
    }
}
