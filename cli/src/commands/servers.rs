// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Catalog operations against a running gateway.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde_json::Value;

#[derive(Subcommand)]
pub enum ServersCommand {
    /// List registered servers
    List {
        /// Case-insensitive substring filter
        #[arg(long)]
        search: Option<String>,
        /// Capability membership filter
        #[arg(long)]
        capability: Option<String>,
    },
    /// Show one server
    Get {
        /// Server id (org.name/server-name)
        server_id: String,
    },
    /// Publish (upsert) a descriptor from a JSON file
    Publish {
        /// Path to the descriptor JSON
        file: std::path::PathBuf,
    },
    /// Soft-delete a server
    Delete {
        /// Server id (org.name/server-name)
        server_id: String,
    },
}

pub async fn run(gateway_url: &str, command: ServersCommand) -> Result<()> {
    let client = reqwest::Client::new();
    match command {
        ServersCommand::List { search, capability } => {
            let mut request = client.get(format!("{}/v0/servers", gateway_url));
            if let Some(search) = search {
                request = request.query(&[("search", search)]);
            }
            if let Some(capability) = capability {
                request = request.query(&[("capability", capability)]);
            }
            let servers: Vec<Value> = check(request.send().await?).await?.json().await?;
            if servers.is_empty() {
                println!("{}", "no servers registered".dimmed());
                return Ok(());
            }
            for server in servers {
                let id = server["serverId"].as_str().unwrap_or("?");
                let name = server["name"].as_str().unwrap_or("?");
                let tools = server["tools"].as_array().map(Vec::len).unwrap_or(0);
                let verified = server["identity"]["verified"].as_bool().unwrap_or(false);
                let badge = if verified {
                    "verified".green()
                } else {
                    "unverified".yellow()
                };
                println!("{}  {}  {} tools  [{}]", id.bold(), name, tools, badge);
            }
        }
        ServersCommand::Get { server_id } => {
            let encoded = urlencode(&server_id);
            let response = client
                .get(format!("{}/v0/servers/{}", gateway_url, encoded))
                .send()
                .await?;
            let descriptor: Value = check(response).await?.json().await?;
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
        }
        ServersCommand::Publish { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let descriptor: Value = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;
            let response = client
                .post(format!("{}/v0/publish", gateway_url))
                .json(&descriptor)
                .send()
                .await?;
            let published: Value = check(response).await?.json().await?;
            println!(
                "{} {}",
                "published".green().bold(),
                published["serverId"].as_str().unwrap_or("?")
            );
        }
        ServersCommand::Delete { server_id } => {
            let encoded = urlencode(&server_id);
            let response = client
                .delete(format!("{}/v0/servers/{}", gateway_url, encoded))
                .send()
                .await?;
            check(response).await?;
            println!("{} {}", "deleted".yellow().bold(), server_id);
        }
    }
    Ok(())
}

/// Percent-encode the slash inside a server id for URL paths.
fn urlencode(server_id: &str) -> String {
    server_id.replace('/', "%2F")
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    bail!("gateway returned {}: {}", status, body)
}
