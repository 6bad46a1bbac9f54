// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Design job operations against a running gateway.

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use serde_json::{json, Value};

#[derive(Subcommand)]
pub enum JobsCommand {
    /// Submit a generation request
    Generate {
        /// What to produce
        #[arg(long)]
        description: String,
        #[arg(long)]
        style: Option<String>,
        #[arg(long)]
        server_id: Option<String>,
    },
    /// Submit a refinement of a finished job
    Refine {
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        instructions: String,
    },
    /// Show a job and its assets
    Status {
        job_id: String,
    },
}

pub async fn run(gateway_url: &str, command: JobsCommand) -> Result<()> {
    let client = reqwest::Client::new();
    match command {
        JobsCommand::Generate {
            description,
            style,
            server_id,
        } => {
            let mut body = json!({"description": description});
            if let Some(style) = style {
                body["style"] = json!(style);
            }
            if let Some(server_id) = server_id {
                body["serverId"] = json!(server_id);
            }
            let response = client
                .post(format!("{}/api/mcp/tools/generate", gateway_url))
                .json(&body)
                .send()
                .await?;
            let accepted: Value = check(response).await?.json().await?;
            println!(
                "{} {}",
                "job".green().bold(),
                accepted["jobId"].as_str().unwrap_or("?")
            );
        }
        JobsCommand::Refine {
            job_id,
            instructions,
        } => {
            let response = client
                .post(format!("{}/api/mcp/tools/refine", gateway_url))
                .json(&json!({"jobId": job_id, "instructions": instructions}))
                .send()
                .await?;
            let accepted: Value = check(response).await?.json().await?;
            println!(
                "{} {}",
                "job".green().bold(),
                accepted["jobId"].as_str().unwrap_or("?")
            );
        }
        JobsCommand::Status { job_id } => {
            let response = client
                .get(format!("{}/api/mcp/tools/job/{}", gateway_url, job_id))
                .send()
                .await?;
            let details: Value = check(response).await?.json().await?;
            let job = &details["job"];
            let status = job["status"].as_str().unwrap_or("?");
            let progress = job["progress"].as_u64().unwrap_or(0);
            let badge = match status {
                "COMPLETED" => status.green(),
                "FAILED" => status.red(),
                other => other.cyan(),
            };
            println!("{}  {}  {}%", job_id.bold(), badge, progress);
            if let Some(error) = job["errorMessage"].as_str() {
                println!("  {} {}", "error:".red(), error);
            }
            if let Some(assets) = details["assets"].as_array() {
                for asset in assets {
                    println!(
                        "  asset v{} {} latest={}",
                        asset["version"],
                        asset["assetType"].as_str().unwrap_or("?"),
                        asset["isLatest"]
                    );
                }
            }
        }
    }
    Ok(())
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    bail!("gateway returned {}: {}", status, body)
}
