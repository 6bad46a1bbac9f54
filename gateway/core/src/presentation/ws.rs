// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! WebSocket adapter for job progress.
//!
//! Clients send `{type: "subscribe" | "unsubscribe" | "ping", jobId?}`;
//! the server pushes `connected`, `job_status`, `job_progress`,
//! `job_complete`, `error`, and `pong` frames. One socket can follow any
//! number of jobs; each subscription is its own forwarding task, so a
//! terminal frame on one job does not disturb the others.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::domain::job::JobId;
use crate::presentation::api::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientFrame {
    #[serde(rename = "type")]
    kind: String,
    job_id: Option<JobId>,
}

pub async fn websocket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut source) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(64);
    let mut forwarders: HashMap<JobId, JoinHandle<()>> = HashMap::new();

    let _ = tx.send(json!({"type": "connected"}).to_string()).await;

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(frame) = outgoing else { break };
                if sink.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            incoming = source.next() => {
                let Some(Ok(message)) = incoming else { break };
                let Message::Text(text) = message else { continue };
                handle_frame(&state, &tx, &mut forwarders, text.as_str()).await;
            }
        }
    }

    for (_, task) in forwarders {
        task.abort();
    }
    debug!("websocket closed");
}

async fn handle_frame(
    state: &Arc<AppState>,
    tx: &mpsc::Sender<String>,
    forwarders: &mut HashMap<JobId, JoinHandle<()>>,
    raw: &str,
) {
    let frame: ClientFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(err) => {
            let _ = tx
                .send(json!({"type": "error", "message": format!("bad frame: {}", err)}).to_string())
                .await;
            return;
        }
    };

    match frame.kind.as_str() {
        "ping" => {
            let _ = tx.send(json!({"type": "pong"}).to_string()).await;
        }
        "subscribe" => {
            let Some(job_id) = frame.job_id else {
                let _ = tx
                    .send(json!({"type": "error", "message": "subscribe requires jobId"}).to_string())
                    .await;
                return;
            };
            match state.jobs.get_job(job_id).await {
                Ok((job, assets)) => {
                    // Immediate snapshot, then live frames.
                    let _ = tx
                        .send(
                            json!({
                                "type": "job_status",
                                "jobId": job.id,
                                "status": job.status,
                                "progress": job.progress,
                            })
                            .to_string(),
                        )
                        .await;
                    if job.status.is_terminal() {
                        let latest = assets.into_iter().find(|a| a.is_latest);
                        let _ = tx
                            .send(
                                json!({
                                    "type": "job_complete",
                                    "jobId": job.id,
                                    "status": job.status,
                                    "errorMessage": job.error_message,
                                    "asset": latest,
                                })
                                .to_string(),
                            )
                            .await;
                        return;
                    }

                    let mut subscription = state.tracker.subscribe(job_id);
                    let forward_tx = tx.clone();
                    let task = tokio::spawn(async move {
                        while let Some(update) = subscription.recv().await {
                            let terminal = matches!(
                                update,
                                crate::application::tracker::JobUpdate::JobComplete { .. }
                            );
                            let frame = serde_json::to_string(&update)
                                .unwrap_or_else(|_| "{}".to_string());
                            if forward_tx.send(frame).await.is_err() || terminal {
                                break;
                            }
                        }
                    });
                    if let Some(previous) = forwarders.insert(job_id, task) {
                        previous.abort();
                    }
                }
                Err(err) => {
                    let _ = tx
                        .send(json!({"type": "error", "message": err.to_string()}).to_string())
                        .await;
                }
            }
        }
        "unsubscribe" => {
            if let Some(job_id) = frame.job_id {
                if let Some(task) = forwarders.remove(&job_id) {
                    task.abort();
                }
            }
        }
        other => {
            let _ = tx
                .send(
                    json!({"type": "error", "message": format!("unknown frame type '{}'", other)})
                        .to_string(),
                )
                .await;
        }
    }
}
