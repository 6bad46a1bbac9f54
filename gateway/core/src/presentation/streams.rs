// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Server-sent-events adapter for job progress.
//!
//! Subscribes to the job tracker and translates frames to SSE events.
//! The stream opens with a snapshot of the job's current state and
//! closes after the terminal frame.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;

use crate::application::tracker::{JobSubscription, JobUpdate};
use crate::domain::job::JobId;
use crate::presentation::api::{ApiError, AppState};

pub async fn job_stream(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<JobId>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    // Subscribe before reading the snapshot so no frame is lost between
    // the two.
    let subscription = state.tracker.subscribe(job_id);
    let (job, assets) = state.jobs.get_job(job_id).await?;

    let snapshot = JobUpdate::JobStatus {
        job_id: job.id,
        status: job.status,
        progress: job.progress,
    };
    let already_terminal = job.status.is_terminal();
    let terminal_frame = already_terminal.then(|| JobUpdate::JobComplete {
        job_id: job.id,
        status: job.status,
        error_message: job.error_message.clone(),
        asset: assets.into_iter().find(|a| a.is_latest),
    });

    struct StreamState {
        subscription: JobSubscription,
        pending: Vec<JobUpdate>,
        done: bool,
    }

    let initial = StreamState {
        subscription,
        pending: {
            let mut frames = vec![snapshot];
            frames.extend(terminal_frame);
            frames
        },
        done: already_terminal,
    };

    let stream = futures::stream::unfold(initial, |mut state| async move {
        if let Some(update) = state.pending.first().cloned() {
            state.pending.remove(0);
            return Some((sse_event(&update), state));
        }
        if state.done {
            return None;
        }
        match state.subscription.recv().await {
            Some(update) => {
                if matches!(update, JobUpdate::JobComplete { .. }) {
                    state.done = true;
                }
                Some((sse_event(&update), state))
            }
            None => None,
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_event(update: &JobUpdate) -> Result<Event, axum::Error> {
    let name = match update {
        JobUpdate::JobStatus { .. } => "job_status",
        JobUpdate::JobProgress { .. } => "job_progress",
        JobUpdate::JobComplete { .. } => "job_complete",
    };
    let data = serde_json::to_string(update).unwrap_or_else(|_| "{}".to_string());
    Ok(Event::default().event(name).data(data))
}
