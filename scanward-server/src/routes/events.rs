use std::{convert::Infallible, time::Duration};

use axum::{
    extract::{Path, State, rejection::PathRejection},
    response::{
        Sse,
        sse::{Event, KeepAlive},
    },
};
use scanward_core::orchestration::{ScanEvent, ScanEventStream};
use scanward_model::{ScanJob, StatusSnapshot};
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};
use tracing::warn;
use uuid::Uuid;

use super::scans::job_id;
use crate::{errors::AppResult, extract::Caller, state::AppState};

/// Lifecycle stream for one job.
///
/// Opens with a `snapshot` event carrying the current status and progress,
/// then relays the job's events until a terminal one. A job that is already
/// terminal gets the snapshot only.
pub async fn scan_events(
    State(state): State<AppState>,
    Caller(principal): Caller,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let id = job_id(path)?;
    // Subscribe before reading the job so no transition falls in between.
    let receiver = state.events().subscribe_scan_events();
    let job = state.scans().get(principal, id).await?;

    let stream = async_stream::stream! {
        yield Ok::<Event, Infallible>(snapshot_event(&job));

        if !job.is_terminal() {
            let mut live = BroadcastStream::new(receiver);
            while let Some(item) = live.next().await {
                match item {
                    Ok(event) if event.job_id == id => {
                        let terminal = event.is_terminal();
                        if let Some(frame) = scan_event_to_sse(&event) {
                            yield Ok(frame);
                        }
                        if terminal {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => warn!(job_id = %id, "scan event stream lagged: {err}"),
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(default_keep_alive()))
}

fn snapshot_event(job: &ScanJob) -> Event {
    let snapshot = StatusSnapshot::from(job);
    match Event::default().event("snapshot").json_data(snapshot) {
        Ok(event) => event,
        Err(err) => {
            warn!(job_id = %job.id, "failed to encode status snapshot: {err}");
            Event::default().event("snapshot")
        }
    }
}

fn scan_event_to_sse(event: &ScanEvent) -> Option<Event> {
    Event::default()
        .event(event.kind())
        .id(event.event_id.to_string())
        .json_data(event)
        .map_err(|err| warn!(job_id = %event.job_id, "failed to encode scan event: {err}"))
        .ok()
}

fn default_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("keep-alive")
}
