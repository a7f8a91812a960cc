//! `GET .../stream` (§4.6, §6): bridges the per-Story broadcast channel onto
//! an SSE response. Best-effort like the bus itself — a lagged receiver
//! just skips ahead; callers recover by re-fetching Story state.

use super::AppState;
use aura_core::StoryEvent;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;

pub async fn stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe(&id);
    let events = BroadcastStream::new(rx).filter_map(|item| async move {
        match item {
            Ok(event) => Some(to_sse_event(&event)),
            // A slow subscriber skipped some events; nothing to replay (§4.6).
            Err(_) => None,
        }
    });

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_sse_event(event: &StoryEvent) -> Result<Event, Infallible> {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Ok(Event::default().event(event.event_type()).data(payload))
}
