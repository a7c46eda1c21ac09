//! Server-Sent Events stream of batch events.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use scan::events::BatchEvent;
use tracing::{debug, warn};

use crate::state::AppState;

/// SSE endpoint handler.
///
/// The event name is the batch event kind; the data is its JSON payload.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.hub.subscribe();
    debug!(observers = state.hub.observer_count(), "SSE client connected");

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        while let Some(event) = rx.recv().await {
            if let Some(sse) = to_sse(&event) {
                yield Ok(sse);
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn to_sse(event: &BatchEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event.kind()).data(json)),
        Err(err) => {
            warn!(kind = event.kind(), error = %err, "failed to serialize event");
            None
        }
    }
}
