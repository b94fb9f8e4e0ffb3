use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{
    dto::sse::{Handshake, ServerEvent},
    state::{SharedState, SyncEvent},
};

/// Subscribe to engine events.
pub fn subscribe(state: &SharedState) -> broadcast::Receiver<SyncEvent> {
    state.events().subscribe()
}

/// Handshake sent first on every new stream.
pub fn handshake(state: &SharedState) -> Option<ServerEvent> {
    let payload = Handshake {
        message: "sync event stream connected".to_string(),
        degraded: state.is_degraded(),
        session: state.session().current().into(),
    };
    match ServerEvent::json(Some("handshake".to_string()), &payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(error = %err, "failed to encode SSE handshake");
            None
        }
    }
}

fn to_axum_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

/// Convert a broadcast receiver into an SSE response, forwarding events until the
/// client disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<SyncEvent>,
    greeting: Option<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        if let Some(greeting) = greeting {
            if tx.send(Ok(to_axum_event(greeting))).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(event) => {
                            let payload = match ServerEvent::from_sync_event(&event) {
                                Ok(payload) => payload,
                                Err(err) => {
                                    warn!(error = %err, "failed to encode sync event");
                                    continue;
                                }
                            };
                            if tx.send(Ok(to_axum_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            // Skip lagged messages but keep the stream alive.
                            debug!(skipped, "SSE subscriber lagged");
                            continue;
                        }
                    }
                }
            }
        }

        info!("SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
