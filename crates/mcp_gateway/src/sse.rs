//! SSE adapter: the sole consumer of the event bus.
//!
//! A broadcaster task drains the bus receiver and fans out to one unbounded
//! queue per connected client, so a slow client never blocks the bus. When
//! the bus is idle for a second the broadcaster synthesizes a `heartbeat`
//! event.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    extract::State,
    response::sse::{Event as SseEvent, Sse},
};
use futures::Stream;
use gateway_events::{Event, EventEnvelope, EventReceiver};
use tokio::{
    sync::{mpsc, Mutex},
    time,
};
use tracing::debug;

use crate::AppState;

const HEARTBEAT_IDLE: Duration = Duration::from_secs(1);

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<EventEnvelope>>>>;

/// Fan-out hub feeding every connected SSE client.
#[derive(Clone, Default)]
pub struct SseHub {
    subscribers: Subscribers,
}

impl SseHub {
    /// Register a new client queue.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<EventEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(tx);
        rx
    }

    async fn broadcast(&self, envelope: EventEnvelope) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| tx.send(envelope.clone()).is_ok());
    }
}

/// Start the broadcaster task and hand back its hub.
pub(crate) fn spawn_broadcaster(mut events: EventReceiver) -> SseHub {
    let hub = SseHub::default();
    let fanout = hub.clone();
    tokio::spawn(async move {
        loop {
            match time::timeout(HEARTBEAT_IDLE, events.recv()).await {
                Ok(Some(envelope)) => fanout.broadcast(envelope).await,
                Ok(None) => break,
                Err(_) => {
                    fanout
                        .broadcast(EventEnvelope::now(Event::Heartbeat {}))
                        .await;
                }
            }
        }
        debug!("event bus closed, SSE broadcaster exiting");
    });
    hub
}

/// `GET /events` — stream bus events as `data: <json>` records.
pub(crate) async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut rx = state.sse.subscribe().await;
    let stream = async_stream::stream! {
        while let Some(envelope) = rx.recv().await {
            match serde_json::to_string(&envelope) {
                Ok(data) => yield Ok(SseEvent::default().data(data)),
                Err(err) => {
                    debug!(%err, "skipping unserializable event");
                }
            }
        }
    };
    Sse::new(stream)
}
