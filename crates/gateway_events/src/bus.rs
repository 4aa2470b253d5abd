use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::{Event, EventEnvelope};

/// Default bus capacity; a few hundred events absorbs any realistic burst.
pub const DEFAULT_CAPACITY: usize = 256;

/// Receiving half of the bus, handed to the SSE adapter.
pub type EventReceiver = mpsc::Receiver<EventEnvelope>;

/// Cloneable publishing half of the event bus.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: mpsc::Sender<EventEnvelope>,
}

/// Create a bus with the given capacity.
pub fn bounded(capacity: usize) -> (EventBus, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventBus { tx }, rx)
}

impl EventBus {
    /// Stamp and enqueue an event without blocking.
    ///
    /// A full bus drops the event; a closed bus (consumer gone) is quietly
    /// ignored so producers keep working after the adapter shuts down.
    pub fn publish(&self, event: Event) {
        let envelope = EventEnvelope::now(event);
        match self.tx.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(envelope)) => {
                warn!(kind = envelope.event.kind(), "event bus full, dropping event");
            }
            Err(TrySendError::Closed(envelope)) => {
                debug!(kind = envelope.event.kind(), "event bus closed, dropping event");
            }
        }
    }
}
