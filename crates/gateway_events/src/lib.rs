#![forbid(unsafe_code)]
//! Typed lifecycle events and the bounded event bus for the MCP gateway.
//!
//! The manager and its sessions publish [`Event`] values describing every
//! significant state change (server lifecycle, capability discovery, tool
//! dispatch, stderr chatter). Events are stamped into an [`EventEnvelope`]
//! at publish time and carried over a bounded channel; the SSE adapter is
//! the sole consumer and owns fan-out to its subscribers.
//!
//! Publishing never blocks: when the bus is full the event is dropped and a
//! diagnostic is logged.

mod bus;
mod event;

pub use bus::{bounded, EventBus, EventReceiver, DEFAULT_CAPACITY};
pub use event::{Event, EventEnvelope};
