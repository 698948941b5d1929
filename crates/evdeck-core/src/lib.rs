//! # evdeck-core
//!
//! Contracts for the evdeck event engine: the wire records that cross the
//! transport rings, the routing entry state machine's vocabulary, the deck
//! dispatch trait, and the error taxonomy. This crate is machinery-free;
//! everything that allocates rings, runs decks, or keeps tables lives in
//! `evdeck-runtime`.
//!
//! ## Modules
//!
//! - `id` - identifier newtypes and the generational entry handle
//! - `event` - Event/Response wire records, type namespace, notify flags
//! - `state` - routing entry lifecycle states
//! - `error` - wire error codes and the host-side error enum
//! - `deck` - the deck dispatch contract and outcomes
//! - `requests` - typed decode/encode of hardware-deck payloads
//! - `kprint` - kernel-style leveled logging macros
//! - `env` - environment variable parsing helpers

pub mod deck;
pub mod env;
pub mod error;
pub mod event;
pub mod id;
pub mod kprint;
pub mod requests;
pub mod state;

// Re-exports for convenience
pub use deck::{Deck, FnDeck, Outcome, ResultPayload, Wakeup};
pub use error::{EngineError, ErrorCode, Result};
pub use event::{
    event_type, flags, prefix, Event, Response, ResultKind, DEFAULT_USER, EVENT_DATA_SIZE,
    MAX_ROUTE_HOPS,
};
pub use id::{EntryHandle, EventId, InstanceId, ProcessId, TimerId, WorkflowId};
pub use kprint::LogLevel;
pub use requests::{vga, DecodeError, HardwareRequest};
pub use state::EntryState;
