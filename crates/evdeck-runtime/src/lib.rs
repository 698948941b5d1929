//! The event-deck engine: shared-memory channels, routing entries,
//! deck dispatch, timers, and the workflow graph.
//!
//! Modules:
//! - `arena` - slab of in-flight routing entries with generation checks
//! - `channel` - per-process request/response ring pair in one mapping
//! - `clock` - engine time base
//! - `config` - tunables, environment overrides, presets
//! - `decks` - stock decks: execution terminal, hardware services
//! - `kernel` - the notify entry point and the dispatch loop
//! - `ring` - lock-free SPSC transport ring
//! - `timer` - deadline min-heap behind the hardware deck
//! - `workflow` - dependency-graph templates and instance masks
//!
//! Most embedders need only [`Kernel::builder`], a [`ProcessId`] to
//! attach, and [`Kernel::notify`].

pub mod arena;
pub mod channel;
pub mod clock;
pub mod config;
pub mod decks;
pub mod kernel;
pub mod ring;
pub mod timer;
pub mod workflow;

pub use arena::{EntryArena, EntryOrigin, RoutingEntry};
pub use channel::{
    channel, leak_transferred, take_transferred, KernelEndpoint, UserEndpoint, WIRE_RING_SLOTS,
};
pub use config::KernelConfig;
pub use decks::{ConsoleBackend, ExecutionDeck, HardwareDeck, StdConsole};
pub use kernel::{Kernel, KernelBuilder, KernelStats};
pub use ring::{RingHeader, TransportRing};
pub use timer::{Fired, TimerStats, TimerTable, MAX_TIMERS};
pub use workflow::{
    InstanceStatus, NodeDispatch, NodeTemplate, WorkflowDefinition, WorkflowEngine,
    MAX_WORKFLOW_NODES,
};

pub use evdeck_core::ProcessId;
