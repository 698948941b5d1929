//! # evdeck - Event-Deck Kernel
//!
//! A single-call, event-driven micro-kernel core for Rust programs.
//!
//! Processes talk to the engine through exactly one operation, `notify`,
//! over a pair of shared-memory rings. Submitted events carry a route —
//! up to eight deck prefixes — and the kernel walks each event through
//! its route, one deck at a time, until a deck ends it.
//!
//! ## Features
//!
//! - **One syscall**: SUBMIT, WAIT, POLL, YIELD, EXIT as flag bits on a
//!   single `notify` call
//! - **Ring transport**: fixed 264-byte events over lock-free SPSC
//!   rings, one mapped segment per process
//! - **Deck routing**: pluggable handlers keyed by route prefix;
//!   complete, finish, fail, or suspend per hop
//! - **Suspension**: entries park without a thread; deck sweeps wake
//!   them by handle, stale wakeups are dropped
//! - **Workflows**: dependency-graph templates (up to 64 nodes) with
//!   monotonic progress masks
//! - **Stock decks**: execution terminal plus hardware services
//!   (timers, console) with a swappable console backend
//!
//! ## Quick Start
//!
//! ```ignore
//! use evdeck::{Kernel, ProcessId, Session};
//!
//! fn main() -> evdeck::Result<()> {
//!     let kernel = Kernel::builder().build()?;
//!     let session = Session::attach(&kernel, ProcessId(1))?;
//!
//!     session.print("hello from the deck\n")?;
//!     session.sleep_ms(50)?;
//!     let ticks = session.get_ticks()?;
//!     session.print(&format!("awake at {} ms\n", ticks))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Process                              │
//! │            Session / raw events over the rings              │
//! └─────────────────────────────────────────────────────────────┘
//!                    │ notify(pid, target, flags)
//!                    ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Kernel                               │
//! │      drain ring → routing entries → dispatch loop           │
//! └─────────────────────────────────────────────────────────────┘
//!          │                  │                  │
//!          ▼                  ▼                  ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │ Execution │      │ Hardware  │      │ Embedder  │
//!    │  deck (0) │      │  deck (3) │      │   decks   │
//!    └───────────┘      └───────────┘      └───────────┘
//!                             │
//!                             ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │        Timer table (sweep) · Console backend            │
//!    └─────────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use evdeck_core::{
    event_type, flags, prefix, vga, Deck, EngineError, EntryHandle, EntryState, ErrorCode, Event,
    EventId, FnDeck, InstanceId, Outcome, ProcessId, Response, Result, ResultKind, ResultPayload,
    TimerId, Wakeup, WorkflowId, DEFAULT_USER, EVENT_DATA_SIZE, MAX_ROUTE_HOPS,
};

// Re-export request decode/encode helpers
pub use evdeck_core::requests;

// Re-export kprint macros for engine logging
pub use evdeck_core::kprint::{
    init as init_logging, set_flush_enabled, set_log_level, set_time_enabled, LogLevel,
};
pub use evdeck_core::{kdebug, kerror, kinfo, kprint, kprintln, ktrace, kwarn};

// Re-export env utilities
pub use evdeck_core::env::{env_get, env_get_bool};

// Re-export runtime types
pub use evdeck_runtime::{
    ConsoleBackend, HardwareDeck, InstanceStatus, Kernel, KernelBuilder, KernelConfig,
    KernelStats, NodeTemplate, StdConsole, UserEndpoint, WorkflowDefinition, MAX_WORKFLOW_NODES,
};

mod session;

pub use session::Session;
