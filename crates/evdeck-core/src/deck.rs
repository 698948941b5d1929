//! Deck dispatch abstraction.
//!
//! A `Deck` is a capability module keyed by a one-byte route prefix. The
//! kernel walks each routing entry's route and hands it to the deck named
//! by the current hop; the deck answers with exactly one [`Outcome`].
//!
//! # Implementors
//!
//! - `ExecutionDeck` (prefix 0): terminal. Finishes the route, reporting
//!   whatever result earlier hops carried in.
//!
//! - `HardwareDeck` (prefix 3): devices, timers, console. The only stock
//!   deck that suspends (TIMER_SLEEP) and the only one with a sweep.
//!
//! - [`FnDeck`]: wraps a closure; the workhorse of unit tests and of
//!   embedders that need a one-off deck without a named type.

use crate::error::ErrorCode;
use crate::event::{Event, ResultKind};
use crate::id::EntryHandle;

/// A result payload produced by a deck, with its ownership explicit.
///
/// Mirrors the wire-level [`ResultKind`] tag but keeps the payload typed
/// while it travels inside the engine; it is lowered to `(u64, u64, u8)`
/// only when a response is written to a ring.
#[derive(Debug, Clone, Default)]
pub enum ResultPayload {
    /// No payload.
    #[default]
    None,
    /// A small inline scalar.
    Value(u64),
    /// Engine-owned bytes, valid as long as the engine lives.
    Static(&'static [u8]),
    /// A heap block; ownership moves with the payload.
    Transferred(Box<[u8]>),
}

impl ResultPayload {
    /// The wire tag this payload lowers to.
    #[inline]
    pub fn kind(&self) -> ResultKind {
        match self {
            ResultPayload::None => ResultKind::None,
            ResultPayload::Value(_) => ResultKind::Value,
            ResultPayload::Static(_) => ResultKind::Static,
            ResultPayload::Transferred(_) => ResultKind::Transferred,
        }
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, ResultPayload::None)
    }
}

/// What a deck did with one routing entry.
#[derive(Debug)]
pub enum Outcome {
    /// Done at this hop; advance the route cursor. A non-`None` payload
    /// replaces the result the entry carries forward.
    Complete(ResultPayload),
    /// Done with the whole route, regardless of remaining hops.
    Terminal(ResultPayload),
    /// Reject the entry. Terminal at any hop; no retry in this layer.
    Error {
        code: ErrorCode,
        message: &'static str,
    },
    /// The deck parked the entry and owns waking it (see [`Deck::sweep`]).
    Suspended,
}

impl Outcome {
    /// Shorthand for an error outcome.
    #[inline]
    pub fn error(code: ErrorCode, message: &'static str) -> Self {
        Outcome::Error { code, message }
    }
}

/// A suspended entry whose wakeup condition has fired.
///
/// Produced by [`Deck::sweep`]; the kernel routes `outcome` through the
/// same completion path a synchronous return would have taken.
#[derive(Debug)]
pub struct Wakeup {
    pub handle: EntryHandle,
    pub outcome: Outcome,
}

/// One capability module in the routing pipeline.
///
/// **Contract:**
/// - Validate the event `type` is inside the deck's owned range before
///   touching the payload; out-of-range types are an `InvalidParameter`
///   error outcome, never a panic.
/// - Validate payload bounds before reading; a size field larger than the
///   payload region (or zero where one is required) is rejected unread.
/// - Return exactly one outcome per `process` call. Never complete the
///   same entry twice, never touch an entry after completing it.
/// - `process` runs inline in the dispatch loop. A deck waiting on an
///   engine-visible condition (time, another entry's completion) must
///   return [`Outcome::Suspended`] rather than spin, record the handle
///   in its own bookkeeping, and later surrender the wakeup from `sweep`.
pub trait Deck: Send + Sync {
    /// The route prefix this deck answers to. Unique per kernel.
    fn prefix(&self) -> u8;

    /// Short name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Handle one entry. `handle` is only meaningful to decks that
    /// suspend; synchronous decks can ignore it.
    fn process(&self, event: &Event, handle: EntryHandle) -> Outcome;

    /// Surrender entries whose asynchronous condition has been met.
    ///
    /// Called once per kernel tick with the current engine time. Decks
    /// with no asynchronous conditions keep the default (empty) sweep.
    fn sweep(&self, now_ms: u64) -> Vec<Wakeup> {
        let _ = now_ms;
        Vec::new()
    }
}

/// Adapter: any closure as a deck.
pub struct FnDeck<F> {
    prefix: u8,
    name: &'static str,
    f: F,
}

impl<F> FnDeck<F>
where
    F: Fn(&Event, EntryHandle) -> Outcome + Send + Sync,
{
    pub fn new(prefix: u8, name: &'static str, f: F) -> Self {
        Self { prefix, name, f }
    }
}

impl<F> Deck for FnDeck<F>
where
    F: Fn(&Event, EntryHandle) -> Outcome + Send + Sync,
{
    fn prefix(&self) -> u8 {
        self.prefix
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&self, event: &Event, handle: EntryHandle) -> Outcome {
        (self.f)(event, handle)
    }
}
