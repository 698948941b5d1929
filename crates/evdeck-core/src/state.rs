//! Routing entry lifecycle states.

use core::fmt;

/// State of an in-flight routing entry.
///
/// ```text
///   QUEUED ──▶ PROCESSING ──▶ COMPLETED
///                │   ▲    └──▶ ERROR
///                ▼   │
///              SUSPENDED
/// ```
///
/// `Suspended` has exactly one exit: back to `Processing`, performed by the
/// external waker that parked the entry. Mid-route success stays in
/// `Processing` with the route cursor advanced; only route exhaustion or a
/// terminal completion reaches `Completed`. Errors are terminal at any hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryState {
    /// Drained from a request ring, not yet dispatched
    Queued = 0,

    /// Handed to the deck named by the current route cursor
    Processing = 1,

    /// Route finished, a response has been (or will be) produced
    Completed = 2,

    /// A deck rejected the entry; terminal, no retry in this layer
    Error = 3,

    /// Parked by a deck pending an external wakeup (e.g. timer expiry)
    Suspended = 4,
}

impl EntryState {
    /// Check if this entry can be handed to a deck right now
    #[inline]
    pub const fn is_dispatchable(&self) -> bool {
        matches!(self, EntryState::Queued | EntryState::Processing)
    }

    /// Check if this entry has reached a terminal state
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, EntryState::Completed | EntryState::Error)
    }

    /// Check if this entry is parked waiting for an external wakeup
    #[inline]
    pub const fn is_suspended(&self) -> bool {
        matches!(self, EntryState::Suspended)
    }
}

impl From<u8> for EntryState {
    fn from(v: u8) -> Self {
        match v {
            0 => EntryState::Queued,
            1 => EntryState::Processing,
            2 => EntryState::Completed,
            3 => EntryState::Error,
            4 => EntryState::Suspended,
            _ => EntryState::Error, // Invalid values are treated as failed
        }
    }
}

impl From<EntryState> for u8 {
    fn from(state: EntryState) -> u8 {
        state as u8
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryState::Queued => write!(f, "QUEUED"),
            EntryState::Processing => write!(f, "PROCESSING"),
            EntryState::Completed => write!(f, "COMPLETED"),
            EntryState::Error => write!(f, "ERROR"),
            EntryState::Suspended => write!(f, "SUSPENDED"),
        }
    }
}
