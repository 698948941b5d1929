//! Identifier newtypes shared across the engine.
//!
//! Wire records carry raw integers; everything above the wire layer uses
//! these newtypes so a timer id cannot be passed where a workflow id is
//! expected. All of them are `repr(transparent)` over the wire integer.

/// Unique id of a submitted event.
///
/// `0` means "not yet assigned" — the kernel stamps a fresh id when the
/// event is drained from a request ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EventId(pub u64);

impl EventId {
    pub const UNASSIGNED: Self = Self(0);

    #[inline]
    pub fn is_unassigned(self) -> bool {
        self.0 == 0
    }
}

/// Id of a registered workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct WorkflowId(pub u64);

/// Id of one activation of a workflow definition.
///
/// Carried in the wire `user_id` field of events the workflow engine
/// builds, so a deck looking at a raw event can still attribute it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct InstanceId(pub u64);

impl InstanceId {
    pub const NONE: Self = Self(0);
}

/// Id of an armed timer. Allocated from 1; 0 is never a valid timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TimerId(pub u64);

impl TimerId {
    pub const NONE: Self = Self(0);

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Id of an attached process channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ProcessId(pub u32);

/// Weak reference to an in-flight routing entry.
///
/// `index` names an arena slot; `generation` must match the slot's current
/// generation or the handle is stale. Wakers (the timer table) hold these
/// instead of pointers, so a retired entry can never be resurrected by a
/// late wakeup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHandle {
    pub index: u32,
    pub generation: u32,
}

impl EntryHandle {
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_unassigned() {
        assert!(EventId::UNASSIGNED.is_unassigned());
        assert!(!EventId(7).is_unassigned());
    }

    #[test]
    fn test_timer_id_none() {
        assert!(TimerId::NONE.is_none());
        assert!(!TimerId(1).is_none());
    }

    #[test]
    fn test_handle_equality() {
        let a = EntryHandle::new(3, 1);
        let b = EntryHandle::new(3, 1);
        let stale = EntryHandle::new(3, 2);
        assert_eq!(a, b);
        assert_ne!(a, stale);
    }
}
