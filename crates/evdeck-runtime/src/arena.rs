//! Routing entry arena — kernel-side bookkeeping for in-flight events.
//!
//! Every drained event becomes one [`RoutingEntry`] in a fixed-capacity
//! arena. Handles are generation-checked: retiring an entry bumps its
//! slot's generation, so a handle that outlives its entry (a late timer
//! wakeup, a stale run-queue pop) is detected instead of touching the
//! slot's next tenant. Freed slots are reused LIFO.
//!
//! # Thread safety
//!
//! One mutex guards the whole arena. Entries are small and accesses are
//! short (dispatch copies the event out before calling a deck), so the
//! lock is never held across deck code.

use std::sync::Mutex;

use evdeck_core::{
    EngineError, EntryHandle, EntryState, Event, InstanceId, ProcessId, Result, ResultPayload,
};

/// Where an entry came from, and therefore where its completion goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrigin {
    /// Submitted by a process; completion becomes a response on its ring.
    Process(ProcessId),
    /// Built by the workflow engine for one node of an instance;
    /// completion is recorded in the instance masks, never on a ring.
    Workflow { instance: InstanceId, node: usize },
}

/// One in-flight event and its routing state.
#[derive(Debug, Clone)]
pub struct RoutingEntry {
    pub event: Event,
    /// Index of the next route hop to dispatch.
    pub cursor: u8,
    pub state: EntryState,
    pub origin: EntryOrigin,
    /// Result carried so far; a later deck's non-empty result replaces it.
    pub result: ResultPayload,
    /// Prefix of the deck that produced `result`.
    pub completed_prefix: u8,
}

impl RoutingEntry {
    pub fn new(event: Event, origin: EntryOrigin) -> Self {
        Self {
            event,
            cursor: 0,
            state: EntryState::Queued,
            origin,
            result: ResultPayload::None,
            completed_prefix: 0,
        }
    }
}

struct Slot {
    generation: u32,
    entry: Option<RoutingEntry>,
}

struct ArenaInner {
    slots: Vec<Slot>,
    /// LIFO stack of free slot indices, for cache-friendly reuse.
    free: Vec<u32>,
    live: usize,
}

/// Fixed-capacity arena of routing entries.
pub struct EntryArena {
    inner: Mutex<ArenaInner>,
    capacity: usize,
}

impl EntryArena {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        let mut free = Vec::with_capacity(capacity);
        for i in 0..capacity {
            slots.push(Slot { generation: 0, entry: None });
            // Hand out low indices first.
            free.push((capacity - 1 - i) as u32);
        }
        Self {
            inner: Mutex::new(ArenaInner { slots, free, live: 0 }),
            capacity,
        }
    }

    /// Claim a slot for `entry`. Fails with
    /// [`EngineError::EntriesExhausted`] when every slot is live.
    pub fn insert(&self, entry: RoutingEntry) -> Result<EntryHandle> {
        let mut inner = self.inner.lock().unwrap();
        let index = match inner.free.pop() {
            Some(i) => i,
            None => return Err(EngineError::EntriesExhausted),
        };
        let slot = &mut inner.slots[index as usize];
        slot.entry = Some(entry);
        let handle = EntryHandle::new(index, slot.generation);
        inner.live += 1;
        Ok(handle)
    }

    /// Run `f` against the live entry behind `handle`.
    pub fn with_mut<R>(
        &self,
        handle: EntryHandle,
        f: impl FnOnce(&mut RoutingEntry) -> R,
    ) -> Result<R> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .slots
            .get_mut(handle.index as usize)
            .ok_or(EngineError::StaleHandle)?;
        if slot.generation != handle.generation {
            return Err(EngineError::StaleHandle);
        }
        match slot.entry.as_mut() {
            Some(entry) => Ok(f(entry)),
            None => Err(EngineError::StaleHandle),
        }
    }

    /// The entry's current state, without touching anything else.
    pub fn state(&self, handle: EntryHandle) -> Result<EntryState> {
        self.with_mut(handle, |entry| entry.state)
    }

    /// Retire the entry and free its slot. The handle (and any copy of
    /// it) is stale from here on.
    pub fn take(&self, handle: EntryHandle) -> Result<RoutingEntry> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .slots
            .get_mut(handle.index as usize)
            .ok_or(EngineError::StaleHandle)?;
        if slot.generation != handle.generation {
            return Err(EngineError::StaleHandle);
        }
        let entry = slot.entry.take().ok_or(EngineError::StaleHandle)?;
        slot.generation = slot.generation.wrapping_add(1);
        inner.free.push(handle.index);
        inner.live -= 1;
        Ok(entry)
    }

    /// Retire every live entry matching `pred` (process detach). Returns
    /// how many were dropped.
    pub fn retire_matching(&self, pred: impl Fn(&RoutingEntry) -> bool) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let mut dropped = 0;
        for i in 0..inner.slots.len() {
            let matched = match inner.slots[i].entry.as_ref() {
                Some(entry) => pred(entry),
                None => false,
            };
            if matched {
                let slot = &mut inner.slots[i];
                slot.entry = None;
                slot.generation = slot.generation.wrapping_add(1);
                inner.free.push(i as u32);
                inner.live -= 1;
                dropped += 1;
            }
        }
        dropped
    }

    #[inline]
    pub fn live(&self) -> usize {
        self.inner.lock().unwrap().live
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
