//! `TransportRing` — fixed-capacity SPSC ring over shared memory.
//!
//! One ring carries one direction of one process channel: the request
//! ring (process produces, kernel consumes) and the response ring (kernel
//! produces, process consumes) are two instances of this type over the
//! same mapped segment. Capacity is a power of two fixed at construction;
//! overflow is a caller-visible `false` from `try_push`, never an
//! overwrite.
//!
//! # Memory layout
//!
//! The ring does not own its memory; `channel` maps a segment and hands
//! this type raw pointers:
//!
//! ```text
//! RingHeader { head (own cache line), tail (own cache line) }
//! T slots[capacity]
//! ```
//!
//! head and tail are u64 and monotonically increasing. Actual index =
//! counter & mask. Empty when head == tail; full when tail - head ==
//! capacity.
//!
//! # Atomics
//!
//! This is the entire cross-privilege safety argument, so it is explicit:
//!
//! - **Producer:** reads `head` with Acquire (observes the consumer's
//!   slot releases before reusing a slot), writes the slot, then
//!   publishes `tail` with Release (the slot write is visible before the
//!   new tail is).
//! - **Consumer:** reads `tail` with Acquire (observes the producer's
//!   slot write before reading the slot), reads the slot, then publishes
//!   `head` with Release (the slot read happens before the producer sees
//!   the slot as free).
//!
//! Only the producer ever stores `tail`; only the consumer ever stores
//! `head`. No slot is written by both sides. Slot access is volatile
//! because the memory is shared with another privilege context.

use core::marker::PhantomData;
use core::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use evdeck_core::{EngineError, Result};

/// One ring counter on its own cache line.
#[repr(C, align(64))]
pub struct RingCounter {
    pub value: AtomicU64,
}

/// The two counters at the head of every ring region.
#[repr(C)]
pub struct RingHeader {
    /// Next slot to consume. Consumer writes, producer reads.
    pub head: RingCounter,
    /// Next slot to produce. Producer writes, consumer reads.
    pub tail: RingCounter,
}

impl RingHeader {
    /// Zero both counters in a freshly mapped header.
    ///
    /// # Safety
    ///
    /// `header` must point at writable memory large enough for a
    /// `RingHeader`, with no ring endpoint using it yet.
    pub unsafe fn init(header: *mut RingHeader) {
        (*header).head.value.store(0, Ordering::Relaxed);
        (*header).tail.value.store(0, Ordering::Relaxed);
    }
}

/// An SPSC ring endpoint over externally owned memory.
///
/// Both sides of a channel construct a `TransportRing` over the same
/// header and slot pointers; the type itself does not know (or care)
/// which side it is. The SPSC discipline is the caller's obligation: at
/// most one context calls `try_push` and at most one calls `try_pop`.
pub struct TransportRing<T> {
    header: *const RingHeader,
    slots: *mut T,
    mask: u64,
    capacity: usize,
    _marker: PhantomData<T>,
}

// Safety: slot access is synchronized by the head/tail publication
// protocol above; the counters are atomics in shared memory.
unsafe impl<T: Copy + Send> Send for TransportRing<T> {}
unsafe impl<T: Copy + Send> Sync for TransportRing<T> {}

impl<T: Copy> TransportRing<T> {
    /// Wrap a header + slot array living in a mapped segment.
    ///
    /// # Safety
    ///
    /// - `header` must point at an initialized [`RingHeader`].
    /// - `slots` must point at `capacity` writable slots of `T`.
    /// - Both must outlive the ring (the channel segment guarantees
    ///   this by keeping the mapping alive while any endpoint exists).
    pub unsafe fn from_raw(
        header: *const RingHeader,
        slots: *mut T,
        capacity: usize,
    ) -> Result<Self> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(EngineError::InvalidCapacity(capacity));
        }
        if header.is_null() || slots.is_null() {
            return Err(EngineError::InvalidCapacity(0));
        }
        Ok(Self {
            header,
            slots,
            mask: capacity as u64 - 1,
            capacity,
            _marker: PhantomData,
        })
    }

    /// Producer side: publish one item.
    ///
    /// Returns `false` iff the ring is full. Never blocks, never
    /// overwrites an unconsumed slot; a full ring is the submitter's
    /// backpressure signal.
    pub fn try_push(&self, item: &T) -> bool {
        // 1. Own counter — no one else stores tail.
        let tail = self.tail().load(Ordering::Relaxed);

        // 2. Acquire head: the consumer's Release store is what frees
        //    slots for reuse.
        let head = self.head().load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= self.capacity as u64 {
            return false;
        }

        // 3. Write the slot, then publish it by advancing tail.
        unsafe {
            let slot = self.slots.add((tail & self.mask) as usize);
            ptr::write_volatile(slot, *item);
        }
        self.tail().store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Consumer side: take the oldest unconsumed item.
    pub fn try_pop(&self) -> Option<T> {
        let head = self.head().load(Ordering::Relaxed);
        let tail = self.tail().load(Ordering::Acquire);
        if head == tail {
            return None;
        }

        let item = unsafe { ptr::read_volatile(self.slots.add((head & self.mask) as usize)) };

        // Publish the slot as free only after the read above.
        self.head().store(head.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    /// Visit every published, unconsumed slot without consuming.
    ///
    /// Meaningful on the producer side only (the kernel peeking its own
    /// published responses for WAIT, or reclaiming them at teardown);
    /// the slots visited are ones this side wrote, so no data race with
    /// the consumer, which only ever advances `head` past them.
    pub fn for_each_unconsumed(&self, mut f: impl FnMut(&T)) {
        let head = self.head().load(Ordering::Acquire);
        let tail = self.tail().load(Ordering::Relaxed);
        let mut pos = head;
        while pos != tail {
            let item = unsafe { ptr::read_volatile(self.slots.add((pos & self.mask) as usize)) };
            f(&item);
            pos = pos.wrapping_add(1);
        }
    }

    /// Number of published, unconsumed items.
    pub fn len(&self) -> usize {
        let head = self.head().load(Ordering::Relaxed);
        let tail = self.tail().load(Ordering::Acquire);
        tail.wrapping_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // ── Internal helpers ──

    #[inline(always)]
    fn head(&self) -> &AtomicU64 {
        unsafe { &(*self.header).head.value }
    }

    #[inline(always)]
    fn tail(&self) -> &AtomicU64 {
        unsafe { &(*self.header).tail.value }
    }
}
