//! Timer table for the hardware deck.
//!
//! Fixed capacity of [`MAX_TIMERS`] live timers. Ids are monotonic from 1
//! and never reused. Cancellation is lazy: the live map forgets the timer
//! immediately, the heap entry is skipped when it surfaces.
//!
//! A timer may be linked to one suspended routing entry (the sleep path);
//! firing surrenders the handle so the sweep can wake the entry. Timers
//! created standalone have no linkage and firing is only visible in the
//! stats.
//!
//! # Complexity
//!
//! - Create: O(log n)
//! - Cancel: O(1) amortized (lazy cancellation)
//! - Check expired: O(k log n) where k = number of expired timers

use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use evdeck_core::{EngineError, EntryHandle, Result, TimerId};

/// Most timers live at once.
pub const MAX_TIMERS: usize = 64;

/// Heap key: earliest deadline first, id as tie-break.
struct Deadline {
    at_ms: u64,
    id: u64,
}

impl PartialEq for Deadline {
    fn eq(&self, other: &Self) -> bool {
        self.at_ms == other.at_ms && self.id == other.id
    }
}

impl Eq for Deadline {}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        match other.at_ms.cmp(&self.at_ms) {
            std::cmp::Ordering::Equal => other.id.cmp(&self.id),
            ord => ord,
        }
    }
}

struct TimerRecord {
    deadline_ms: u64,
    /// 0 = one-shot; otherwise re-armed by this much on every fire.
    interval_ms: u64,
    entry: Option<EntryHandle>,
}

struct TableInner {
    live: HashMap<u64, TimerRecord>,
    heap: BinaryHeap<Deadline>,
    created: u64,
    fired: u64,
    cancelled: u64,
    rearmed: u64,
}

/// One expired timer, surrendered by [`TimerTable::check_expired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fired {
    pub id: TimerId,
    /// The suspended entry this timer was armed for, if any.
    pub entry: Option<EntryHandle>,
}

/// Statistics snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerStats {
    pub active: usize,
    pub created: u64,
    pub fired: u64,
    pub cancelled: u64,
    pub rearmed: u64,
}

/// Fixed-capacity table of armed timers.
///
/// Thread-safe via internal Mutex. The lock is held briefly during
/// create/cancel/check operations.
pub struct TimerTable {
    inner: Mutex<TableInner>,
    next_id: AtomicU64,
}

impl TimerTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TableInner {
                live: HashMap::with_capacity(MAX_TIMERS),
                heap: BinaryHeap::with_capacity(MAX_TIMERS),
                created: 0,
                fired: 0,
                cancelled: 0,
                rearmed: 0,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Arm a timer `delay_ms` from `now_ms`. `interval_ms > 0` makes it
    /// periodic. Fails with [`EngineError::TimersExhausted`] when
    /// [`MAX_TIMERS`] timers are already live.
    pub fn create(
        &self,
        now_ms: u64,
        delay_ms: u64,
        interval_ms: u64,
        entry: Option<EntryHandle>,
    ) -> Result<TimerId> {
        let mut inner = self.inner.lock().unwrap();
        if inner.live.len() >= MAX_TIMERS {
            return Err(EngineError::TimersExhausted);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline_ms = now_ms + delay_ms;
        inner.live.insert(id, TimerRecord { deadline_ms, interval_ms, entry });
        inner.heap.push(Deadline { at_ms: deadline_ms, id });
        inner.created += 1;
        Ok(TimerId(id))
    }

    /// Disarm a timer. Returns whether it was live. Never wakes anything:
    /// a cancelled sleep stays suspended until some other waker clears it.
    pub fn cancel(&self, id: TimerId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.live.remove(&id.0).is_some() {
            inner.cancelled += 1;
            true
        } else {
            false
        }
    }

    /// Surrender every timer whose deadline is at or before `now_ms`, in
    /// deadline order. One-shot timers are retired; periodic timers are
    /// re-armed at `deadline + interval`.
    pub fn check_expired(&self, now_ms: u64) -> Vec<Fired> {
        let mut inner = self.inner.lock().unwrap();
        let mut fired = Vec::new();

        while let Some(next) = inner.heap.peek() {
            if next.at_ms > now_ms {
                break;
            }
            let Deadline { at_ms, id } = match inner.heap.pop() {
                Some(d) => d,
                None => break,
            };

            let record = match inner.live.get_mut(&id) {
                Some(r) => r,
                // Cancelled (or re-armed past this key); lazy skip.
                None => continue,
            };
            if record.deadline_ms != at_ms {
                continue;
            }

            let entry = record.entry;
            if record.interval_ms > 0 {
                record.deadline_ms = at_ms + record.interval_ms;
                let rearm = Deadline { at_ms: record.deadline_ms, id };
                inner.heap.push(rearm);
                inner.rearmed += 1;
            } else {
                inner.live.remove(&id);
            }
            inner.fired += 1;
            fired.push(Fired { id: TimerId(id), entry });
        }

        fired
    }

    /// Deadline of the soonest live timer, if any.
    pub fn next_deadline(&self) -> Option<u64> {
        let inner = self.inner.lock().unwrap();
        inner.live.values().map(|r| r.deadline_ms).min()
    }

    #[inline]
    pub fn active(&self) -> usize {
        self.inner.lock().unwrap().live.len()
    }

    pub fn stats(&self) -> TimerStats {
        let inner = self.inner.lock().unwrap();
        TimerStats {
            active: inner.live.len(),
            created: inner.created,
            fired: inner.fired,
            cancelled: inner.cancelled,
            rearmed: inner.rearmed,
        }
    }
}

impl Default for TimerTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic_from_one() {
        let table = TimerTable::new();
        let a = table.create(0, 10, 0, None).unwrap();
        let b = table.create(0, 10, 0, None).unwrap();
        assert_eq!(a, TimerId(1));
        assert_eq!(b, TimerId(2));
    }

    #[test]
    fn test_one_shot_fires_once() {
        let table = TimerTable::new();
        let id = table.create(100, 50, 0, None).unwrap();

        assert!(table.check_expired(149).is_empty());
        let fired = table.check_expired(150);
        assert_eq!(fired, vec![Fired { id, entry: None }]);
        assert_eq!(table.active(), 0);

        // Retired; never fires again.
        assert!(table.check_expired(10_000).is_empty());
    }

    #[test]
    fn test_periodic_rearms() {
        let table = TimerTable::new();
        let id = table.create(0, 10, 10, None).unwrap();

        assert_eq!(table.check_expired(10).len(), 1);
        assert_eq!(table.active(), 1);
        assert_eq!(table.check_expired(19).len(), 0);
        assert_eq!(table.check_expired(20).len(), 1);

        // A late check catches up one period at a time per deadline.
        let fired = table.check_expired(55);
        assert!(fired.iter().all(|f| f.id == id));
        assert_eq!(table.stats().rearmed, 2 + fired.len() as u64);
    }

    #[test]
    fn test_cancel_is_lazy_but_final() {
        let table = TimerTable::new();
        let id = table.create(0, 10, 0, None).unwrap();

        assert!(table.cancel(id));
        assert!(!table.cancel(id));
        assert!(!table.cancel(TimerId(999)));

        assert!(table.check_expired(1_000).is_empty());
        assert_eq!(table.stats().cancelled, 1);
        assert_eq!(table.stats().fired, 0);
    }

    #[test]
    fn test_capacity_limit() {
        let table = TimerTable::new();
        let mut last = TimerId::NONE;
        for _ in 0..MAX_TIMERS {
            last = table.create(0, 1_000, 0, None).unwrap();
        }
        assert!(matches!(
            table.create(0, 1_000, 0, None),
            Err(EngineError::TimersExhausted)
        ));

        // Cancelling frees a slot immediately.
        assert!(table.cancel(last));
        assert!(table.create(0, 1_000, 0, None).is_ok());
    }

    #[test]
    fn test_linked_entry_surrendered() {
        let table = TimerTable::new();
        let handle = EntryHandle::new(7, 3);
        let id = table.create(0, 25, 0, Some(handle)).unwrap();

        let fired = table.check_expired(30);
        assert_eq!(fired, vec![Fired { id, entry: Some(handle) }]);
    }

    #[test]
    fn test_expiry_order_is_deadline_order() {
        let table = TimerTable::new();
        let late = table.create(0, 30, 0, None).unwrap();
        let early = table.create(0, 10, 0, None).unwrap();
        let mid = table.create(0, 20, 0, None).unwrap();

        let fired: Vec<TimerId> = table.check_expired(100).iter().map(|f| f.id).collect();
        assert_eq!(fired, vec![early, mid, late]);
    }

    #[test]
    fn test_next_deadline() {
        let table = TimerTable::new();
        assert_eq!(table.next_deadline(), None);
        table.create(100, 50, 0, None).unwrap();
        table.create(100, 20, 0, None).unwrap();
        assert_eq!(table.next_deadline(), Some(120));
    }
}
