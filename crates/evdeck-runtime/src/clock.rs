//! Engine time sources.
//!
//! Two clocks with different jobs: [`now_ms`] is the monotonic
//! millisecond clock all timer deadlines and event timestamps use, and
//! [`timestamp`] is the raw tick counter surfaced by `TIMER_GETTICKS`.
//! Sweep code never calls [`now_ms`] directly in tests; the kernel's
//! `tick_at` takes the time as a parameter so expiry is deterministic.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds since the engine's first clock use.
#[inline]
pub fn now_ms() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// Raw tick counter: TSC on x86_64, nanoseconds elsewhere.
///
/// Values are only comparable to other values from the same run; the unit
/// is unspecified.
pub fn timestamp() -> u64 {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "x86_64")] {
            // Unserialized rdtsc is fine: callers want a cheap, coarse
            // monotonic-ish stamp, not an ordering fence.
            unsafe { core::arch::x86_64::_rdtsc() }
        } else {
            EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
        }
    }
}
