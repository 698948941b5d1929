//! Process channels — the shared segment carrying both wire rings.
//!
//! Each attached process gets one mapped segment holding its request ring
//! (process produces Events, kernel consumes) and its response ring
//! (kernel produces Responses, process consumes). The two rings are
//! unidirectional, so no slot is ever written by both sides; see
//! [`crate::ring`] for the publication protocol.
//!
//! # Memory layout
//!
//! ```text
//! 0x0000: RingHeader      request ring counters
//! 0x0080: Event[cap]      request slots
//!  (64-aligned)
//!         RingHeader      response ring counters
//!         Response[cap]   response slots
//! ```
//!
//! The segment is `mmap(MAP_SHARED | MAP_ANONYMOUS)` and page-rounded.
//! Both endpoints hold an `Arc` to it; whichever endpoint drops last
//! reclaims unconsumed transferred result buffers and unmaps.
//!
//! # SPSC discipline
//!
//! Exactly one context may use each endpoint: the kernel serializes its
//! endpoints under the channel table lock, and a process must not share
//! its [`UserEndpoint`] across threads without its own serialization.

use std::sync::Arc;

use evdeck_core::{kdebug, EngineError, Event, Response, Result, ResultKind};

use crate::ring::{RingHeader, TransportRing};

/// Default slot count for both wire rings.
pub const WIRE_RING_SLOTS: usize = 256;

/// Byte offsets inside a channel segment.
pub mod layout {
    use core::mem::size_of;

    use evdeck_core::{Event, Response};

    use crate::ring::RingHeader;

    const fn align64(n: usize) -> usize {
        (n + 63) & !63
    }

    pub const fn request_header() -> usize {
        0
    }

    pub const fn request_slots() -> usize {
        size_of::<RingHeader>()
    }

    pub const fn response_header(capacity: usize) -> usize {
        align64(request_slots() + capacity * size_of::<Event>())
    }

    pub const fn response_slots(capacity: usize) -> usize {
        response_header(capacity) + size_of::<RingHeader>()
    }

    /// Total mapping length, page-rounded.
    pub const fn segment_len(capacity: usize) -> usize {
        let end = response_slots(capacity) + capacity * size_of::<Response>();
        (end + 4095) / 4096 * 4096
    }
}

/// The mapped memory behind one process channel.
///
/// Owned jointly by the two endpoints through `Arc`; dropping the last
/// endpoint runs the reclaim + munmap.
pub struct ChannelSegment {
    base: *mut u8,
    mmap_len: usize,
    capacity: usize,
}

// Safety: the segment itself is just the mapping; all slot access goes
// through TransportRing's protocol.
unsafe impl Send for ChannelSegment {}
unsafe impl Sync for ChannelSegment {}

impl ChannelSegment {
    fn alloc(capacity: usize) -> Result<Arc<Self>> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(EngineError::InvalidCapacity(capacity));
        }
        let mmap_len = layout::segment_len(capacity);

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mmap_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            return Err(EngineError::MmapFailed(errno));
        }
        let base = base as *mut u8;

        unsafe {
            RingHeader::init(base.add(layout::request_header()) as *mut RingHeader);
            RingHeader::init(base.add(layout::response_header(capacity)) as *mut RingHeader);
        }

        Ok(Arc::new(Self { base, mmap_len, capacity }))
    }

    fn request_ring(&self) -> Result<TransportRing<Event>> {
        unsafe {
            TransportRing::from_raw(
                self.base.add(layout::request_header()) as *const RingHeader,
                self.base.add(layout::request_slots()) as *mut Event,
                self.capacity,
            )
        }
    }

    fn response_ring(&self) -> Result<TransportRing<Response>> {
        unsafe {
            TransportRing::from_raw(
                self.base.add(layout::response_header(self.capacity)) as *const RingHeader,
                self.base.add(layout::response_slots(self.capacity)) as *mut Response,
                self.capacity,
            )
        }
    }
}

impl Drop for ChannelSegment {
    fn drop(&mut self) {
        // No endpoint remains, so nothing can pop these responses;
        // transferred buffers in them would otherwise leak.
        if let Ok(responses) = self.response_ring() {
            let mut reclaimed = 0usize;
            responses.for_each_unconsumed(|resp| {
                if unsafe { take_transferred(resp) }.is_some() {
                    reclaimed += 1;
                }
            });
            if reclaimed > 0 {
                kdebug!("channel teardown reclaimed {} transferred buffers", reclaimed);
            }
        }
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.mmap_len);
        }
    }
}

/// Create one process channel; returns the process side and the kernel
/// side.
pub fn channel(capacity: usize) -> Result<(UserEndpoint, KernelEndpoint)> {
    let segment = ChannelSegment::alloc(capacity)?;
    let user = UserEndpoint {
        requests: segment.request_ring()?,
        responses: segment.response_ring()?,
        _segment: Arc::clone(&segment),
    };
    let kernel = KernelEndpoint {
        requests: segment.request_ring()?,
        responses: segment.response_ring()?,
        _segment: segment,
    };
    Ok((user, kernel))
}

/// The submitting process's side: produce requests, consume responses.
pub struct UserEndpoint {
    requests: TransportRing<Event>,
    responses: TransportRing<Response>,
    _segment: Arc<ChannelSegment>,
}

impl UserEndpoint {
    /// Publish one event. `false` means the ring is full; back off and
    /// retry, nothing was written.
    pub fn push_request(&self, event: &Event) -> bool {
        self.requests.try_push(event)
    }

    /// Take the oldest unconsumed response, if any.
    pub fn pop_response(&self) -> Option<Response> {
        self.responses.try_pop()
    }

    pub fn pending_responses(&self) -> usize {
        self.responses.len()
    }
}

/// The kernel's side: consume requests, produce responses.
pub struct KernelEndpoint {
    requests: TransportRing<Event>,
    responses: TransportRing<Response>,
    _segment: Arc<ChannelSegment>,
}

impl KernelEndpoint {
    /// Take the oldest undrained request, if any.
    pub fn pop_request(&self) -> Option<Event> {
        self.requests.try_pop()
    }

    /// Publish one response. `false` means the process has stopped
    /// consuming and the ring is full.
    pub fn push_response(&self, response: &Response) -> bool {
        self.responses.try_push(response)
    }

    /// Count published responses the process has not consumed yet that
    /// match `target` (a `workflow_id`; 0 matches anything). This is the
    /// WAIT/POLL peek: the slots scanned are ones this side wrote.
    pub fn matching_responses(&self, target: u64) -> usize {
        let mut n = 0;
        self.responses.for_each_unconsumed(|resp| {
            if target == 0 || resp.workflow_id == target {
                n += 1;
            }
        });
        n
    }
}

/// Take ownership of a transferred result buffer.
///
/// # Safety
///
/// `resp.result` must be a live transferred allocation produced by
/// [`leak_transferred`], and this must be called at most once for it.
/// Consumers uphold this by calling it only on responses they popped;
/// the segment teardown calls it only on responses nobody popped.
pub unsafe fn take_transferred(resp: &Response) -> Option<Box<[u8]>> {
    if ResultKind::from(resp.result_kind) != ResultKind::Transferred || resp.result == 0 {
        return None;
    }
    let ptr = resp.result as *mut u8;
    let slice = core::ptr::slice_from_raw_parts_mut(ptr, resp.result_size as usize);
    Some(Box::from_raw(slice))
}

/// Give a heap buffer up to the wire: returns `(address, length)` for
/// the response's result fields. Ownership passes to whoever pops the
/// response (or to segment teardown if nobody does).
pub fn leak_transferred(bytes: Box<[u8]>) -> (u64, u64) {
    let len = bytes.len() as u64;
    let addr = Box::into_raw(bytes) as *mut u8 as u64;
    (addr, len)
}
