//! Wire-level event and response records.
//!
//! These are the fixed-size records that cross the ring buffers between a
//! process and the kernel. Layout is `repr(C)` and position-stable; each
//! field a peer writes is read only after the ring counter that publishes
//! the slot (see `evdeck-runtime::ring`).

use core::fmt;

use crate::error::ErrorCode;

/// Size of the opaque payload region in every event.
pub const EVENT_DATA_SIZE: usize = 224;

/// Maximum number of deck hops in a route.
pub const MAX_ROUTE_HOPS: usize = 8;

/// `user_id` for plain process traffic. Workflow-built events carry the
/// instance id here instead.
pub const DEFAULT_USER: u64 = 1;

/// Notify flags — the second argument of the single kernel call.
pub mod flags {
    /// Drain the caller's request ring into routing entries and dispatch.
    pub const SUBMIT: u64 = 0x01;
    /// Block until at least one response matching `target` is available.
    pub const WAIT: u64 = 0x02;
    /// Non-blocking check; returns the number of matching responses.
    pub const POLL: u64 = 0x04;
    /// Give up the CPU to other processes (scheduling hint).
    pub const YIELD: u64 = 0x08;
    /// Detach the caller's channel and retire its in-flight entries.
    pub const EXIT: u64 = 0x10;
}

/// Event type namespace.
///
/// A flat integer space partitioned by range: storage owns 10-19, the
/// hardware deck owns 40-79 (devices 40-49, timers 50-59, console 70-79).
/// The engine routes by prefix, never by type; these ranges bind decks
/// only.
pub mod event_type {
    /// Terminal no-op handled by the execution deck.
    pub const EXECUTE: u32 = 0;

    // Storage deck (10-19)
    pub const FILE_OPEN: u32 = 10;
    pub const FILE_CLOSE: u32 = 11;
    pub const FILE_READ: u32 = 12;
    pub const FILE_WRITE: u32 = 13;
    pub const FILE_STAT: u32 = 14;
    pub const FILE_CREATE_TAGGED: u32 = 15;
    pub const FILE_QUERY: u32 = 16;
    pub const FILE_TAG_ADD: u32 = 17;
    pub const FILE_TAG_REMOVE: u32 = 18;
    pub const FILE_TAG_GET: u32 = 19;

    // Hardware deck: devices (40-49)
    pub const DEV_OPEN: u32 = 40;
    pub const DEV_IOCTL: u32 = 41;
    pub const DEV_READ: u32 = 42;
    pub const DEV_WRITE: u32 = 43;

    // Hardware deck: timers (50-59)
    pub const TIMER_CREATE: u32 = 50;
    pub const TIMER_CANCEL: u32 = 51;
    pub const TIMER_SLEEP: u32 = 52;
    pub const TIMER_GETTICKS: u32 = 53;

    // Hardware deck: console (70-79)
    pub const CONSOLE_WRITE: u32 = 70;
    pub const CONSOLE_WRITE_ATTR: u32 = 71;
    pub const CONSOLE_READ_LINE: u32 = 72;
    pub const CONSOLE_READ_CHAR: u32 = 73;
    pub const CONSOLE_CLEAR: u32 = 74;
    pub const CONSOLE_SET_POS: u32 = 75;
    pub const CONSOLE_GET_POS: u32 = 76;

    /// Inclusive bounds of the hardware deck's range.
    pub const HARDWARE_MIN: u32 = 40;
    pub const HARDWARE_MAX: u32 = 79;

    /// Inclusive bounds of the storage deck's range.
    pub const STORAGE_MIN: u32 = 10;
    pub const STORAGE_MAX: u32 = 19;
}

/// Deck prefixes — one byte per route hop.
pub mod prefix {
    /// Terminal deck; completes whatever result the route carried in.
    pub const EXECUTION: u8 = 0;
    /// Storage / file deck.
    pub const STORAGE: u8 = 1;
    /// Hardware deck: devices, timers, console.
    pub const HARDWARE: u8 = 3;
}

/// An event submitted into a request ring.
///
/// Fixed 264-byte record. Written by the submitter, copied out by the
/// kernel at drain time (ring slots are transient). `id` 0 asks the kernel
/// to assign one; `timestamp` is kernel-filled regardless of what the
/// submitter wrote.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Event {
    /// Unique event id, or 0 for "kernel assigns".
    pub id: u64,
    /// Logical owner: [`DEFAULT_USER`] for plain traffic, the workflow
    /// instance id for engine-built events.
    pub user_id: u64,
    /// Operation code (see [`event_type`]).
    pub event_type: u32,
    pub _pad: u32,
    /// Milliseconds since engine start, stamped at drain time.
    pub timestamp: u64,
    /// Deck prefixes to traverse, in order. Unused tail bytes are 0.
    pub route: [u8; MAX_ROUTE_HOPS],
    /// Opaque payload; layout is per event type.
    pub data: [u8; EVENT_DATA_SIZE],
}

impl Event {
    /// Build an event routed through `route_prefix` and then the execution
    /// deck, with an empty payload.
    pub fn new(event_type: u32, route_prefix: u8) -> Self {
        let mut route = [0u8; MAX_ROUTE_HOPS];
        route[0] = route_prefix;
        Self {
            id: 0,
            user_id: DEFAULT_USER,
            event_type,
            _pad: 0,
            timestamp: 0,
            route,
            data: [0u8; EVENT_DATA_SIZE],
        }
    }

    /// Replace the route with `hops` (at most [`MAX_ROUTE_HOPS`]; extra
    /// hops are ignored, missing hops are 0).
    pub fn set_route(&mut self, hops: &[u8]) {
        self.route = [0u8; MAX_ROUTE_HOPS];
        let n = hops.len().min(MAX_ROUTE_HOPS);
        self.route[..n].copy_from_slice(&hops[..n]);
    }

    /// Copy `bytes` into the payload, truncating at [`EVENT_DATA_SIZE`].
    pub fn with_payload(mut self, bytes: &[u8]) -> Self {
        let n = bytes.len().min(EVENT_DATA_SIZE);
        self.data[..n].copy_from_slice(&bytes[..n]);
        self
    }

    /// The deck prefix at route position `cursor`, or `None` past the end.
    #[inline]
    pub fn route_hop(&self, cursor: u8) -> Option<u8> {
        self.route.get(cursor as usize).copied()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The 224-byte payload is noise in logs; elide it.
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("event_type", &self.event_type)
            .field("timestamp", &self.timestamp)
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}

/// How the `result` field of a [`Response`] must be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultKind {
    /// No result payload.
    None = 0,
    /// `result` is an inline scalar, not an address.
    Value = 1,
    /// `result` points at engine-owned memory, valid for the response's
    /// lifetime; the consumer must not free it.
    Static = 2,
    /// `result` points at a heap block whose ownership passes to whoever
    /// pops the response; the consumer must release it.
    Transferred = 3,
}

impl From<u8> for ResultKind {
    fn from(v: u8) -> Self {
        match v {
            1 => ResultKind::Value,
            2 => ResultKind::Static,
            3 => ResultKind::Transferred,
            _ => ResultKind::None, // Unknown tags carry no payload
        }
    }
}

impl From<ResultKind> for u8 {
    fn from(kind: ResultKind) -> u8 {
        kind as u8
    }
}

/// A completion record pushed into a response ring.
///
/// Fixed 56-byte record. `result_kind` is the only sanctioned way a
/// consumer learns how to interpret (and whether to free) `result`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Response {
    /// Id of the event this response answers.
    pub event_id: u64,
    /// The event's `user_id` (workflow instance for engine traffic).
    pub workflow_id: u64,
    /// 0 = success, nonzero = failed.
    pub status: u32,
    /// Wire error code when `status != 0` (see [`ErrorCode`]).
    pub error_code: u32,
    /// Milliseconds since engine start, stamped at finalize time.
    pub timestamp: u64,
    /// Scalar value or address, per `result_kind`.
    pub result: u64,
    /// Byte length of the pointed-at payload (0 for scalar results).
    pub result_size: u64,
    /// [`ResultKind`] discriminant.
    pub result_kind: u8,
    /// Prefix of the deck that produced the final result.
    pub completed_prefix: u8,
    pub _pad: [u8; 6],
}

impl Response {
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }

    /// The wire error, if this response failed.
    pub fn error(&self) -> Option<ErrorCode> {
        if self.is_ok() {
            None
        } else {
            ErrorCode::from_u32(self.error_code)
        }
    }

    /// The inline scalar result, if the response carries one.
    pub fn value(&self) -> Option<u64> {
        match ResultKind::from(self.result_kind) {
            ResultKind::Value => Some(self.result),
            _ => None,
        }
    }
}
