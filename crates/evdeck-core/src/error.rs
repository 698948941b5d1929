//! Engine error types.
//!
//! Two layers: [`ErrorCode`] is the wire-level taxonomy carried in
//! `Response::error_code` and produced by decks; [`EngineError`] is the
//! host-side error type returned by engine APIs (`?`-propagated, never
//! written to a ring).

use core::fmt;

/// Wire-level error taxonomy.
///
/// Carried in `Response::error_code` when `status != 0`. Decks attach one
/// of these codes plus a short static diagnostic to every error outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// Malformed or out-of-range payload, route, or argument
    InvalidParameter = 1,
    /// Ring full, entry arena full, or timer table full
    OutOfResources = 2,
    /// Unknown timer, device, or workflow id
    NotFound = 3,
    /// Valid deck, unrecognized event type
    NotImplemented = 4,
    /// Workflow dependency graph contains a cycle
    Cycle = 5,
    /// Workflow dependency index out of range or self-referential
    BadDependency = 6,
}

impl ErrorCode {
    /// Wire value, as written into `Response::error_code`.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Decode a wire value. `0` is "no error" and decodes to `None`.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(ErrorCode::InvalidParameter),
            2 => Some(ErrorCode::OutOfResources),
            3 => Some(ErrorCode::NotFound),
            4 => Some(ErrorCode::NotImplemented),
            5 => Some(ErrorCode::Cycle),
            6 => Some(ErrorCode::BadDependency),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidParameter => "invalid parameter",
            ErrorCode::OutOfResources => "out of resources",
            ErrorCode::NotFound => "not found",
            ErrorCode::NotImplemented => "not implemented",
            ErrorCode::Cycle => "dependency cycle",
            ErrorCode::BadDependency => "bad dependency",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug)]
pub enum EngineError {
    /// Request or response ring is full; caller must back off and retry.
    RingFull,
    /// Entry arena has no free slot.
    EntriesExhausted,
    /// Timer table has no free slot.
    TimersExhausted,
    /// No deck registered for this route prefix.
    UnknownDeck(u8),
    /// A deck with this prefix is already registered.
    DeckExists(u8),
    /// No channel attached for this process id.
    UnknownProcess(u32),
    /// A channel for this process id is already attached.
    ProcessExists(u32),
    /// No workflow definition with this id.
    UnknownWorkflow(u64),
    /// Workflow node references a dependency that is out of range or itself.
    BadDependency { node: usize, dep: usize },
    /// Workflow dependency graph contains a cycle.
    DependencyCycle,
    /// Workflow definition exceeds the per-instance node limit.
    TooManyNodes(usize),
    /// Route template longer than the wire route field.
    RouteTooLong(usize),
    /// Ring capacity is zero or not a power of two.
    InvalidCapacity(usize),
    /// An entry handle no longer names a live entry.
    StaleHandle,
    /// The engine answered with an error response.
    EventFailed(ErrorCode),
    /// Unrecoverable internal inconsistency; indicates a bug, not a
    /// runtime condition.
    CorruptEntry(&'static str),
    /// mmap of a channel segment failed.
    MmapFailed(i32),
}

impl EngineError {
    /// The wire code reported when this error must surface in a Response.
    pub fn wire_code(&self) -> ErrorCode {
        match self {
            EngineError::RingFull
            | EngineError::EntriesExhausted
            | EngineError::TimersExhausted => ErrorCode::OutOfResources,
            EngineError::UnknownDeck(_)
            | EngineError::UnknownProcess(_)
            | EngineError::UnknownWorkflow(_) => ErrorCode::NotFound,
            EngineError::BadDependency { .. } => ErrorCode::BadDependency,
            EngineError::DependencyCycle => ErrorCode::Cycle,
            EngineError::EventFailed(code) => *code,
            _ => ErrorCode::InvalidParameter,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RingFull => write!(f, "ring full"),
            Self::EntriesExhausted => write!(f, "entry arena full"),
            Self::TimersExhausted => write!(f, "no free timer slots"),
            Self::UnknownDeck(p) => write!(f, "no deck for prefix {}", p),
            Self::DeckExists(p) => write!(f, "deck prefix {} already registered", p),
            Self::UnknownProcess(pid) => write!(f, "no channel for process {}", pid),
            Self::ProcessExists(pid) => write!(f, "process {} already attached", pid),
            Self::UnknownWorkflow(id) => write!(f, "unknown workflow {}", id),
            Self::BadDependency { node, dep } => {
                write!(f, "node {} has bad dependency {}", node, dep)
            }
            Self::DependencyCycle => write!(f, "workflow dependencies contain a cycle"),
            Self::TooManyNodes(n) => write!(f, "workflow has {} nodes, limit is 64", n),
            Self::RouteTooLong(n) => write!(f, "route has {} hops, limit is 8", n),
            Self::InvalidCapacity(c) => write!(f, "capacity {} is not a power of two", c),
            Self::StaleHandle => write!(f, "stale entry handle"),
            Self::EventFailed(code) => write!(f, "event failed: {}", code),
            Self::CorruptEntry(what) => write!(f, "corrupt routing entry: {}", what),
            Self::MmapFailed(e) => write!(f, "mmap failed: errno {}", e),
        }
    }
}

impl std::error::Error for EngineError {}

pub type Result<T> = std::result::Result<T, EngineError>;
