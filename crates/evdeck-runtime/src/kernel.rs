//! The event kernel: channels, routing entries, deck dispatch, sweep.
//!
//! Everything a process asks of the engine goes through [`Kernel::notify`]
//! with a flags word — submit, wait, poll, yield, exit. Submitted events
//! become routing entries; the dispatch loop walks each entry's route,
//! one deck per hop, until a terminal outcome or an error ends it and a
//! response is published on the owner's ring.
//!
//! ```text
//!  request ring ──drain──▶ arena entry ──▶ run queue ──▶ deck.process()
//!                            ▲                │
//!                            │    Complete    │ Suspended
//!                       sweep wakeup ◀── timer table
//!                            │                │
//!  response ring ◀──finalize─┴────────────────┘ Terminal / Error
//! ```
//!
//! # Thread safety
//!
//! `Kernel` is shared behind an `Arc` and every operation takes `&self`.
//! No engine lock is ever held across a deck call: the dispatch loop
//! copies the event out of the arena first, and response publication
//! re-acquires the channel table afterwards. Decks that block (console
//! reads) therefore stall only their caller's notify.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;

use evdeck_core::{
    flags, kdebug, kerror, kinfo, kwarn, Deck, EngineError, EntryHandle, EntryState, ErrorCode,
    InstanceId, Outcome, ProcessId, Response, Result, ResultKind, ResultPayload, WorkflowId,
    MAX_ROUTE_HOPS,
};

use crate::arena::{EntryArena, EntryOrigin, RoutingEntry};
use crate::channel::{channel, leak_transferred, take_transferred, KernelEndpoint, UserEndpoint};
use crate::clock;
use crate::config::KernelConfig;
use crate::decks::{ConsoleBackend, ExecutionDeck, HardwareDeck};
use crate::workflow::{InstanceStatus, NodeDispatch, WorkflowDefinition, WorkflowEngine};

/// Counter snapshot, taken by [`Kernel::stats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelStats {
    pub events_submitted: u64,
    pub events_completed: u64,
    pub events_errored: u64,
    pub suspensions: u64,
    pub wakeups: u64,
    pub responses_pushed: u64,
    pub responses_dropped: u64,
    pub sweeps: u64,
    pub entries_live: usize,
}

#[derive(Default)]
struct StatsInner {
    submitted: AtomicU64,
    completed: AtomicU64,
    errored: AtomicU64,
    suspensions: AtomicU64,
    wakeups: AtomicU64,
    responses_pushed: AtomicU64,
    responses_dropped: AtomicU64,
    sweeps: AtomicU64,
}

/// The engine. Construct with [`Kernel::builder`].
pub struct Kernel {
    config: KernelConfig,
    decks: RwLock<HashMap<u8, Arc<dyn Deck>>>,
    arena: EntryArena,
    run_queue: ArrayQueue<EntryHandle>,
    channels: Mutex<HashMap<u32, KernelEndpoint>>,
    workflows: WorkflowEngine,
    next_event_id: AtomicU64,
    stats: StatsInner,
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new()
    }

    // ============================================================
    // Process lifecycle
    // ============================================================

    /// Map a channel for `pid` and hand back the process side.
    pub fn attach_process(&self, pid: ProcessId) -> Result<UserEndpoint> {
        let mut channels = self.channels.lock().unwrap();
        if channels.contains_key(&pid.0) {
            return Err(EngineError::ProcessExists(pid.0));
        }
        let (user, kernel) = channel(self.config.ring_capacity)?;
        channels.insert(pid.0, kernel);
        kinfo!("Process {} attached", pid.0);
        Ok(user)
    }

    /// Drop `pid`'s channel and retire its in-flight entries. Late
    /// wakeups for those entries are dropped by the generation check.
    pub fn detach_process(&self, pid: ProcessId) -> Result<()> {
        let removed = self.channels.lock().unwrap().remove(&pid.0);
        if removed.is_none() {
            return Err(EngineError::UnknownProcess(pid.0));
        }
        let retired = self
            .arena
            .retire_matching(|entry| entry.origin == EntryOrigin::Process(pid));
        kinfo!("Process {} detached ({} entries retired)", pid.0, retired);
        Ok(())
    }

    // ============================================================
    // The single call
    // ============================================================

    /// Service a notify from `pid`.
    ///
    /// `flags_word` is any combination of the [`flags`] bits, serviced in
    /// a fixed order: SUBMIT, YIELD, POLL, WAIT, EXIT. `target` scopes
    /// POLL and WAIT to responses whose `workflow_id` matches; 0 matches
    /// any. The return value is the drained count for SUBMIT, overridden
    /// by the matching-response count when POLL or WAIT is also set.
    pub fn notify(&self, pid: ProcessId, target: u64, flags_word: u64) -> Result<u64> {
        let mut ret = 0u64;

        if flags_word & flags::SUBMIT != 0 {
            ret = self.submit(pid)?;
        }
        if flags_word & flags::YIELD != 0 {
            std::thread::yield_now();
        }
        if flags_word & flags::POLL != 0 {
            ret = self.count_matching(pid, target)?;
        }
        if flags_word & flags::WAIT != 0 {
            ret = self.wait(pid, target)?;
        }
        if flags_word & flags::EXIT != 0 {
            self.detach_process(pid)?;
        }
        Ok(ret)
    }

    /// Drain the request ring into routing entries and run the dispatch
    /// loop. Returns the number of events drained.
    fn submit(&self, pid: ProcessId) -> Result<u64> {
        let mut drained = 0u64;
        loop {
            // One pop per lock hold; dispatch never runs under it.
            let event = {
                let channels = self.channels.lock().unwrap();
                let endpoint = channels
                    .get(&pid.0)
                    .ok_or(EngineError::UnknownProcess(pid.0))?;
                endpoint.pop_request()
            };
            let Some(mut event) = event else { break };
            drained += 1;

            // ── Step 1: stamp identity and arrival time ──
            if event.id == 0 {
                event.id = self.next_event_id.fetch_add(1, Ordering::Relaxed);
            }
            event.timestamp = clock::now_ms();

            // ── Step 2: admit into the arena ──
            let entry = RoutingEntry::new(event, EntryOrigin::Process(pid));
            match self.arena.insert(entry) {
                Ok(handle) => self.enqueue(handle),
                Err(e) => {
                    // The event is already off the ring; answer with an
                    // error response instead of losing it silently.
                    kerror!("Arena full, rejecting event {}", event.id);
                    let response =
                        error_response(event.id, event.user_id, e.wire_code());
                    self.push_response(pid, response);
                }
            }
        }
        self.stats.submitted.fetch_add(drained, Ordering::Relaxed);

        // ── Step 3: run everything that became dispatchable ──
        self.dispatch_queued();
        Ok(drained)
    }

    fn count_matching(&self, pid: ProcessId, target: u64) -> Result<u64> {
        let channels = self.channels.lock().unwrap();
        let endpoint = channels
            .get(&pid.0)
            .ok_or(EngineError::UnknownProcess(pid.0))?;
        Ok(endpoint.matching_responses(target) as u64)
    }

    /// Block until a matching response is published. Each idle pass runs
    /// a tick so deck sweeps make progress while the caller waits.
    fn wait(&self, pid: ProcessId, target: u64) -> Result<u64> {
        loop {
            let matching = self.count_matching(pid, target)?;
            if matching > 0 {
                return Ok(matching);
            }
            self.tick();
            match self.config.wait_poll_interval_us {
                0 => std::thread::yield_now(),
                us => std::thread::sleep(Duration::from_micros(us)),
            }
        }
    }

    // ============================================================
    // Dispatch
    // ============================================================

    fn enqueue(&self, handle: EntryHandle) {
        // Queue capacity equals arena capacity, so a live entry always
        // fits; a full queue means the entry cannot make progress.
        if self.run_queue.push(handle).is_err() {
            kerror!("Run queue full, failing entry {}", handle.index);
            self.finalize_err(handle, ErrorCode::OutOfResources, "run queue full");
        }
    }

    fn dispatch_queued(&self) {
        while let Some(handle) = self.run_queue.pop() {
            self.dispatch_one(handle);
        }
    }

    fn dispatch_one(&self, handle: EntryHandle) {
        // ── Step 1: load the entry; stale and non-runnable pops drop ──
        let loaded = self.arena.with_mut(handle, |entry| {
            if !entry.state.is_dispatchable() {
                return None;
            }
            entry.state = EntryState::Processing;
            Some((entry.event, entry.cursor))
        });
        let (event, cursor) = match loaded {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                kdebug!("Entry {} not dispatchable, dropped from queue", handle.index);
                return;
            }
            Err(_) => {
                kdebug!("Stale handle in run queue, dropped");
                return;
            }
        };

        // ── Step 2: resolve the deck for this hop ──
        let Some(hop) = event.route_hop(cursor) else {
            kerror!("Entry {} cursor {} past route end", handle.index, cursor);
            self.finalize_err(handle, ErrorCode::InvalidParameter, "route cursor out of range");
            return;
        };
        let Some(deck) = self.deck_for(hop) else {
            kwarn!("No deck for prefix {} (event {})", hop, event.id);
            self.finalize_err(handle, ErrorCode::NotFound, "no deck for route prefix");
            return;
        };

        // ── Step 3: run the deck with no engine lock held ──
        let outcome = deck.process(&event, handle);

        // ── Step 4: apply the outcome ──
        self.apply_outcome(handle, outcome, deck.prefix());
    }

    fn apply_outcome(&self, handle: EntryHandle, outcome: Outcome, deck_prefix: u8) {
        match outcome {
            Outcome::Complete(payload) => {
                let route_done = self.arena.with_mut(handle, |entry| {
                    if !payload.is_none() {
                        entry.result = payload;
                        entry.completed_prefix = deck_prefix;
                    }
                    entry.cursor += 1;
                    if (entry.cursor as usize) >= MAX_ROUTE_HOPS {
                        true
                    } else {
                        entry.state = EntryState::Queued;
                        false
                    }
                });
                match route_done {
                    Ok(true) => self.finalize_ok(handle),
                    Ok(false) => self.enqueue(handle),
                    Err(_) => kdebug!("Entry retired mid-completion, dropped"),
                }
            }

            Outcome::Terminal(payload) => {
                let updated = self.arena.with_mut(handle, |entry| {
                    if !payload.is_none() {
                        entry.result = payload;
                        entry.completed_prefix = deck_prefix;
                    }
                });
                if updated.is_ok() {
                    self.finalize_ok(handle);
                }
            }

            Outcome::Error { code, message } => {
                self.finalize_err(handle, code, message);
            }

            Outcome::Suspended => {
                let parked = self
                    .arena
                    .with_mut(handle, |entry| entry.state = EntryState::Suspended);
                if parked.is_ok() {
                    self.stats.suspensions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn deck_for(&self, prefix: u8) -> Option<Arc<dyn Deck>> {
        self.decks.read().unwrap().get(&prefix).cloned()
    }

    // ============================================================
    // Completion
    // ============================================================

    fn finalize_ok(&self, handle: EntryHandle) {
        let entry = match self.arena.take(handle) {
            Ok(entry) => entry,
            Err(_) => return,
        };
        self.stats.completed.fetch_add(1, Ordering::Relaxed);
        self.complete_entry(entry, None);
    }

    fn finalize_err(&self, handle: EntryHandle, code: ErrorCode, message: &'static str) {
        let entry = match self.arena.take(handle) {
            Ok(entry) => entry,
            Err(_) => return,
        };
        self.stats.errored.fetch_add(1, Ordering::Relaxed);
        kdebug!("Event {} failed: {} ({})", entry.event.id, message, code);
        self.complete_entry(entry, Some(code));
    }

    /// Route a finished entry to its owner: a response ring for process
    /// traffic, the instance masks for workflow traffic.
    fn complete_entry(&self, entry: RoutingEntry, error: Option<ErrorCode>) {
        match entry.origin {
            EntryOrigin::Process(pid) => {
                let response = build_response(entry, error);
                self.push_response(pid, response);
            }
            EntryOrigin::Workflow { instance, node } => {
                // Workflow node results stay engine-side; the entry (and
                // any transferred buffer in it) drops here.
                let ready = self.workflows.record_outcome(instance, node, error.is_none());
                for dispatch in ready {
                    self.admit_workflow_node(instance, dispatch);
                }
            }
        }
    }

    fn push_response(&self, pid: ProcessId, response: Response) {
        let channels = self.channels.lock().unwrap();
        let delivered = match channels.get(&pid.0) {
            Some(endpoint) => endpoint.push_response(&response),
            None => {
                kdebug!("Process {} gone, response for event {} dropped", pid.0, response.event_id);
                false
            }
        };
        if delivered {
            self.stats.responses_pushed.fetch_add(1, Ordering::Relaxed);
        } else {
            if channels.contains_key(&pid.0) {
                kerror!(
                    "Response ring full for process {}, dropping response for event {}",
                    pid.0,
                    response.event_id
                );
            }
            // Reclaim a transferred payload the consumer will never see.
            unsafe {
                drop(take_transferred(&response));
            }
            self.stats.responses_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    // ============================================================
    // Sweep / wakeup
    // ============================================================

    /// One engine tick at the current time. See [`Kernel::tick_at`].
    pub fn tick(&self) -> usize {
        self.tick_at(clock::now_ms())
    }

    /// Sweep every deck at `now_ms`, resume the surrendered entries, and
    /// run the dispatch loop. Returns how many entries were woken.
    /// Taking the time as a parameter keeps timer behavior testable.
    pub fn tick_at(&self, now_ms: u64) -> usize {
        let decks: Vec<Arc<dyn Deck>> = self.decks.read().unwrap().values().cloned().collect();

        let mut woken = 0;
        for deck in decks {
            let prefix = deck.prefix();
            for wakeup in deck.sweep(now_ms) {
                if self.resume(wakeup.handle, wakeup.outcome, prefix) {
                    woken += 1;
                }
            }
        }
        self.stats.sweeps.fetch_add(1, Ordering::Relaxed);

        self.dispatch_queued();
        woken
    }

    /// Move a suspended entry back through the outcome path. Anything
    /// else — already woken, retired, slot reused — drops the wakeup.
    fn resume(&self, handle: EntryHandle, outcome: Outcome, deck_prefix: u8) -> bool {
        let resumed = self.arena.with_mut(handle, |entry| {
            if entry.state.is_suspended() {
                entry.state = EntryState::Processing;
                true
            } else {
                false
            }
        });
        match resumed {
            Ok(true) => {}
            Ok(false) => {
                kdebug!("Wakeup for non-suspended entry {}, dropped", handle.index);
                return false;
            }
            Err(_) => {
                kdebug!("Wakeup for retired entry, dropped");
                return false;
            }
        }
        self.stats.wakeups.fetch_add(1, Ordering::Relaxed);
        self.apply_outcome(handle, outcome, deck_prefix);
        true
    }

    // ============================================================
    // Decks
    // ============================================================

    pub fn register_deck<D: Deck + 'static>(&self, deck: D) -> Result<()> {
        self.register_deck_arc(Arc::new(deck))
    }

    fn register_deck_arc(&self, deck: Arc<dyn Deck>) -> Result<()> {
        let mut decks = self.decks.write().unwrap();
        let prefix = deck.prefix();
        if decks.contains_key(&prefix) {
            return Err(EngineError::DeckExists(prefix));
        }
        kinfo!("Deck '{}' registered at prefix {}", deck.name(), prefix);
        decks.insert(prefix, deck);
        Ok(())
    }

    // ============================================================
    // Workflows
    // ============================================================

    pub fn register_workflow(&self, definition: WorkflowDefinition) -> Result<WorkflowId> {
        self.workflows.register(definition)
    }

    /// Activate a workflow: admit every dependency-free node and run the
    /// dispatch loop. Downstream nodes are admitted as their
    /// dependencies complete.
    pub fn start_workflow(&self, id: WorkflowId) -> Result<InstanceId> {
        let (instance, ready) = self.workflows.instantiate(id)?;
        for dispatch in ready {
            self.admit_workflow_node(instance, dispatch);
        }
        self.dispatch_queued();
        Ok(instance)
    }

    pub fn workflow_status(&self, instance: InstanceId) -> Result<InstanceStatus> {
        self.workflows.status(instance)
    }

    fn admit_workflow_node(&self, instance: InstanceId, dispatch: NodeDispatch) {
        let mut event = dispatch.event;
        event.id = self.next_event_id.fetch_add(1, Ordering::Relaxed);
        event.timestamp = clock::now_ms();

        let origin = EntryOrigin::Workflow { instance, node: dispatch.node };
        match self.arena.insert(RoutingEntry::new(event, origin)) {
            Ok(handle) => self.enqueue(handle),
            Err(_) => {
                kerror!(
                    "Arena full, failing node {} of instance {}",
                    dispatch.node,
                    instance.0
                );
                // An error never unblocks other nodes, so this cannot
                // produce new dispatches.
                let ready = self.workflows.record_outcome(instance, dispatch.node, false);
                debug_assert!(ready.is_empty());
            }
        }
    }

    // ============================================================
    // Introspection
    // ============================================================

    pub fn stats(&self) -> KernelStats {
        KernelStats {
            events_submitted: self.stats.submitted.load(Ordering::Relaxed),
            events_completed: self.stats.completed.load(Ordering::Relaxed),
            events_errored: self.stats.errored.load(Ordering::Relaxed),
            suspensions: self.stats.suspensions.load(Ordering::Relaxed),
            wakeups: self.stats.wakeups.load(Ordering::Relaxed),
            responses_pushed: self.stats.responses_pushed.load(Ordering::Relaxed),
            responses_dropped: self.stats.responses_dropped.load(Ordering::Relaxed),
            sweeps: self.stats.sweeps.load(Ordering::Relaxed),
            entries_live: self.arena.live(),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }
}

/// Lower an owned entry into its wire response.
fn build_response(entry: RoutingEntry, error: Option<ErrorCode>) -> Response {
    let (result, result_size, kind) = match entry.result {
        ResultPayload::None => (0, 0, ResultKind::None),
        ResultPayload::Value(v) => (v, 0, ResultKind::Value),
        ResultPayload::Static(bytes) => {
            (bytes.as_ptr() as u64, bytes.len() as u64, ResultKind::Static)
        }
        ResultPayload::Transferred(bytes) => {
            let (addr, len) = leak_transferred(bytes);
            (addr, len, ResultKind::Transferred)
        }
    };
    Response {
        event_id: entry.event.id,
        workflow_id: entry.event.user_id,
        status: if error.is_some() { 1 } else { 0 },
        error_code: error.map(ErrorCode::as_u32).unwrap_or(0),
        timestamp: clock::now_ms(),
        result,
        result_size,
        result_kind: kind as u8,
        completed_prefix: entry.completed_prefix,
        _pad: [0; 6],
    }
}

/// A response for an event that never reached the arena.
fn error_response(event_id: u64, user_id: u64, code: ErrorCode) -> Response {
    Response {
        event_id,
        workflow_id: user_id,
        status: 1,
        error_code: code.as_u32(),
        timestamp: clock::now_ms(),
        result: 0,
        result_size: 0,
        result_kind: ResultKind::None as u8,
        completed_prefix: 0,
        _pad: [0; 6],
    }
}

/// Assembles a [`Kernel`]: config, stock decks, embedder decks.
pub struct KernelBuilder {
    config: KernelConfig,
    console: Option<Box<dyn ConsoleBackend>>,
    extra_decks: Vec<Arc<dyn Deck>>,
    stock_decks: bool,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self {
            config: KernelConfig::from_env(),
            console: None,
            extra_decks: Vec::new(),
            stock_decks: true,
        }
    }

    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Console backend for the stock hardware deck.
    pub fn console(mut self, console: Box<dyn ConsoleBackend>) -> Self {
        self.console = Some(console);
        self
    }

    /// Register an additional deck at build time.
    pub fn deck<D: Deck + 'static>(mut self, deck: D) -> Self {
        self.extra_decks.push(Arc::new(deck));
        self
    }

    /// Skip the stock execution and hardware decks. The embedder owns
    /// every prefix, including 0.
    pub fn without_stock_decks(mut self) -> Self {
        self.stock_decks = false;
        self
    }

    /// Build the kernel.
    ///
    /// 1. Validates the configuration
    /// 2. Allocates the entry arena and run queue
    /// 3. Registers the stock decks (unless disabled)
    /// 4. Registers embedder decks
    pub fn build(self) -> Result<Arc<Kernel>> {
        // 1. Configuration
        self.config.validate()?;
        evdeck_core::kprint::init();

        // 2. Arena and run queue
        let kernel = Arc::new(Kernel {
            arena: EntryArena::new(self.config.max_entries),
            run_queue: ArrayQueue::new(self.config.max_entries),
            decks: RwLock::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            workflows: WorkflowEngine::new(),
            next_event_id: AtomicU64::new(1),
            stats: StatsInner::default(),
            config: self.config,
        });

        // 3. Stock decks
        if self.stock_decks {
            kernel.register_deck(ExecutionDeck)?;
            let hardware = match self.console {
                Some(console) => HardwareDeck::with_console(console),
                None => HardwareDeck::new(),
            };
            kernel.register_deck(hardware)?;
        }

        // 4. Embedder decks
        for deck in self.extra_decks {
            kernel.register_deck_arc(deck)?;
        }

        kinfo!(
            "Kernel ready ({} ring slots, {} entries)",
            kernel.config.ring_capacity,
            kernel.config.max_entries
        );
        Ok(kernel)
    }
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::NodeTemplate;
    use evdeck_core::requests::encode_timer_sleep;
    use evdeck_core::{event_type, prefix, Event, FnDeck, Outcome, DEFAULT_USER};

    fn quiet_config() -> KernelConfig {
        KernelConfig::new().ring_capacity(16).max_entries(64)
    }

    fn submit_one(kernel: &Kernel, user: &UserEndpoint, event: Event) -> Response {
        assert!(user.push_request(&event));
        kernel.notify(ProcessId(1), 0, flags::SUBMIT).unwrap();
        user.pop_response().expect("response expected")
    }

    #[test]
    fn test_terminal_route_completes() {
        let kernel = Kernel::builder().config(quiet_config()).build().unwrap();
        let user = kernel.attach_process(ProcessId(1)).unwrap();

        let resp = submit_one(
            &kernel,
            &user,
            Event::new(event_type::EXECUTE, prefix::EXECUTION),
        );
        assert!(resp.is_ok());
        assert_ne!(resp.event_id, 0);
        assert_eq!(resp.workflow_id, DEFAULT_USER);
        assert_eq!(kernel.stats().events_completed, 1);
        assert_eq!(kernel.stats().entries_live, 0);
    }

    #[test]
    fn test_route_hops_run_in_order() {
        let order: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let o5 = Arc::clone(&order);
        let o6 = Arc::clone(&order);

        let kernel = Kernel::builder()
            .config(quiet_config())
            .without_stock_decks()
            .deck(FnDeck::new(5, "first", move |_, _| {
                o5.lock().unwrap().push(5);
                Outcome::Complete(ResultPayload::Value(55))
            }))
            .deck(FnDeck::new(6, "second", move |_, _| {
                o6.lock().unwrap().push(6);
                Outcome::Complete(ResultPayload::Value(66))
            }))
            .deck(FnDeck::new(0, "terminal", |_, _| {
                Outcome::Terminal(ResultPayload::None)
            }))
            .build()
            .unwrap();
        let user = kernel.attach_process(ProcessId(1)).unwrap();

        let mut ev = Event::new(event_type::EXECUTE, prefix::EXECUTION);
        ev.set_route(&[5, 6, 0]);
        let resp = submit_one(&kernel, &user, ev);

        assert_eq!(*order.lock().unwrap(), vec![5, 6]);
        assert!(resp.is_ok());
        // The latest non-empty result wins.
        assert_eq!(resp.value(), Some(66));
        assert_eq!(resp.completed_prefix, 6);
    }

    #[test]
    fn test_error_ends_route_before_later_hops() {
        let later: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&later);

        let kernel = Kernel::builder()
            .config(quiet_config())
            .without_stock_decks()
            .deck(FnDeck::new(5, "failing", |_, _| {
                Outcome::error(ErrorCode::NotFound, "nothing here")
            }))
            .deck(FnDeck::new(6, "never", move |_, _| {
                *counter.lock().unwrap() += 1;
                Outcome::Complete(ResultPayload::None)
            }))
            .deck(FnDeck::new(0, "terminal", |_, _| {
                Outcome::Terminal(ResultPayload::None)
            }))
            .build()
            .unwrap();
        let user = kernel.attach_process(ProcessId(1)).unwrap();

        let mut ev = Event::new(event_type::EXECUTE, prefix::EXECUTION);
        ev.set_route(&[5, 6, 0]);
        let resp = submit_one(&kernel, &user, ev);

        assert!(!resp.is_ok());
        assert_eq!(resp.error(), Some(ErrorCode::NotFound));
        assert_eq!(*later.lock().unwrap(), 0);
        assert_eq!(kernel.stats().events_errored, 1);
    }

    #[test]
    fn test_unregistered_prefix_fails_event() {
        let kernel = Kernel::builder().config(quiet_config()).build().unwrap();
        let user = kernel.attach_process(ProcessId(1)).unwrap();

        let mut ev = Event::new(event_type::EXECUTE, prefix::EXECUTION);
        ev.set_route(&[9]);
        let resp = submit_one(&kernel, &user, ev);

        assert_eq!(resp.error(), Some(ErrorCode::NotFound));
    }

    #[test]
    fn test_full_route_of_completions_finishes() {
        let kernel = Kernel::builder()
            .config(quiet_config())
            .without_stock_decks()
            .deck(FnDeck::new(5, "hop", |_, _| {
                Outcome::Complete(ResultPayload::None)
            }))
            .build()
            .unwrap();
        let user = kernel.attach_process(ProcessId(1)).unwrap();

        let mut ev = Event::new(event_type::EXECUTE, prefix::EXECUTION);
        ev.set_route(&[5; 8]);
        let resp = submit_one(&kernel, &user, ev);

        // Ran out of hops with nothing but per-hop completions.
        assert!(resp.is_ok());
        assert_eq!(resp.result_kind, ResultKind::None as u8);
    }

    #[test]
    fn test_sleep_suspends_then_tick_resumes() {
        let kernel = Kernel::builder().config(quiet_config()).build().unwrap();
        let user = kernel.attach_process(ProcessId(1)).unwrap();

        let mut ev = Event::new(event_type::TIMER_SLEEP, prefix::HARDWARE);
        encode_timer_sleep(&mut ev.data, 500);
        assert!(user.push_request(&ev));

        kernel.notify(ProcessId(1), 0, flags::SUBMIT).unwrap();
        assert_eq!(kernel.stats().suspensions, 1);
        assert_eq!(kernel.stats().entries_live, 1);
        assert_eq!(kernel.notify(ProcessId(1), 0, flags::POLL).unwrap(), 0);

        // Before the deadline nothing wakes.
        assert_eq!(kernel.tick_at(clock::now_ms()), 0);

        let woken = kernel.tick_at(clock::now_ms() + 5_000);
        assert_eq!(woken, 1);
        let resp = user.pop_response().unwrap();
        assert!(resp.is_ok());
        assert_eq!(resp.completed_prefix, 0);
        assert_eq!(kernel.stats().entries_live, 0);
    }

    #[test]
    fn test_poll_counts_matching_target() {
        let kernel = Kernel::builder().config(quiet_config()).build().unwrap();
        let user = kernel.attach_process(ProcessId(1)).unwrap();

        for _ in 0..3 {
            assert!(user.push_request(&Event::new(event_type::EXECUTE, prefix::EXECUTION)));
        }
        let drained = kernel.notify(ProcessId(1), 0, flags::SUBMIT).unwrap();
        assert_eq!(drained, 3);

        assert_eq!(kernel.notify(ProcessId(1), 0, flags::POLL).unwrap(), 3);
        assert_eq!(
            kernel.notify(ProcessId(1), DEFAULT_USER, flags::POLL).unwrap(),
            3
        );
        assert_eq!(kernel.notify(ProcessId(1), 42, flags::POLL).unwrap(), 0);
    }

    #[test]
    fn test_submit_and_wait_combined() {
        let kernel = Kernel::builder().config(quiet_config()).build().unwrap();
        let user = kernel.attach_process(ProcessId(1)).unwrap();

        assert!(user.push_request(&Event::new(event_type::EXECUTE, prefix::EXECUTION)));
        let n = kernel
            .notify(ProcessId(1), DEFAULT_USER, flags::SUBMIT | flags::WAIT)
            .unwrap();
        assert_eq!(n, 1);
        assert!(user.pop_response().unwrap().is_ok());
    }

    #[test]
    fn test_exit_detaches_and_retires() {
        let kernel = Kernel::builder().config(quiet_config()).build().unwrap();
        let user = kernel.attach_process(ProcessId(1)).unwrap();

        let mut ev = Event::new(event_type::TIMER_SLEEP, prefix::HARDWARE);
        encode_timer_sleep(&mut ev.data, 5);
        assert!(user.push_request(&ev));
        kernel.notify(ProcessId(1), 0, flags::SUBMIT).unwrap();
        assert_eq!(kernel.stats().entries_live, 1);

        kernel.notify(ProcessId(1), 0, flags::EXIT).unwrap();
        assert_eq!(kernel.stats().entries_live, 0);
        assert!(matches!(
            kernel.notify(ProcessId(1), 0, flags::POLL),
            Err(EngineError::UnknownProcess(1))
        ));

        // The orphaned timer fires into a stale handle and is dropped.
        assert_eq!(kernel.tick_at(clock::now_ms() + 50), 0);
    }

    #[test]
    fn test_response_ring_overflow_drops_and_counts() {
        let config = KernelConfig::new().ring_capacity(4).max_entries(64);
        let kernel = Kernel::builder().config(config).build().unwrap();
        let user = kernel.attach_process(ProcessId(1)).unwrap();

        for _ in 0..2 {
            for _ in 0..4 {
                assert!(user.push_request(&Event::new(event_type::EXECUTE, prefix::EXECUTION)));
            }
            kernel.notify(ProcessId(1), 0, flags::SUBMIT).unwrap();
        }

        // First four filled the response ring; the next four dropped.
        let stats = kernel.stats();
        assert_eq!(stats.responses_pushed, 4);
        assert_eq!(stats.responses_dropped, 4);
        assert_eq!(user.pending_responses(), 4);
    }

    #[test]
    fn test_attach_twice_rejected() {
        let kernel = Kernel::builder().config(quiet_config()).build().unwrap();
        let _user = kernel.attach_process(ProcessId(1)).unwrap();
        assert!(matches!(
            kernel.attach_process(ProcessId(1)),
            Err(EngineError::ProcessExists(1))
        ));
    }

    #[test]
    fn test_duplicate_deck_prefix_rejected() {
        let kernel = Kernel::builder().config(quiet_config()).build().unwrap();
        let result = kernel.register_deck(FnDeck::new(prefix::EXECUTION, "dup", |_, _| {
            Outcome::Terminal(ResultPayload::None)
        }));
        assert!(matches!(result, Err(EngineError::DeckExists(0))));
    }

    #[test]
    fn test_diamond_workflow_all_succeed() {
        let kernel = Kernel::builder().config(quiet_config()).build().unwrap();

        let id = kernel
            .register_workflow(WorkflowDefinition {
                name: "diamond".into(),
                route: vec![prefix::EXECUTION],
                nodes: vec![
                    NodeTemplate::new(event_type::EXECUTE),
                    NodeTemplate::new(event_type::EXECUTE).depends_on(&[0]),
                    NodeTemplate::new(event_type::EXECUTE).depends_on(&[0]),
                    NodeTemplate::new(event_type::EXECUTE).depends_on(&[1, 2]),
                ],
            })
            .unwrap();

        let instance = kernel.start_workflow(id).unwrap();
        assert_eq!(
            kernel.workflow_status(instance).unwrap(),
            InstanceStatus::AllSucceeded
        );
        assert_eq!(kernel.stats().entries_live, 0);
    }

    #[test]
    fn test_workflow_failure_blocks_dependents() {
        let ran: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&ran);

        let kernel = Kernel::builder()
            .config(quiet_config())
            .without_stock_decks()
            .deck(FnDeck::new(0, "flaky", move |ev, _| {
                log.lock().unwrap().push(ev.event_type);
                if ev.event_type == 13 {
                    Outcome::error(ErrorCode::InvalidParameter, "told to fail")
                } else {
                    Outcome::Terminal(ResultPayload::None)
                }
            }))
            .build()
            .unwrap();

        // 0 ok; 1 fails; 2 ok; 3 depends on 1 and 2 and must never run.
        let id = kernel
            .register_workflow(WorkflowDefinition {
                name: "lopsided".into(),
                route: vec![0],
                nodes: vec![
                    NodeTemplate::new(10),
                    NodeTemplate::new(13).depends_on(&[0]),
                    NodeTemplate::new(11).depends_on(&[0]),
                    NodeTemplate::new(12).depends_on(&[1, 2]),
                ],
            })
            .unwrap();

        let instance = kernel.start_workflow(id).unwrap();
        assert_eq!(
            kernel.workflow_status(instance).unwrap(),
            InstanceStatus::Partial
        );
        let ran = ran.lock().unwrap();
        assert!(ran.contains(&10) && ran.contains(&13) && ran.contains(&11));
        assert!(!ran.contains(&12));
    }
}
