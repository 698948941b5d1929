//! evdeck End-to-End Smoke Test
//!
//! Tests the full engine stack:
//!   Part A — Transport: channel segment, SPSC rings, backpressure
//!   Part B — Routing: multi-hop dispatch, result carrying, errors
//!   Part C — Hardware deck: suspend/resume, timers, console
//!   Part D — Workflows: diamond graph, validation, failure masking
//!   Part E — Isolation: mixed batches, detach, teardown
//!
//! Run: ./target/release/evdeck-smoke

use std::sync::{Arc, Mutex};

use evdeck::{
    event_type, flags, prefix, set_log_level, vga, ErrorCode, Event, FnDeck, Kernel,
    KernelConfig, LogLevel, Outcome, ProcessId, Response, ResultPayload, Session,
};
use evdeck_runtime::channel::channel;
use evdeck_runtime::clock;
use evdeck_runtime::workflow::{NodeTemplate, WorkflowDefinition};
use evdeck_runtime::{InstanceStatus, UserEndpoint};

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

fn small_config() -> KernelConfig {
    KernelConfig::new().ring_capacity(16).max_entries(64)
}

/// Helper: push one event, submit, pop its response.
fn round_trip(kernel: &Kernel, user: &UserEndpoint, pid: ProcessId, event: Event) -> Option<Response> {
    if !user.push_request(&event) {
        return None;
    }
    kernel.notify(pid, 0, flags::SUBMIT).ok()?;
    user.pop_response()
}

// ════════════════════════════════════════════════════════════
// Part A: Transport
// ════════════════════════════════════════════════════════════

fn test_transport(t: &mut TestRunner) {
    t.section("Part A: Transport (rings and channel segment)");

    // A1: segment with both rings
    let (user, kernel) = match channel(8) {
        Ok(pair) => { t.pass("channel(8) maps a segment"); pair }
        Err(e) => {
            t.fail("channel(8) maps a segment", &format!("{}", e));
            return;
        }
    };

    // A2: round trip preserves the event
    let mut ev = Event::new(event_type::CONSOLE_WRITE, prefix::HARDWARE);
    ev.id = 77;
    ev.data[0] = 0xAB;
    user.push_request(&ev);
    let back = kernel.pop_request();
    t.check(
        "event round trip",
        matches!(back, Some(b) if b.id == 77 && b.data[0] == 0xAB && b.route[0] == 3),
        "fields did not survive",
    );

    // A3: FIFO order
    for i in 0..5u64 {
        let mut e = Event::new(event_type::EXECUTE, prefix::EXECUTION);
        e.id = i + 1;
        user.push_request(&e);
    }
    let mut in_order = true;
    for i in 0..5u64 {
        match kernel.pop_request() {
            Some(e) if e.id == i + 1 => {}
            _ => { in_order = false; break; }
        }
    }
    t.check("FIFO order over 5 events", in_order, "order broken");

    // A4: backpressure at capacity
    let ev = Event::new(event_type::EXECUTE, prefix::EXECUTION);
    let mut accepted = 0;
    while user.push_request(&ev) {
        accepted += 1;
        if accepted > 16 { break; }
    }
    t.check(
        &format!("request ring holds exactly 8 (got {})", accepted),
        accepted == 8,
        "capacity mismatch",
    );
    kernel.pop_request();
    t.check("pop frees a slot", user.push_request(&ev), "push after pop failed");

    // A5: response matching by workflow id
    let mut resp = Response::default();
    resp.event_id = 1;
    resp.workflow_id = 41;
    kernel.push_response(&resp);
    resp.event_id = 2;
    resp.workflow_id = 42;
    kernel.push_response(&resp);
    t.check(
        "matching_responses by target",
        kernel.matching_responses(42) == 1
            && kernel.matching_responses(0) == 2
            && user.pending_responses() == 2,
        "peek counts wrong",
    );
}

// ════════════════════════════════════════════════════════════
// Part B: Routing
// ════════════════════════════════════════════════════════════

fn test_routing(t: &mut TestRunner) {
    t.section("Part B: Routing (multi-hop dispatch)");

    let order: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let o5 = Arc::clone(&order);
    let o6 = Arc::clone(&order);

    let kernel = Kernel::builder()
        .config(small_config())
        .without_stock_decks()
        .deck(FnDeck::new(5, "five", move |_, _| {
            o5.lock().unwrap().push(5);
            Outcome::Complete(ResultPayload::Value(500))
        }))
        .deck(FnDeck::new(6, "six", move |_, _| {
            o6.lock().unwrap().push(6);
            Outcome::Complete(ResultPayload::Value(600))
        }))
        .deck(FnDeck::new(7, "fail", |_, _| {
            Outcome::error(ErrorCode::NotImplemented, "always fails")
        }))
        .deck(FnDeck::new(0, "end", |_, _| Outcome::Terminal(ResultPayload::None)))
        .build()
        .unwrap();
    let pid = ProcessId(1);
    let user = kernel.attach_process(pid).unwrap();

    // B1: single-hop terminal
    let resp = round_trip(&kernel, &user, pid, Event::new(1, 0)).unwrap();
    t.check("terminal hop completes", resp.is_ok(), "expected ok");

    // B2: hops run in route order
    order.lock().unwrap().clear();
    let mut ev = Event::new(1, 5);
    ev.set_route(&[5, 6, 0]);
    let resp = round_trip(&kernel, &user, pid, ev).unwrap();
    let seen = order.lock().unwrap().clone();
    t.check("hops run in order [5, 6]", seen == vec![5, 6], &format!("{:?}", seen));

    // B3: the last non-empty result rides to the response
    t.check(
        &format!("result carried (value {:?})", resp.value()),
        resp.is_ok() && resp.value() == Some(600) && resp.completed_prefix == 6,
        "wrong result or prefix",
    );

    // B4: unknown prefix fails the event
    let mut ev = Event::new(1, 9);
    ev.set_route(&[9]);
    let resp = round_trip(&kernel, &user, pid, ev).unwrap();
    t.check(
        "unknown prefix -> not_found",
        resp.error() == Some(ErrorCode::NotFound),
        &format!("{:?}", resp.error()),
    );

    // B5: an error ends the route before later hops
    order.lock().unwrap().clear();
    let mut ev = Event::new(1, 7);
    ev.set_route(&[7, 6, 0]);
    let resp = round_trip(&kernel, &user, pid, ev).unwrap();
    let seen = order.lock().unwrap().clone();
    t.check(
        "error stops the route",
        resp.error() == Some(ErrorCode::NotImplemented) && seen.is_empty(),
        "later hop still ran",
    );

    // B6: nothing left behind
    t.check(
        "arena drained",
        kernel.stats().entries_live == 0,
        &format!("{} live", kernel.stats().entries_live),
    );
}

// ════════════════════════════════════════════════════════════
// Part C: Hardware deck
// ════════════════════════════════════════════════════════════

fn test_hardware(t: &mut TestRunner) {
    t.section("Part C: Hardware deck (suspend, timers, console)");

    let kernel = Kernel::builder().config(small_config()).build().unwrap();
    let pid = ProcessId(1);
    let user = kernel.attach_process(pid).unwrap();

    // C1: sleep suspends the entry
    let mut ev = Event::new(event_type::TIMER_SLEEP, prefix::HARDWARE);
    evdeck::requests::encode_timer_sleep(&mut ev.data, 400);
    user.push_request(&ev);
    kernel.notify(pid, 0, flags::SUBMIT).unwrap();
    let stats = kernel.stats();
    t.check(
        "sleep suspends (no response yet)",
        stats.suspensions == 1
            && stats.entries_live == 1
            && kernel.notify(pid, 0, flags::POLL).unwrap() == 0,
        "entry did not park",
    );

    // C2: early sweep leaves it parked
    t.check("early tick wakes nothing", kernel.tick() == 0, "woke too soon");

    // C3: past the deadline the sweep completes it
    let woken = kernel.tick_at(clock::now_ms() + 5_000);
    let resp = user.pop_response();
    t.check(
        "deadline tick wakes and responds",
        woken == 1 && matches!(resp, Some(r) if r.is_ok()),
        &format!("woken={}", woken),
    );

    // Session covers the blocking path from here on.
    drop(user);
    kernel.notify(pid, 0, flags::EXIT).unwrap();
    let session = Session::attach(&kernel, ProcessId(2)).unwrap();

    // C4: blocking sleep via WAIT
    let before = clock::now_ms();
    let slept = session.sleep_ms(30);
    let elapsed = clock::now_ms() - before;
    t.check(
        &format!("session sleep_ms(30) blocked {} ms", elapsed),
        slept.is_ok() && elapsed >= 30,
        "returned early",
    );

    // C5: ticks advance
    let t1 = session.get_ticks().unwrap_or(0);
    let t2 = session.get_ticks().unwrap_or(0);
    t.check("get_ticks monotonic", t2 >= t1, "time went backwards");

    // C6: console write paths
    let wrote = session.print("  smoke: plain console write\n").is_ok()
        && session.print_attr("  smoke: green console write\n", vga::SUCCESS).is_ok();
    t.check("console write / write_attr", wrote, "write failed");

    // C7: standalone timer create and cancel
    match session.create_timer(60_000, 0) {
        Ok(id) => {
            t.check("timer create + cancel", session.cancel_timer(id).is_ok(), "cancel failed");
            // C8: cancelling twice reports not found
            t.check(
                "double cancel -> not_found",
                matches!(
                    session.cancel_timer(id),
                    Err(evdeck::EngineError::EventFailed(ErrorCode::NotFound))
                ),
                "second cancel did not fail",
            );
        }
        Err(e) => t.fail("timer create + cancel", &format!("{}", e)),
    }
}

// ════════════════════════════════════════════════════════════
// Part D: Workflows
// ════════════════════════════════════════════════════════════

fn diamond(route: Vec<u8>, types: [u32; 4]) -> WorkflowDefinition {
    WorkflowDefinition {
        name: "diamond".into(),
        route,
        nodes: vec![
            NodeTemplate::new(types[0]),
            NodeTemplate::new(types[1]).depends_on(&[0]),
            NodeTemplate::new(types[2]).depends_on(&[0]),
            NodeTemplate::new(types[3]).depends_on(&[1, 2]),
        ],
    }
}

fn test_workflows(t: &mut TestRunner) {
    t.section("Part D: Workflows (dependency graphs)");

    let ran: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&ran);

    let kernel = Kernel::builder()
        .config(small_config())
        .deck(FnDeck::new(5, "recorder", move |ev, _| {
            log.lock().unwrap().push(ev.event_type);
            if ev.event_type == 99 {
                Outcome::error(ErrorCode::InvalidParameter, "poison node")
            } else {
                Outcome::Terminal(ResultPayload::Value(ev.event_type as u64))
            }
        }))
        .build()
        .unwrap();

    // D1: diamond completes through the recorder deck
    let id = kernel.register_workflow(diamond(vec![5], [10, 11, 12, 13])).unwrap();
    let instance = kernel.start_workflow(id).unwrap();
    let status = kernel.workflow_status(instance).unwrap();
    t.check(
        "diamond all nodes succeed",
        status == InstanceStatus::AllSucceeded,
        &format!("{:?}", status),
    );

    // D2: source first, join last
    let seen = ran.lock().unwrap().clone();
    t.check(
        "join runs after both branches",
        seen.len() == 4 && seen[0] == 10 && seen[3] == 13,
        &format!("{:?}", seen),
    );

    // D3: cycles are rejected at registration
    let cyclic = WorkflowDefinition {
        name: "cycle".into(),
        route: vec![5],
        nodes: vec![
            NodeTemplate::new(1).depends_on(&[1]),
            NodeTemplate::new(2).depends_on(&[0]),
        ],
    };
    t.check(
        "cycle rejected",
        kernel.register_workflow(cyclic).is_err(),
        "register accepted a cycle",
    );

    // D4: out-of-range dependency rejected
    let dangling = WorkflowDefinition {
        name: "dangling".into(),
        route: vec![5],
        nodes: vec![NodeTemplate::new(1).depends_on(&[4])],
    };
    t.check(
        "dangling dependency rejected",
        kernel.register_workflow(dangling).is_err(),
        "register accepted bad dep",
    );

    // D5: a failed branch blocks the join for good
    ran.lock().unwrap().clear();
    let id = kernel.register_workflow(diamond(vec![5], [20, 99, 22, 23])).unwrap();
    let instance = kernel.start_workflow(id).unwrap();
    let status = kernel.workflow_status(instance).unwrap();
    let seen = ran.lock().unwrap().clone();
    t.check(
        "failed branch -> partial, join never ran",
        status == InstanceStatus::Partial && !seen.contains(&23),
        &format!("{:?} ran={:?}", status, seen),
    );

    t.check(
        "workflow entries drained",
        kernel.stats().entries_live == 0,
        &format!("{} live", kernel.stats().entries_live),
    );
}

// ════════════════════════════════════════════════════════════
// Part E: Isolation
// ════════════════════════════════════════════════════════════

fn test_isolation(t: &mut TestRunner) {
    t.section("Part E: Isolation (mixed batches, teardown)");

    let kernel = Kernel::builder().config(small_config()).build().unwrap();
    let pid = ProcessId(1);
    let user = kernel.attach_process(pid).unwrap();

    // E1: one bad event in a batch doesn't poison the rest
    for i in 0..6u64 {
        let mut ev = Event::new(event_type::EXECUTE, prefix::EXECUTION);
        if i == 2 {
            ev.set_route(&[9]);
        }
        user.push_request(&ev);
    }
    kernel.notify(pid, 0, flags::SUBMIT).unwrap();
    let mut ok = 0;
    let mut failed = 0;
    while let Some(resp) = user.pop_response() {
        if resp.is_ok() { ok += 1 } else { failed += 1 }
    }
    t.check(
        &format!("batch of 6: {} ok, {} failed", ok, failed),
        ok == 5 && failed == 1,
        "responses off",
    );

    // E2: stats agree
    let stats = kernel.stats();
    t.check(
        "stats account for the batch",
        stats.events_submitted == 6
            && stats.events_completed == 5
            && stats.events_errored == 1
            && stats.responses_pushed == 6,
        &format!("{:?}", stats),
    );

    // E3: exit retires a parked entry
    let mut ev = Event::new(event_type::TIMER_SLEEP, prefix::HARDWARE);
    evdeck::requests::encode_timer_sleep(&mut ev.data, 200);
    user.push_request(&ev);
    kernel.notify(pid, 0, flags::SUBMIT).unwrap();
    kernel.notify(pid, 0, flags::EXIT).unwrap();
    t.check(
        "exit retires the parked entry",
        kernel.stats().entries_live == 0,
        &format!("{} live", kernel.stats().entries_live),
    );

    // E4: the orphaned timer wakes nobody
    t.check(
        "late fire hits a stale handle",
        kernel.tick_at(clock::now_ms() + 5_000) == 0,
        "stale wakeup resumed",
    );

    // E5: the pid can come back
    t.check(
        "pid reattaches after exit",
        kernel.attach_process(pid).is_ok(),
        "reattach failed",
    );
}

// ════════════════════════════════════════════════════════════

fn main() {
    println!("=== evdeck End-to-End Smoke Test ===");
    set_log_level(LogLevel::Warn);

    let mut t = TestRunner::new();

    test_transport(&mut t);
    test_routing(&mut t);
    test_hardware(&mut t);
    test_workflows(&mut t);
    test_isolation(&mut t);

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
