//! Basic evdeck example
//!
//! Builds a kernel, attaches a session, and drives the stock decks:
//! console writes, a blocking sleep, a timer, and a diamond workflow.
//!
//! # Environment Variables
//!
//! - `EVD_FLUSH_EPRINT=1` - Flush engine log output immediately
//! - `EVD_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `EVD_RING_CAPACITY=256` - Slots per transport ring
//!
// EVD_LOG_LEVEL=debug EVD_FLUSH_EPRINT=1 cargo run -p evdeck-basic

use evdeck::{
    kinfo, prefix, vga, InstanceStatus, Kernel, NodeTemplate, ProcessId, Result, Session,
    WorkflowDefinition,
};

fn main() -> Result<()> {
    println!("=== evdeck Basic Example ===\n");

    let kernel = Kernel::builder().build()?;
    let session = Session::attach(&kernel, ProcessId(1))?;

    // Console ops route through the hardware deck and terminate on the
    // execution deck.
    session.print("Hello from the event deck!\n")?;
    session.print_attr("This line went through CONSOLE_WRITE_ATTR.\n", vga::SUCCESS)?;

    let before = session.get_ticks()?;
    kinfo!("Sleeping 100 ms through the timer deck");
    session.sleep_ms(100)?;
    let after = session.get_ticks()?;
    session.print(&format!("Slept {} ms (asked for 100)\n", after - before))?;

    // A standalone timer: created, then cancelled before it fires.
    let timer = session.create_timer(5_000, 0)?;
    session.print(&format!("Created timer {}, cancelling it\n", timer.0))?;
    session.cancel_timer(timer)?;

    // A diamond of EXECUTE nodes: 0 -> {1, 2} -> 3.
    let workflow = kernel.register_workflow(WorkflowDefinition {
        name: "diamond".into(),
        route: vec![prefix::EXECUTION],
        nodes: vec![
            NodeTemplate::new(0),
            NodeTemplate::new(0).depends_on(&[0]),
            NodeTemplate::new(0).depends_on(&[0]),
            NodeTemplate::new(0).depends_on(&[1, 2]),
        ],
    })?;
    let instance = kernel.start_workflow(workflow)?;
    let status = kernel.workflow_status(instance)?;
    session.print(&format!("Workflow instance {} finished: {:?}\n", instance.0, status))?;
    assert_eq!(status, InstanceStatus::AllSucceeded);

    let stats = kernel.stats();
    println!("\n--- Engine stats ---");
    println!("  submitted:  {}", stats.events_submitted);
    println!("  completed:  {}", stats.events_completed);
    println!("  errored:    {}", stats.events_errored);
    println!("  suspended:  {}", stats.suspensions);
    println!("  wakeups:    {}", stats.wakeups);
    println!("  live:       {}", stats.entries_live);

    println!("\nDone.");
    Ok(())
}
