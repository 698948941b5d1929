//! The hardware deck — timers, console, and stub device operations.
//!
//! Owns event types 40-79: devices 40-49, timers 50-59, console 70-79.
//! Payload validation lives in [`HardwareRequest::decode`]; this deck
//! only acts on well-formed requests. The sleep path is the engine's one
//! built-in suspension: the entry is parked against a one-shot timer and
//! woken from [`Deck::sweep`].

use std::sync::atomic::{AtomicU64, Ordering};

use evdeck_core::{
    kdebug, prefix, Deck, EntryHandle, ErrorCode, Event, HardwareRequest, Outcome, ResultPayload,
    Wakeup,
};

use crate::clock;
use crate::decks::console::{ConsoleBackend, StdConsole};
use crate::timer::{TimerStats, TimerTable};

/// Stub device layer: every open yields this handle.
const STUB_DEVICE_HANDLE: u64 = 100;

pub struct HardwareDeck {
    timers: TimerTable,
    console: Box<dyn ConsoleBackend>,
    sleeps_started: AtomicU64,
}

impl HardwareDeck {
    /// Deck with the host stdout/stdin console.
    pub fn new() -> Self {
        Self::with_console(Box::new(StdConsole::new()))
    }

    pub fn with_console(console: Box<dyn ConsoleBackend>) -> Self {
        Self {
            timers: TimerTable::new(),
            console,
            sleeps_started: AtomicU64::new(0),
        }
    }

    pub fn timer_stats(&self) -> TimerStats {
        self.timers.stats()
    }

    /// Write `text` up to its first interior NUL, completing with the
    /// declared size either way.
    fn console_write(&self, text: &[u8], attr: u8) -> Outcome {
        let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
        self.console.write(&text[..end], attr);
        Outcome::Complete(ResultPayload::Value(text.len() as u64))
    }
}

impl Default for HardwareDeck {
    fn default() -> Self {
        Self::new()
    }
}

impl Deck for HardwareDeck {
    fn prefix(&self) -> u8 {
        prefix::HARDWARE
    }

    fn name(&self) -> &'static str {
        "hardware"
    }

    fn process(&self, event: &Event, handle: EntryHandle) -> Outcome {
        let request = match HardwareRequest::decode(event) {
            Ok(request) => request,
            Err(e) => return Outcome::error(e.code, e.message),
        };

        match request {
            HardwareRequest::TimerCreate { delay_ms, interval_ms } => {
                match self.timers.create(clock::now_ms(), delay_ms, interval_ms, None) {
                    Ok(id) => {
                        kdebug!("Timer {} armed ({}ms, interval {}ms)", id.0, delay_ms, interval_ms);
                        Outcome::Complete(ResultPayload::Value(id.0))
                    }
                    Err(e) => Outcome::error(e.wire_code(), "no free timer slots"),
                }
            }

            HardwareRequest::TimerCancel { timer_id } => {
                if self.timers.cancel(evdeck_core::TimerId(timer_id)) {
                    Outcome::Complete(ResultPayload::None)
                } else {
                    Outcome::error(ErrorCode::NotFound, "timer not found")
                }
            }

            HardwareRequest::TimerSleep { ms } => {
                // One-shot timer linked to this entry; the sweep wakes it.
                match self.timers.create(clock::now_ms(), ms, 0, Some(handle)) {
                    Ok(id) => {
                        self.sleeps_started.fetch_add(1, Ordering::Relaxed);
                        kdebug!("Event {} sleeping {}ms (timer {})", event.id, ms, id.0);
                        Outcome::Suspended
                    }
                    Err(e) => Outcome::error(e.wire_code(), "no free timer slots"),
                }
            }

            HardwareRequest::TimerGetTicks => {
                Outcome::Complete(ResultPayload::Value(clock::now_ms()))
            }

            HardwareRequest::DevOpen { name } => {
                kdebug!("Device open '{}' (stub)", String::from_utf8_lossy(name));
                Outcome::Complete(ResultPayload::Value(STUB_DEVICE_HANDLE))
            }

            HardwareRequest::DevIoctl { device_id, command, .. } => {
                kdebug!("Device {} ioctl cmd={} (stub)", device_id, command);
                Outcome::Complete(ResultPayload::None)
            }

            HardwareRequest::DevRead { device_id, size } => {
                kdebug!("Device {} read {}B (stub)", device_id, size);
                Outcome::Complete(ResultPayload::None)
            }

            HardwareRequest::DevWrite { device_id, size, .. } => {
                kdebug!("Device {} write {}B (stub)", device_id, size);
                Outcome::Complete(ResultPayload::None)
            }

            HardwareRequest::ConsoleWrite { text } => self.console_write(text, evdeck_core::vga::DEFAULT),

            HardwareRequest::ConsoleWriteAttr { attr, text } => self.console_write(text, attr),

            HardwareRequest::ConsoleReadLine { max } => {
                // max is already clamped to 1..=256; one byte is reserved
                // the way a terminating NUL would be.
                let line = self.console.read_line(max as usize - 1);
                Outcome::Complete(ResultPayload::Transferred(line))
            }

            HardwareRequest::ConsoleReadChar => {
                Outcome::Complete(ResultPayload::Value(self.console.read_char() as u64))
            }

            HardwareRequest::ConsoleClear => {
                self.console.clear();
                Outcome::Complete(ResultPayload::None)
            }

            HardwareRequest::ConsoleSetPos { x, y } => {
                self.console.set_pos(x, y);
                Outcome::Complete(ResultPayload::None)
            }

            HardwareRequest::ConsoleGetPos => {
                let (x, y) = self.console.get_pos();
                Outcome::Complete(ResultPayload::Value(((y as u64) << 16) | x as u64))
            }
        }
    }

    fn sweep(&self, now_ms: u64) -> Vec<Wakeup> {
        self.timers
            .check_expired(now_ms)
            .into_iter()
            .filter_map(|fired| {
                fired.entry.map(|handle| Wakeup {
                    handle,
                    outcome: Outcome::Complete(ResultPayload::None),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use evdeck_core::requests::{
        encode_console_read_line, encode_console_set_pos, encode_console_write,
        encode_console_write_attr, encode_timer_cancel, encode_timer_create, encode_timer_sleep,
    };
    use evdeck_core::{event_type, vga};

    /// Recording backend: captures writes, serves canned input.
    struct FakeConsole {
        writes: Mutex<Vec<(Vec<u8>, u8)>>,
        line: Vec<u8>,
        cleared: Mutex<bool>,
        pos: Mutex<(u32, u32)>,
    }

    impl FakeConsole {
        fn new(line: &[u8]) -> Self {
            Self {
                writes: Mutex::new(Vec::new()),
                line: line.to_vec(),
                cleared: Mutex::new(false),
                pos: Mutex::new((0, 0)),
            }
        }
    }

    impl ConsoleBackend for FakeConsole {
        fn write(&self, text: &[u8], attr: u8) {
            self.writes.lock().unwrap().push((text.to_vec(), attr));
        }
        fn read_line(&self, max: usize) -> Box<[u8]> {
            let n = self.line.len().min(max);
            Box::from(self.line[..n].to_vec())
        }
        fn read_char(&self) -> u8 {
            *self.line.first().unwrap_or(&0)
        }
        fn clear(&self) {
            *self.cleared.lock().unwrap() = true;
        }
        fn set_pos(&self, x: u32, y: u32) {
            *self.pos.lock().unwrap() = (x, y);
        }
        fn get_pos(&self) -> (u32, u32) {
            *self.pos.lock().unwrap()
        }
    }

    fn deck_with(line: &[u8]) -> HardwareDeck {
        HardwareDeck::with_console(Box::new(FakeConsole::new(line)))
    }

    fn handle() -> EntryHandle {
        EntryHandle::new(0, 0)
    }

    #[test]
    fn test_rejects_type_outside_range() {
        let deck = deck_with(b"");
        let ev = Event::new(event_type::FILE_OPEN, prefix::HARDWARE);
        match deck.process(&ev, handle()) {
            Outcome::Error { code, message } => {
                assert_eq!(code, ErrorCode::InvalidParameter);
                assert!(message.contains("40-79"));
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_console_write_stops_at_nul_but_reports_declared_size() {
        let deck = deck_with(b"");
        let mut ev = Event::new(event_type::CONSOLE_WRITE, prefix::HARDWARE);
        encode_console_write(&mut ev.data, b"ab\0cd");

        match deck.process(&ev, handle()) {
            Outcome::Complete(ResultPayload::Value(size)) => assert_eq!(size, 5),
            other => panic!("expected value, got {:?}", other),
        }
    }

    #[test]
    fn test_console_write_attr_passes_attribute() {
        let deck = deck_with(b"");
        let mut ev = Event::new(event_type::CONSOLE_WRITE_ATTR, prefix::HARDWARE);
        let attr = vga::attr(vga::RED, vga::BLACK);
        encode_console_write_attr(&mut ev.data, b"boom", attr);

        assert!(matches!(
            deck.process(&ev, handle()),
            Outcome::Complete(ResultPayload::Value(4))
        ));
    }

    #[test]
    fn test_read_line_transfers_ownership() {
        let deck = deck_with(b"hello shell");
        let mut ev = Event::new(event_type::CONSOLE_READ_LINE, prefix::HARDWARE);
        encode_console_read_line(&mut ev.data, 64);

        match deck.process(&ev, handle()) {
            Outcome::Complete(ResultPayload::Transferred(line)) => {
                assert_eq!(&line[..], b"hello shell");
            }
            other => panic!("expected transferred, got {:?}", other),
        }
    }

    #[test]
    fn test_read_line_caps_below_max() {
        let deck = deck_with(&[b'x'; 300]);
        let mut ev = Event::new(event_type::CONSOLE_READ_LINE, prefix::HARDWARE);
        encode_console_read_line(&mut ev.data, 0); // clamps to 256

        match deck.process(&ev, handle()) {
            Outcome::Complete(ResultPayload::Transferred(line)) => assert_eq!(line.len(), 255),
            other => panic!("expected transferred, got {:?}", other),
        }
    }

    #[test]
    fn test_get_pos_packs_row_and_column() {
        let deck = deck_with(b"");
        let mut set = Event::new(event_type::CONSOLE_SET_POS, prefix::HARDWARE);
        encode_console_set_pos(&mut set.data, 7, 3);
        assert!(matches!(
            deck.process(&set, handle()),
            Outcome::Complete(ResultPayload::None)
        ));

        let get = Event::new(event_type::CONSOLE_GET_POS, prefix::HARDWARE);
        match deck.process(&get, handle()) {
            Outcome::Complete(ResultPayload::Value(packed)) => {
                assert_eq!(packed, (3 << 16) | 7);
            }
            other => panic!("expected value, got {:?}", other),
        }
    }

    #[test]
    fn test_timer_create_returns_id() {
        let deck = deck_with(b"");
        let mut ev = Event::new(event_type::TIMER_CREATE, prefix::HARDWARE);
        encode_timer_create(&mut ev.data, 500, 0);

        match deck.process(&ev, handle()) {
            Outcome::Complete(ResultPayload::Value(id)) => assert!(id >= 1),
            other => panic!("expected value, got {:?}", other),
        }
    }

    #[test]
    fn test_timer_cancel_unknown_is_not_found() {
        let deck = deck_with(b"");
        let mut ev = Event::new(event_type::TIMER_CANCEL, prefix::HARDWARE);
        encode_timer_cancel(&mut ev.data, 42);

        match deck.process(&ev, handle()) {
            Outcome::Error { code, .. } => assert_eq!(code, ErrorCode::NotFound),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_sleep_suspends_and_sweep_wakes() {
        let deck = deck_with(b"");
        let parked = EntryHandle::new(9, 1);
        let mut ev = Event::new(event_type::TIMER_SLEEP, prefix::HARDWARE);
        encode_timer_sleep(&mut ev.data, 1);

        assert!(matches!(deck.process(&ev, parked), Outcome::Suspended));
        assert_eq!(deck.timer_stats().active, 1);

        // Sweep far in the future; the parked handle is surrendered.
        let wakeups = deck.sweep(clock::now_ms() + 10);
        assert_eq!(wakeups.len(), 1);
        assert_eq!(wakeups[0].handle, parked);
        assert!(matches!(
            wakeups[0].outcome,
            Outcome::Complete(ResultPayload::None)
        ));
        assert_eq!(deck.timer_stats().active, 0);
    }

    #[test]
    fn test_standalone_timer_never_produces_wakeups() {
        let deck = deck_with(b"");
        let mut ev = Event::new(event_type::TIMER_CREATE, prefix::HARDWARE);
        encode_timer_create(&mut ev.data, 1, 0);
        deck.process(&ev, handle());

        let wakeups = deck.sweep(clock::now_ms() + 10);
        assert!(wakeups.is_empty());
        assert_eq!(deck.timer_stats().fired, 1);
    }

    #[test]
    fn test_dev_open_returns_stub_handle() {
        let deck = deck_with(b"");
        let mut ev = Event::new(event_type::DEV_OPEN, prefix::HARDWARE);
        ev.data[..5].copy_from_slice(b"tty0\0");

        assert!(matches!(
            deck.process(&ev, handle()),
            Outcome::Complete(ResultPayload::Value(STUB_DEVICE_HANDLE))
        ));
    }
}
