//! Blocking client session over one kernel channel.
//!
//! A `Session` owns a process id, its channel endpoint, and a handle to
//! the kernel. Every call follows the same shape: encode an event, push
//! it, notify with SUBMIT|WAIT, pop the response. Calls are strictly
//! serial, so requests and responses pair one to one.

use std::sync::Arc;

use evdeck_core::requests::{
    encode_console_read_line, encode_console_set_pos, encode_console_write,
    encode_console_write_attr, encode_timer_cancel, encode_timer_create, encode_timer_sleep,
};
use evdeck_core::{
    event_type, flags, prefix, EngineError, Event, ProcessId, Response, Result, TimerId,
    DEFAULT_USER,
};
use evdeck_runtime::channel::take_transferred;
use evdeck_runtime::{Kernel, UserEndpoint};

pub struct Session {
    kernel: Arc<Kernel>,
    pid: ProcessId,
    endpoint: UserEndpoint,
}

impl Session {
    /// Attach `pid` to the kernel and wrap its endpoint.
    pub fn attach(kernel: &Arc<Kernel>, pid: ProcessId) -> Result<Self> {
        let endpoint = kernel.attach_process(pid)?;
        Ok(Self { kernel: Arc::clone(kernel), pid, endpoint })
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// Submit one event and block until its response arrives. The
    /// kernel assigns the event id; the session owns the user id.
    pub fn execute(&self, mut event: Event) -> Result<Response> {
        event.id = 0;
        event.user_id = DEFAULT_USER;
        if !self.endpoint.push_request(&event) {
            return Err(EngineError::RingFull);
        }
        self.kernel
            .notify(self.pid, DEFAULT_USER, flags::SUBMIT | flags::WAIT)?;
        self.endpoint
            .pop_response()
            .ok_or(EngineError::CorruptEntry("response missing after wait"))
    }

    /// Count responses already waiting on the ring.
    pub fn poll(&self) -> Result<u64> {
        self.kernel.notify(self.pid, DEFAULT_USER, flags::POLL)
    }

    fn execute_ok(&self, event: Event) -> Result<Response> {
        let resp = self.execute(event)?;
        match resp.error() {
            Some(code) => Err(EngineError::EventFailed(code)),
            None => Ok(resp),
        }
    }

    // ============================================================
    // Console
    // ============================================================

    /// Write `text` to the console. Truncated to the event data area.
    pub fn print(&self, text: &str) -> Result<()> {
        let mut event = Event::new(event_type::CONSOLE_WRITE, prefix::HARDWARE);
        encode_console_write(&mut event.data, text.as_bytes());
        self.execute_ok(event).map(|_| ())
    }

    /// Write `text` with a VGA-style color attribute (see [`vga`]).
    ///
    /// [`vga`]: evdeck_core::vga
    pub fn print_attr(&self, text: &str, attr: u8) -> Result<()> {
        let mut event = Event::new(event_type::CONSOLE_WRITE_ATTR, prefix::HARDWARE);
        encode_console_write_attr(&mut event.data, text.as_bytes(), attr);
        self.execute_ok(event).map(|_| ())
    }

    /// Read one line, at most `max` bytes including the terminator.
    pub fn read_line(&self, max: u32) -> Result<String> {
        let mut event = Event::new(event_type::CONSOLE_READ_LINE, prefix::HARDWARE);
        encode_console_read_line(&mut event.data, max);
        let resp = self.execute_ok(event)?;
        let line = unsafe { take_transferred(&resp) }.unwrap_or_default();
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    pub fn read_char(&self) -> Result<u8> {
        let resp =
            self.execute_ok(Event::new(event_type::CONSOLE_READ_CHAR, prefix::HARDWARE))?;
        Ok(resp.value().unwrap_or(0) as u8)
    }

    pub fn clear(&self) -> Result<()> {
        self.execute_ok(Event::new(event_type::CONSOLE_CLEAR, prefix::HARDWARE))
            .map(|_| ())
    }

    pub fn set_pos(&self, x: u32, y: u32) -> Result<()> {
        let mut event = Event::new(event_type::CONSOLE_SET_POS, prefix::HARDWARE);
        encode_console_set_pos(&mut event.data, x, y);
        self.execute_ok(event).map(|_| ())
    }

    pub fn get_pos(&self) -> Result<(u32, u32)> {
        let resp =
            self.execute_ok(Event::new(event_type::CONSOLE_GET_POS, prefix::HARDWARE))?;
        let v = resp.value().unwrap_or(0);
        Ok(((v & 0xFFFF) as u32, ((v >> 16) & 0xFFFF) as u32))
    }

    // ============================================================
    // Timers
    // ============================================================

    /// Block for `ms` milliseconds through the hardware deck. The entry
    /// suspends kernel-side; the wait loop's ticks fire the timer.
    pub fn sleep_ms(&self, ms: u64) -> Result<()> {
        let mut event = Event::new(event_type::TIMER_SLEEP, prefix::HARDWARE);
        encode_timer_sleep(&mut event.data, ms);
        self.execute_ok(event).map(|_| ())
    }

    pub fn get_ticks(&self) -> Result<u64> {
        let resp =
            self.execute_ok(Event::new(event_type::TIMER_GETTICKS, prefix::HARDWARE))?;
        Ok(resp.value().unwrap_or(0))
    }

    /// Create a standalone timer. `interval_ms` of 0 means one-shot.
    pub fn create_timer(&self, delay_ms: u64, interval_ms: u64) -> Result<TimerId> {
        let mut event = Event::new(event_type::TIMER_CREATE, prefix::HARDWARE);
        encode_timer_create(&mut event.data, delay_ms, interval_ms);
        let resp = self.execute_ok(event)?;
        Ok(TimerId(resp.value().unwrap_or(0)))
    }

    pub fn cancel_timer(&self, id: TimerId) -> Result<()> {
        let mut event = Event::new(event_type::TIMER_CANCEL, prefix::HARDWARE);
        encode_timer_cancel(&mut event.data, id.0);
        self.execute_ok(event).map(|_| ())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.kernel.notify(self.pid, 0, flags::EXIT);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use evdeck_core::{vga, ErrorCode};
    use evdeck_runtime::{ConsoleBackend, KernelConfig};

    struct RecordingConsole {
        writes: Mutex<Vec<(Vec<u8>, u8)>>,
        line: Vec<u8>,
    }

    impl RecordingConsole {
        fn new(line: &[u8]) -> Self {
            Self { writes: Mutex::new(Vec::new()), line: line.to_vec() }
        }
    }

    impl ConsoleBackend for RecordingConsole {
        fn write(&self, text: &[u8], attr: u8) {
            self.writes.lock().unwrap().push((text.to_vec(), attr));
        }
        fn read_line(&self, max: usize) -> Box<[u8]> {
            self.line[..self.line.len().min(max)].to_vec().into_boxed_slice()
        }
        fn read_char(&self) -> u8 {
            b'q'
        }
        fn clear(&self) {}
        fn set_pos(&self, _x: u32, _y: u32) {}
        fn get_pos(&self) -> (u32, u32) {
            (7, 3)
        }
    }

    fn test_kernel(line: &[u8]) -> (Arc<Kernel>, Arc<RecordingConsole>) {
        let console = Arc::new(RecordingConsole::new(line));
        let backend = Arc::clone(&console);
        let kernel = Kernel::builder()
            .config(KernelConfig::new().ring_capacity(16).max_entries(64))
            .console(Box::new(ArcConsole(backend)))
            .build()
            .unwrap();
        (kernel, console)
    }

    // Lets the test keep a handle to the console the kernel owns.
    struct ArcConsole(Arc<RecordingConsole>);

    impl ConsoleBackend for ArcConsole {
        fn write(&self, text: &[u8], attr: u8) {
            self.0.write(text, attr)
        }
        fn read_line(&self, max: usize) -> Box<[u8]> {
            self.0.read_line(max)
        }
        fn read_char(&self) -> u8 {
            self.0.read_char()
        }
        fn clear(&self) {
            self.0.clear()
        }
        fn set_pos(&self, x: u32, y: u32) {
            self.0.set_pos(x, y)
        }
        fn get_pos(&self) -> (u32, u32) {
            self.0.get_pos()
        }
    }

    #[test]
    fn test_print_reaches_console() {
        let (kernel, console) = test_kernel(b"");
        let session = Session::attach(&kernel, ProcessId(1)).unwrap();

        session.print("hello").unwrap();
        session.print_attr("red", vga::ERROR).unwrap();

        let writes = console.writes.lock().unwrap();
        assert_eq!(writes[0].0, b"hello");
        assert_eq!(writes[1], (b"red".to_vec(), vga::ERROR));
    }

    #[test]
    fn test_read_line_returns_transferred_text() {
        let (kernel, _console) = test_kernel(b"typed input");
        let session = Session::attach(&kernel, ProcessId(1)).unwrap();

        assert_eq!(session.read_line(64).unwrap(), "typed input");
        assert_eq!(session.read_char().unwrap(), b'q');
    }

    #[test]
    fn test_cursor_round_trip() {
        let (kernel, _console) = test_kernel(b"");
        let session = Session::attach(&kernel, ProcessId(1)).unwrap();

        session.set_pos(2, 5).unwrap();
        assert_eq!(session.get_pos().unwrap(), (7, 3));
    }

    #[test]
    fn test_sleep_blocks_until_wakeup() {
        let (kernel, _console) = test_kernel(b"");
        let session = Session::attach(&kernel, ProcessId(1)).unwrap();

        let before = session.get_ticks().unwrap();
        session.sleep_ms(5).unwrap();
        let after = session.get_ticks().unwrap();
        assert!(after >= before + 5);
    }

    #[test]
    fn test_timer_create_and_cancel() {
        let (kernel, _console) = test_kernel(b"");
        let session = Session::attach(&kernel, ProcessId(1)).unwrap();

        let id = session.create_timer(10_000, 0).unwrap();
        assert_ne!(id.0, 0);
        session.cancel_timer(id).unwrap();
        assert!(matches!(
            session.cancel_timer(id),
            Err(EngineError::EventFailed(ErrorCode::NotFound))
        ));
    }

    #[test]
    fn test_rejected_request_surfaces_wire_code() {
        let (kernel, _console) = test_kernel(b"");
        let session = Session::attach(&kernel, ProcessId(1)).unwrap();

        // Past the one-hour delay limit.
        let result = session.create_timer(4_000_000, 0);
        assert!(matches!(
            result,
            Err(EngineError::EventFailed(ErrorCode::InvalidParameter))
        ));
    }

    #[test]
    fn test_drop_detaches_pid() {
        let (kernel, _console) = test_kernel(b"");
        {
            let _session = Session::attach(&kernel, ProcessId(9)).unwrap();
        }
        // The pid is free again once the session is gone.
        let again = Session::attach(&kernel, ProcessId(9));
        assert!(again.is_ok());
    }
}
