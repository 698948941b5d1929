//! Console backend abstraction for the hardware deck.
//!
//! The deck validates and decodes console events; a `ConsoleBackend`
//! performs the actual terminal work, so tests substitute a recording
//! fake and the deck logic stays deterministic.
//!
//! # Implementors
//!
//! - [`StdConsole`] (default): renders to the process stdout/stdin.
//!   Attribute bytes are translated from VGA color pairs to ANSI SGR
//!   sequences; the cursor position is tracked, not queried from the
//!   terminal.

use std::io::{BufRead, Read, Write};
use std::sync::Mutex;

use evdeck_core::vga;

/// Terminal operations behind the hardware deck's console events.
///
/// **Contract:** `write`, `clear`, `set_pos` and `get_pos` must not
/// block. `read_line` and `read_char` may block until input arrives;
/// the deck dispatches them inline, so interactive routes stall their
/// caller exactly as a blocking console read should.
pub trait ConsoleBackend: Send + Sync {
    /// Render `text` with the VGA-style attribute byte `attr`
    /// (see [`vga::attr`]). `text` contains no interior NUL.
    fn write(&self, text: &[u8], attr: u8);

    /// Read one line, up to `max` bytes, without the trailing newline.
    fn read_line(&self, max: usize) -> Box<[u8]>;

    /// Read one byte, or 0 when input is closed.
    fn read_char(&self) -> u8;

    /// Erase the screen and home the cursor.
    fn clear(&self);

    /// Move the cursor to column `x`, row `y`.
    fn set_pos(&self, x: u32, y: u32);

    /// Current cursor position as `(x, y)`.
    fn get_pos(&self) -> (u32, u32);
}

/// ANSI foreground codes indexed by VGA color (0-15).
const ANSI_FG: [u8; 16] = [30, 34, 32, 36, 31, 35, 33, 37, 90, 94, 92, 96, 91, 95, 93, 97];

/// Host console over stdout/stdin.
pub struct StdConsole {
    /// Tracked cursor position (column, row).
    pos: Mutex<(u32, u32)>,
}

impl StdConsole {
    pub fn new() -> Self {
        Self { pos: Mutex::new((0, 0)) }
    }

    fn advance(&self, text: &[u8]) {
        let mut pos = self.pos.lock().unwrap();
        for &b in text {
            if b == b'\n' {
                pos.0 = 0;
                pos.1 += 1;
            } else {
                pos.0 += 1;
            }
        }
    }
}

impl Default for StdConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleBackend for StdConsole {
    fn write(&self, text: &[u8], attr: u8) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        if attr == vga::DEFAULT {
            let _ = out.write_all(text);
        } else {
            let fg = ANSI_FG[(attr & 0x0F) as usize];
            let bg = ANSI_FG[(attr >> 4) as usize] + 10;
            let _ = write!(out, "\x1b[{};{}m", fg, bg);
            let _ = out.write_all(text);
            let _ = out.write_all(b"\x1b[0m");
        }
        let _ = out.flush();
        self.advance(text);
    }

    fn read_line(&self, max: usize) -> Box<[u8]> {
        let stdin = std::io::stdin();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() {
            return Box::from(&[][..]);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        let n = trimmed.len().min(max);
        Box::from(trimmed.as_bytes()[..n].to_vec())
    }

    fn read_char(&self) -> u8 {
        let stdin = std::io::stdin();
        let mut byte = [0u8; 1];
        match stdin.lock().read(&mut byte) {
            Ok(1) => byte[0],
            _ => 0,
        }
    }

    fn clear(&self) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let _ = out.write_all(b"\x1b[2J\x1b[H");
        let _ = out.flush();
        *self.pos.lock().unwrap() = (0, 0);
    }

    fn set_pos(&self, x: u32, y: u32) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        // ANSI rows/columns are 1-based.
        let _ = write!(out, "\x1b[{};{}H", y + 1, x + 1);
        let _ = out.flush();
        *self.pos.lock().unwrap() = (x, y);
    }

    fn get_pos(&self) -> (u32, u32) {
        *self.pos.lock().unwrap()
    }
}
