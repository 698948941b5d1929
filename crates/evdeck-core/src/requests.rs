//! Typed decode of hardware-deck payloads.
//!
//! Wire payloads are flat offset/length encodings (see [`event_type`]).
//! Rather than letting deck logic read raw offsets, the payload is decoded
//! exactly once at the deck boundary into a [`HardwareRequest`]; every
//! bounds and range check lives here, so the deck itself only ever sees a
//! well-formed request. Encoders for the same layouts sit alongside the
//! decoder and are what the client session and the tests build payloads
//! with.
//!
//! All multi-byte fields are little-endian.

use crate::error::ErrorCode;
use crate::event::{event_type, Event, EVENT_DATA_SIZE};

/// Upper bound for timer delays, intervals, and sleeps (one hour).
pub const MAX_TIMER_MS: u64 = 3_600_000;

/// Upper bound for device reads (1 MiB).
pub const MAX_DEV_READ: u64 = 1024 * 1024;

/// Longest console write in one event: `[size:4][bytes...]`.
pub const MAX_CONSOLE_WRITE: usize = EVENT_DATA_SIZE - 4;

/// Longest attributed console write in one event: `[attr:1][size:4][bytes...]`.
pub const MAX_CONSOLE_WRITE_ATTR: usize = EVENT_DATA_SIZE - 5;

/// Longest device write in one event: `[device_id:4][size:8][bytes...]`.
pub const MAX_DEV_WRITE: usize = EVENT_DATA_SIZE - 12;

/// Longest console line read; larger (or zero) requests clamp to this.
pub const MAX_READ_LINE: u32 = 256;

/// A payload rejected by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeError {
    pub code: ErrorCode,
    pub message: &'static str,
}

impl DecodeError {
    const fn invalid(message: &'static str) -> Self {
        Self { code: ErrorCode::InvalidParameter, message }
    }
}

/// One hardware-deck operation, decoded and validated.
#[derive(Debug, PartialEq, Eq)]
pub enum HardwareRequest<'a> {
    TimerCreate { delay_ms: u64, interval_ms: u64 },
    TimerCancel { timer_id: u64 },
    TimerSleep { ms: u64 },
    TimerGetTicks,
    DevOpen { name: &'a [u8] },
    DevIoctl { device_id: u32, command: u64, arg: &'a [u8] },
    DevRead { device_id: u32, size: u64 },
    DevWrite { device_id: u32, size: u64, data: &'a [u8] },
    ConsoleWrite { text: &'a [u8] },
    ConsoleWriteAttr { attr: u8, text: &'a [u8] },
    ConsoleReadLine { max: u32 },
    ConsoleReadChar,
    ConsoleClear,
    ConsoleSetPos { x: u32, y: u32 },
    ConsoleGetPos,
}

impl<'a> HardwareRequest<'a> {
    /// Decode and validate one event's payload.
    ///
    /// The type-range check runs before any payload byte is read; a type
    /// outside 40-79 never reaches the per-operation decoders.
    pub fn decode(event: &'a Event) -> Result<Self, DecodeError> {
        if !(event_type::HARDWARE_MIN..=event_type::HARDWARE_MAX).contains(&event.event_type) {
            return Err(DecodeError::invalid("event type out of hardware range (40-79)"));
        }
        let data = &event.data;

        match event.event_type {
            event_type::TIMER_CREATE => {
                let delay_ms = read_u64(data, 0);
                let interval_ms = read_u64(data, 8);
                if delay_ms == 0 {
                    return Err(DecodeError::invalid("timer delay is zero"));
                }
                if delay_ms > MAX_TIMER_MS {
                    return Err(DecodeError::invalid("timer delay exceeds one hour"));
                }
                if interval_ms > MAX_TIMER_MS {
                    return Err(DecodeError::invalid("timer interval exceeds one hour"));
                }
                Ok(Self::TimerCreate { delay_ms, interval_ms })
            }

            event_type::TIMER_CANCEL => {
                let timer_id = read_u64(data, 0);
                if timer_id == 0 {
                    return Err(DecodeError::invalid("timer id is zero"));
                }
                Ok(Self::TimerCancel { timer_id })
            }

            event_type::TIMER_SLEEP => {
                let ms = read_u64(data, 0);
                if ms == 0 {
                    return Err(DecodeError::invalid("sleep duration is zero"));
                }
                if ms > MAX_TIMER_MS {
                    return Err(DecodeError::invalid("sleep duration exceeds one hour"));
                }
                Ok(Self::TimerSleep { ms })
            }

            event_type::TIMER_GETTICKS => Ok(Self::TimerGetTicks),

            event_type::DEV_OPEN => {
                // NUL-terminated name in the first 64 bytes.
                if data[0] == 0 {
                    return Err(DecodeError::invalid("device name is empty"));
                }
                let nul = data[..64].iter().position(|&b| b == 0);
                match nul {
                    Some(n) => Ok(Self::DevOpen { name: &data[..n] }),
                    None => Err(DecodeError::invalid("device name exceeds 63 bytes")),
                }
            }

            event_type::DEV_IOCTL => {
                let device_id = read_i32(data, 0);
                if device_id < 0 {
                    return Err(DecodeError::invalid("device id is negative"));
                }
                let command = read_u64(data, 4);
                Ok(Self::DevIoctl {
                    device_id: device_id as u32,
                    command,
                    arg: &data[12..],
                })
            }

            event_type::DEV_READ => {
                let device_id = read_i32(data, 0);
                if device_id < 0 {
                    return Err(DecodeError::invalid("device id is negative"));
                }
                let size = read_u64(data, 4);
                if size == 0 {
                    return Err(DecodeError::invalid("device read size is zero"));
                }
                if size > MAX_DEV_READ {
                    return Err(DecodeError::invalid("device read size exceeds 1 MiB"));
                }
                Ok(Self::DevRead { device_id: device_id as u32, size })
            }

            event_type::DEV_WRITE => {
                let device_id = read_i32(data, 0);
                if device_id < 0 {
                    return Err(DecodeError::invalid("device id is negative"));
                }
                let size = read_u64(data, 4);
                if size == 0 {
                    return Err(DecodeError::invalid("device write size is zero"));
                }
                if size > MAX_DEV_WRITE as u64 {
                    return Err(DecodeError::invalid("device write exceeds event payload"));
                }
                Ok(Self::DevWrite {
                    device_id: device_id as u32,
                    size,
                    data: &data[12..12 + size as usize],
                })
            }

            event_type::CONSOLE_WRITE => {
                let size = read_u32(data, 0) as usize;
                if size == 0 || size > MAX_CONSOLE_WRITE {
                    return Err(DecodeError::invalid("console write size invalid"));
                }
                Ok(Self::ConsoleWrite { text: &data[4..4 + size] })
            }

            event_type::CONSOLE_WRITE_ATTR => {
                let attr = data[0];
                let size = read_u32(data, 1) as usize;
                if size == 0 || size > MAX_CONSOLE_WRITE_ATTR {
                    return Err(DecodeError::invalid("console write size invalid"));
                }
                Ok(Self::ConsoleWriteAttr { attr, text: &data[5..5 + size] })
            }

            event_type::CONSOLE_READ_LINE => {
                // Out-of-range maximums (including 0) clamp, they do not
                // reject; interactive callers always get a usable line.
                let mut max = read_u32(data, 0);
                if max == 0 || max > MAX_READ_LINE {
                    max = MAX_READ_LINE;
                }
                Ok(Self::ConsoleReadLine { max })
            }

            event_type::CONSOLE_READ_CHAR => Ok(Self::ConsoleReadChar),
            event_type::CONSOLE_CLEAR => Ok(Self::ConsoleClear),

            event_type::CONSOLE_SET_POS => Ok(Self::ConsoleSetPos {
                x: read_u32(data, 0),
                y: read_u32(data, 4),
            }),

            event_type::CONSOLE_GET_POS => Ok(Self::ConsoleGetPos),

            _ => Err(DecodeError {
                code: ErrorCode::NotImplemented,
                message: "hardware operation not implemented",
            }),
        }
    }
}

#[inline]
fn read_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

#[inline]
fn read_i32(data: &[u8], off: usize) -> i32 {
    read_u32(data, off) as i32
}

#[inline]
fn read_u64(data: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&data[off..off + 8]);
    u64::from_le_bytes(b)
}

// ── Payload encoders ──
//
// Silent clamping mirrors the client library: an oversized console write
// is truncated, never rejected, so text-producing callers need no length
// bookkeeping. Each encoder returns the payload length used.

pub fn encode_timer_create(data: &mut [u8; EVENT_DATA_SIZE], delay_ms: u64, interval_ms: u64) -> usize {
    data[0..8].copy_from_slice(&delay_ms.to_le_bytes());
    data[8..16].copy_from_slice(&interval_ms.to_le_bytes());
    16
}

pub fn encode_timer_cancel(data: &mut [u8; EVENT_DATA_SIZE], timer_id: u64) -> usize {
    data[0..8].copy_from_slice(&timer_id.to_le_bytes());
    8
}

pub fn encode_timer_sleep(data: &mut [u8; EVENT_DATA_SIZE], ms: u64) -> usize {
    data[0..8].copy_from_slice(&ms.to_le_bytes());
    8
}

pub fn encode_dev_open(data: &mut [u8; EVENT_DATA_SIZE], name: &[u8]) -> usize {
    let n = name.len().min(63);
    data[..n].copy_from_slice(&name[..n]);
    data[n] = 0;
    n + 1
}

pub fn encode_dev_ioctl(
    data: &mut [u8; EVENT_DATA_SIZE],
    device_id: u32,
    command: u64,
    arg: &[u8],
) -> usize {
    data[0..4].copy_from_slice(&device_id.to_le_bytes());
    data[4..12].copy_from_slice(&command.to_le_bytes());
    let n = arg.len().min(EVENT_DATA_SIZE - 12);
    data[12..12 + n].copy_from_slice(&arg[..n]);
    12 + n
}

pub fn encode_dev_read(data: &mut [u8; EVENT_DATA_SIZE], device_id: u32, size: u64) -> usize {
    data[0..4].copy_from_slice(&device_id.to_le_bytes());
    data[4..12].copy_from_slice(&size.to_le_bytes());
    12
}

pub fn encode_dev_write(data: &mut [u8; EVENT_DATA_SIZE], device_id: u32, payload: &[u8]) -> usize {
    let n = payload.len().min(MAX_DEV_WRITE);
    data[0..4].copy_from_slice(&device_id.to_le_bytes());
    data[4..12].copy_from_slice(&(n as u64).to_le_bytes());
    data[12..12 + n].copy_from_slice(&payload[..n]);
    12 + n
}

pub fn encode_console_write(data: &mut [u8; EVENT_DATA_SIZE], text: &[u8]) -> usize {
    let n = text.len().min(MAX_CONSOLE_WRITE);
    data[0..4].copy_from_slice(&(n as u32).to_le_bytes());
    data[4..4 + n].copy_from_slice(&text[..n]);
    4 + n
}

pub fn encode_console_write_attr(data: &mut [u8; EVENT_DATA_SIZE], text: &[u8], attr: u8) -> usize {
    let n = text.len().min(MAX_CONSOLE_WRITE_ATTR);
    data[0] = attr;
    data[1..5].copy_from_slice(&(n as u32).to_le_bytes());
    data[5..5 + n].copy_from_slice(&text[..n]);
    5 + n
}

pub fn encode_console_read_line(data: &mut [u8; EVENT_DATA_SIZE], max: u32) -> usize {
    data[0..4].copy_from_slice(&max.to_le_bytes());
    4
}

pub fn encode_console_set_pos(data: &mut [u8; EVENT_DATA_SIZE], x: u32, y: u32) -> usize {
    data[0..4].copy_from_slice(&x.to_le_bytes());
    data[4..8].copy_from_slice(&y.to_le_bytes());
    8
}

/// VGA text attributes: `(bg << 4) | fg`.
pub mod vga {
    pub const BLACK: u8 = 0x0;
    pub const BLUE: u8 = 0x1;
    pub const GREEN: u8 = 0x2;
    pub const CYAN: u8 = 0x3;
    pub const RED: u8 = 0x4;
    pub const MAGENTA: u8 = 0x5;
    pub const BROWN: u8 = 0x6;
    pub const LIGHT_GRAY: u8 = 0x7;
    pub const DARK_GRAY: u8 = 0x8;
    pub const LIGHT_BLUE: u8 = 0x9;
    pub const LIGHT_GREEN: u8 = 0xA;
    pub const LIGHT_CYAN: u8 = 0xB;
    pub const LIGHT_RED: u8 = 0xC;
    pub const LIGHT_MAGENTA: u8 = 0xD;
    pub const YELLOW: u8 = 0xE;
    pub const WHITE: u8 = 0xF;

    #[inline]
    pub const fn attr(fg: u8, bg: u8) -> u8 {
        (bg << 4) | fg
    }

    pub const DEFAULT: u8 = attr(LIGHT_GRAY, BLACK);
    pub const ERROR: u8 = attr(LIGHT_RED, BLACK);
    pub const SUCCESS: u8 = attr(LIGHT_GREEN, BLACK);
    pub const WARNING: u8 = attr(YELLOW, BLACK);
    pub const INPUT: u8 = attr(WHITE, BLACK);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::prefix;

    fn hw_event(event_type: u32) -> Event {
        Event::new(event_type, prefix::HARDWARE)
    }

    fn decode_err(ev: &Event) -> DecodeError {
        match HardwareRequest::decode(ev) {
            Err(e) => e,
            Ok(req) => panic!("expected decode error, got {:?}", req),
        }
    }

    #[test]
    fn test_out_of_range_checked_first() {
        // A storage type with a payload that would decode fine as a timer.
        let mut data = [0u8; EVENT_DATA_SIZE];
        encode_timer_sleep(&mut data, 100);
        let ev = Event::new(event_type::FILE_READ, prefix::HARDWARE).with_payload(&data);
        let err = decode_err(&ev);
        assert_eq!(err.code, ErrorCode::InvalidParameter);
        assert!(err.message.contains("40-79"));
    }

    #[test]
    fn test_unknown_in_range_is_not_implemented() {
        let ev = hw_event(69);
        assert_eq!(decode_err(&ev).code, ErrorCode::NotImplemented);
    }

    #[test]
    fn test_timer_create_bounds() {
        let mut data = [0u8; EVENT_DATA_SIZE];
        encode_timer_create(&mut data, 500, 1000);
        let ev = hw_event(event_type::TIMER_CREATE).with_payload(&data);
        assert_eq!(
            HardwareRequest::decode(&ev),
            Ok(HardwareRequest::TimerCreate { delay_ms: 500, interval_ms: 1000 })
        );

        encode_timer_create(&mut data, 0, 0);
        let ev = hw_event(event_type::TIMER_CREATE).with_payload(&data);
        assert_eq!(decode_err(&ev).message, "timer delay is zero");

        encode_timer_create(&mut data, MAX_TIMER_MS + 1, 0);
        let ev = hw_event(event_type::TIMER_CREATE).with_payload(&data);
        assert_eq!(decode_err(&ev).message, "timer delay exceeds one hour");

        encode_timer_create(&mut data, 100, MAX_TIMER_MS + 1);
        let ev = hw_event(event_type::TIMER_CREATE).with_payload(&data);
        assert_eq!(decode_err(&ev).message, "timer interval exceeds one hour");
    }

    #[test]
    fn test_timer_cancel_and_sleep() {
        let mut data = [0u8; EVENT_DATA_SIZE];
        encode_timer_cancel(&mut data, 0);
        let ev = hw_event(event_type::TIMER_CANCEL).with_payload(&data);
        assert_eq!(decode_err(&ev).message, "timer id is zero");

        encode_timer_sleep(&mut data, 0);
        let ev = hw_event(event_type::TIMER_SLEEP).with_payload(&data);
        assert_eq!(decode_err(&ev).message, "sleep duration is zero");

        encode_timer_sleep(&mut data, 250);
        let ev = hw_event(event_type::TIMER_SLEEP).with_payload(&data);
        assert_eq!(HardwareRequest::decode(&ev), Ok(HardwareRequest::TimerSleep { ms: 250 }));
    }

    #[test]
    fn test_dev_open_name_rules() {
        let mut data = [0u8; EVENT_DATA_SIZE];
        encode_dev_open(&mut data, b"ata0");
        let ev = hw_event(event_type::DEV_OPEN).with_payload(&data);
        assert_eq!(HardwareRequest::decode(&ev), Ok(HardwareRequest::DevOpen { name: b"ata0" }));

        let ev = hw_event(event_type::DEV_OPEN);
        assert_eq!(decode_err(&ev).message, "device name is empty");

        let ev = hw_event(event_type::DEV_OPEN).with_payload(&[b'x'; 64]);
        assert_eq!(decode_err(&ev).message, "device name exceeds 63 bytes");
    }

    #[test]
    fn test_dev_read_write_bounds() {
        let mut data = [0u8; EVENT_DATA_SIZE];
        encode_dev_read(&mut data, 2, MAX_DEV_READ + 1);
        let ev = hw_event(event_type::DEV_READ).with_payload(&data);
        assert_eq!(decode_err(&ev).message, "device read size exceeds 1 MiB");

        // Negative device id is rejected before the size is looked at.
        encode_dev_read(&mut data, u32::MAX, 64);
        let ev = hw_event(event_type::DEV_READ).with_payload(&data);
        assert_eq!(decode_err(&ev).message, "device id is negative");

        let mut data = [0u8; EVENT_DATA_SIZE];
        let n = encode_dev_write(&mut data, 1, &[0x5A; 300]);
        assert_eq!(n, 12 + MAX_DEV_WRITE);
        let ev = hw_event(event_type::DEV_WRITE).with_payload(&data);
        match HardwareRequest::decode(&ev) {
            Ok(HardwareRequest::DevWrite { device_id, size, data }) => {
                assert_eq!(device_id, 1);
                assert_eq!(size as usize, MAX_DEV_WRITE);
                assert!(data.iter().all(|&b| b == 0x5A));
            }
            other => panic!("unexpected: {:?}", other),
        }

        // A size field claiming more than the payload region holds.
        let mut data = [0u8; EVENT_DATA_SIZE];
        data[4..12].copy_from_slice(&(MAX_DEV_WRITE as u64 + 1).to_le_bytes());
        let ev = hw_event(event_type::DEV_WRITE).with_payload(&data);
        assert_eq!(decode_err(&ev).message, "device write exceeds event payload");
    }

    #[test]
    fn test_console_write_decode() {
        let mut data = [0u8; EVENT_DATA_SIZE];
        encode_console_write(&mut data, b"hello");
        let ev = hw_event(event_type::CONSOLE_WRITE).with_payload(&data);
        assert_eq!(HardwareRequest::decode(&ev), Ok(HardwareRequest::ConsoleWrite { text: b"hello" }));

        // Zero size rejected, oversize rejected.
        let ev = hw_event(event_type::CONSOLE_WRITE);
        assert_eq!(decode_err(&ev).message, "console write size invalid");
        let mut data = [0u8; EVENT_DATA_SIZE];
        data[0..4].copy_from_slice(&221u32.to_le_bytes());
        let ev = hw_event(event_type::CONSOLE_WRITE).with_payload(&data);
        assert_eq!(decode_err(&ev).message, "console write size invalid");
    }

    #[test]
    fn test_console_write_attr_decode() {
        let mut data = [0u8; EVENT_DATA_SIZE];
        encode_console_write_attr(&mut data, b"warn", vga::WARNING);
        let ev = hw_event(event_type::CONSOLE_WRITE_ATTR).with_payload(&data);
        assert_eq!(
            HardwareRequest::decode(&ev),
            Ok(HardwareRequest::ConsoleWriteAttr { attr: vga::WARNING, text: b"warn" })
        );
    }

    #[test]
    fn test_read_line_clamps_instead_of_rejecting() {
        let mut data = [0u8; EVENT_DATA_SIZE];
        encode_console_read_line(&mut data, 0);
        let ev = hw_event(event_type::CONSOLE_READ_LINE).with_payload(&data);
        assert_eq!(HardwareRequest::decode(&ev), Ok(HardwareRequest::ConsoleReadLine { max: 256 }));

        encode_console_read_line(&mut data, 10_000);
        let ev = hw_event(event_type::CONSOLE_READ_LINE).with_payload(&data);
        assert_eq!(HardwareRequest::decode(&ev), Ok(HardwareRequest::ConsoleReadLine { max: 256 }));

        encode_console_read_line(&mut data, 80);
        let ev = hw_event(event_type::CONSOLE_READ_LINE).with_payload(&data);
        assert_eq!(HardwareRequest::decode(&ev), Ok(HardwareRequest::ConsoleReadLine { max: 80 }));
    }

    #[test]
    fn test_encoders_truncate_like_the_client() {
        let mut data = [0u8; EVENT_DATA_SIZE];
        let long = [b'a'; 500];
        assert_eq!(encode_console_write(&mut data, &long), 4 + MAX_CONSOLE_WRITE);
        assert_eq!(encode_console_write_attr(&mut data, &long, vga::DEFAULT), 5 + MAX_CONSOLE_WRITE_ATTR);
        assert_eq!(encode_dev_open(&mut data, &long), 64);
    }

    #[test]
    fn test_vga_attr_packing() {
        assert_eq!(vga::attr(vga::WHITE, vga::BLUE), 0x1F);
        assert_eq!(vga::DEFAULT, 0x07);
        assert_eq!(vga::INPUT, 0x0F);
    }
}
