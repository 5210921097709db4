//! Outlet wire protocol: request framing and telemetry notification parsing.
//!
//! The outlet speaks a fixed-layout big-endian request/response protocol
//! over a GATT characteristic pair. Requests are 8 bytes (12 for the one
//! long-frame command) and carry a per-command checksum rather than a
//! running CRC. Telemetry arrives asynchronously as `ONLINE_DATA`
//! notification frames.

use thiserror::Error;

use crate::telemetry::TelemetrySnapshot;

/// Leading magic word of every outgoing request frame.
pub const FRAME_MAGIC: u16 = 60304;

/// Command code for the telemetry push/pull exchange.
pub const ONLINE_DATA: u16 = 61441;

/// Command codes encoded with the 8-byte short layout.
pub const SHORT_FRAME_COMMANDS: [u16; 6] = [ONLINE_DATA, 61442, 61445, 61446, 61447, 61448];

/// The single command code encoded with the 12-byte long layout.
pub const LONG_FRAME_COMMAND: u16 = 61444;

/// Minimum length of an `ONLINE_DATA` notification frame.
pub const ONLINE_DATA_FRAME_LEN: usize = 30;

const SHORT_OPERAND: u16 = 4;
const LONG_OPERANDS: [u16; 3] = [6, 16128, 16];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unsupported command code {0}")]
    UnsupportedCommand(u16),

    #[error("Truncated frame: got {len} bytes, need {need}")]
    TruncatedFrame { len: usize, need: usize },
}

/// Complement-of-low-16-bits checksum over the frame's header words.
///
/// The device checksums the magic, command, and operand words: the 32-bit
/// sum is reduced to its low 16 bits and every byte is XORed with 0xFF.
fn checksum(words: &[u16]) -> [u8; 2] {
    let sum: u32 = words.iter().map(|w| u32::from(*w)).sum();
    let low = (sum & 0xFFFF) as u16;
    (!low).to_be_bytes()
}

/// Encode a request frame for the given command code.
///
/// Pure function of the command code; all operand fields are fixed per
/// layout. Returns `UnsupportedCommand` for codes outside the known set.
pub fn encode_request(command: u16) -> Result<Vec<u8>, ProtocolError> {
    if SHORT_FRAME_COMMANDS.contains(&command) {
        let mut frame = Vec::with_capacity(8);
        frame.extend_from_slice(&FRAME_MAGIC.to_be_bytes());
        frame.extend_from_slice(&command.to_be_bytes());
        frame.extend_from_slice(&SHORT_OPERAND.to_be_bytes());
        frame.extend_from_slice(&checksum(&[FRAME_MAGIC, command, SHORT_OPERAND]));
        Ok(frame)
    } else if command == LONG_FRAME_COMMAND {
        let mut frame = Vec::with_capacity(12);
        frame.extend_from_slice(&FRAME_MAGIC.to_be_bytes());
        frame.extend_from_slice(&command.to_be_bytes());
        for operand in LONG_OPERANDS {
            frame.extend_from_slice(&operand.to_be_bytes());
        }
        let mut words = vec![FRAME_MAGIC, command];
        words.extend_from_slice(&LONG_OPERANDS);
        frame.extend_from_slice(&checksum(&words));
        Ok(frame)
    } else {
        Err(ProtocolError::UnsupportedCommand(command))
    }
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Parse an inbound notification frame.
///
/// Returns `Ok(None)` for notification kinds other than `ONLINE_DATA`;
/// they share the framing family but carry nothing we consume. The
/// leading sequence word and the length/status word are read but not
/// validated — the device link is unauthenticated plaintext and the
/// originals trust these fields as-is.
///
/// This is a pure parse; storing the result is the caller's job.
pub fn decode_notification(frame: &[u8]) -> Result<Option<TelemetrySnapshot>, ProtocolError> {
    if frame.len() < 6 {
        return Err(ProtocolError::TruncatedFrame {
            len: frame.len(),
            need: 6,
        });
    }
    let _sequence = read_u16(frame, 0);
    let command = read_u16(frame, 2);
    let _status = read_u16(frame, 4);

    if command != ONLINE_DATA {
        return Ok(None);
    }
    if frame.len() < ONLINE_DATA_FRAME_LEN {
        return Err(ProtocolError::TruncatedFrame {
            len: frame.len(),
            need: ONLINE_DATA_FRAME_LEN,
        });
    }

    Ok(Some(TelemetrySnapshot {
        voltage: 0.001 * f64::from(read_u32(frame, 6)),
        current: 0.001 * f64::from(read_u32(frame, 10)),
        power: 0.001 * f64::from(read_u32(frame, 14)),
        frequency: 0.1 * f64::from(read_u16(frame, 18)),
        power_factor: 0.01 * f64::from(read_u16(frame, 20)),
        accumulated_energy: 0.001 * f64::from(read_u32(frame, 22)),
        on_time: i64::from(read_u32(frame, 26)),
        updated_at: None,
    }))
}
