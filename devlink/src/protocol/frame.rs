//! Byte-stuffed frame codec.
//!
//! ## Frame Format
//!
//! ```text
//! +----------+-----+-------------+-----------------+---------------+----------+
//! | SENTINEL | Cmd |   Length    |     Payload     |     CRC32     | SENTINEL |
//! +----------+-----+-------------+-----------------+---------------+----------+
//! |   0x7E   |  1  | 4 bytes LE  |  Length bytes   |  4 bytes LE   |   0x7E   |
//! +----------+-----+-------------+-----------------+---------------+----------+
//! ```
//!
//! The CRC covers `Cmd ++ Length ++ Payload` before escaping. Inside the
//! delimiters every `0x7E` or `0x7D` byte is sent as `0x7D, byte ^ 0x20`.
//!
//! Decoding is incremental and lives in [`crate::protocol::receiver`].

use crate::error::{Error, Result};
use crate::protocol::crc::Crc32;
use byteorder::{LittleEndian, WriteBytesExt};

/// Frame delimiter, sent unescaped at both ends of every frame.
pub const SENTINEL: u8 = 0x7E;

/// Escape marker; the following byte is XORed with [`ESCAPE_MASK`].
pub const ESCAPE: u8 = 0x7D;

/// Mask applied to an escaped byte.
pub const ESCAPE_MASK: u8 = 0x20;

/// Size of the command code field.
pub const COMMAND_LEN: usize = 1;

/// Size of the length field.
pub const LENGTH_LEN: usize = 4;

/// Size of the CRC trailer.
pub const CRC_LEN: usize = 4;

/// Whether a byte must be escaped inside a frame.
#[inline]
pub fn needs_escape(byte: u8) -> bool {
    byte == SENTINEL || byte == ESCAPE
}

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command code.
    pub command: u8,
    /// Unescaped payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame from a command code and payload.
    pub fn new(command: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// Encode this frame for transmission.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self.command, &self.payload)
    }
}

/// Appends bytes to an output buffer, escaping and checksumming as it goes.
struct Stuffer {
    out: Vec<u8>,
    crc: Crc32,
}

impl Stuffer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            out: Vec::with_capacity(capacity),
            crc: Crc32::new(),
        }
    }

    fn put_raw(&mut self, byte: u8) {
        if needs_escape(byte) {
            self.out.push(ESCAPE);
            self.out.push(byte ^ ESCAPE_MASK);
        } else {
            self.out.push(byte);
        }
    }

    fn put(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.crc.push(b);
            self.put_raw(b);
        }
    }
}

fn length_field(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        Error::Protocol(format!(
            "payload of {len} bytes exceeds the frame length field"
        ))
    })
}

/// Encode a command code and payload into a delimited, escaped frame.
///
/// Fails if the payload does not fit the 32-bit length field.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn encode(command: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let length = length_field(payload.len())?;

    // Worst case every byte is escaped.
    let body = COMMAND_LEN + LENGTH_LEN + payload.len() + CRC_LEN;
    let mut stuffer = Stuffer::with_capacity(2 + body * 2);
    stuffer.out.push(SENTINEL);

    let mut header = Vec::with_capacity(COMMAND_LEN + LENGTH_LEN);
    header.push(command);
    header
        .write_u32::<LittleEndian>(length)
        .unwrap();
    stuffer.put(&header);
    stuffer.put(payload);

    let crc = stuffer.crc.value();
    for b in crc.to_le_bytes() {
        stuffer.put_raw(b);
    }

    stuffer.out.push(SENTINEL);
    Ok(stuffer.out)
}
