//! Incremental frame receiver.
//!
//! The receiver consumes transport reads of any size (empty, partial frame,
//! several frames) one byte at a time and reports every completed frame to
//! a [`FrameSink`]. Each read can be handed over as soon as it arrives. The
//! receiver keeps its phase and accumulators between calls.
//!
//! ```text
//!  AwaitingStart --7E--> ReadingCommand --cmd--> ReadingLength --4 bytes-->
//!      ReadingData --len bytes--> ReadingCrc --4 bytes--> AwaitingEnd --7E--> AwaitingStart
//! ```
//!
//! A raw `0x7E` seen while reading the command, length, payload or CRC is a
//! framing violation: the partial frame is rejected, the receiver resets and
//! the sentinel is consumed.

use crate::error::FramingError;
use crate::protocol::crc::Crc32;
use crate::protocol::frame::{CRC_LEN, ESCAPE, ESCAPE_MASK, Frame, LENGTH_LEN, SENTINEL};
use log::{trace, warn};

/// Upper bound on the payload buffer reserved up front from a length field.
///
/// The length is not trusted until the CRC checks out, so larger payloads
/// grow the buffer as bytes actually arrive.
const MAX_PREALLOC: usize = 64 * 1024;

/// Receives the outcome of every frame the receiver finishes.
pub trait FrameSink {
    /// A frame passed its integrity checks.
    fn frame_received(&mut self, frame: Frame);

    /// A frame was abandoned. `command` is the command code of the partial
    /// frame when it had been read.
    fn frame_rejected(&mut self, command: Option<u8>, error: FramingError);
}

/// Outcome of a single frame, for collecting receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A valid frame.
    Frame(Frame),
    /// A rejected frame.
    Rejected {
        /// Command code of the partial frame, if read.
        command: Option<u8>,
        /// What went wrong.
        error: FramingError,
    },
}

impl FrameSink for Vec<FrameEvent> {
    fn frame_received(&mut self, frame: Frame) {
        self.push(FrameEvent::Frame(frame));
    }

    fn frame_rejected(&mut self, command: Option<u8>, error: FramingError) {
        self.push(FrameEvent::Rejected { command, error });
    }
}

/// Receiver parse phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Discarding bytes until a start sentinel.
    #[default]
    AwaitingStart,
    /// Next byte is the command code.
    ReadingCommand,
    /// Collecting the 4-byte little-endian length.
    ReadingLength,
    /// Collecting payload bytes.
    ReadingData,
    /// Collecting the 4-byte little-endian CRC.
    ReadingCrc,
    /// Next byte must be the end sentinel.
    AwaitingEnd,
}

/// Byte-at-a-time frame parser.
#[derive(Debug, Default)]
pub struct Receiver {
    phase: Phase,
    escaped: bool,
    command: u8,
    length: u32,
    length_read: usize,
    payload: Vec<u8>,
    crc: Crc32,
    received_crc: u32,
    crc_read: usize,
}

impl Receiver {
    /// Create a receiver waiting for a start sentinel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current parse phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether a partial frame is buffered.
    pub fn in_frame(&self) -> bool {
        self.phase != Phase::AwaitingStart
    }

    /// Drop any partial frame and wait for the next start sentinel.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feed newly read bytes, reporting completed frames to `sink`.
    pub fn feed<S: FrameSink + ?Sized>(&mut self, bytes: &[u8], sink: &mut S) {
        for &byte in bytes {
            self.step(byte, sink);
        }
    }

    /// Feed bytes and collect the resulting frame events.
    pub fn feed_collect(&mut self, bytes: &[u8]) -> Vec<FrameEvent> {
        let mut events = Vec::new();
        self.feed(bytes, &mut events);
        events
    }

    fn step<S: FrameSink + ?Sized>(&mut self, raw: u8, sink: &mut S) {
        match self.phase {
            Phase::AwaitingStart => {
                if raw == SENTINEL {
                    self.phase = Phase::ReadingCommand;
                }
                return;
            },
            Phase::AwaitingEnd => {
                self.finish(raw, sink);
                return;
            },
            _ => {},
        }

        if raw == SENTINEL {
            let command = (self.phase != Phase::ReadingCommand).then_some(self.command);
            let error = FramingError::UnexpectedSentinel { command };
            warn!("{error}, resynchronising");
            self.reset();
            sink.frame_rejected(command, error);
            return;
        }

        if raw == ESCAPE {
            self.escaped = true;
            return;
        }

        let byte = if self.escaped {
            self.escaped = false;
            raw ^ ESCAPE_MASK
        } else {
            raw
        };

        match self.phase {
            Phase::ReadingCommand => {
                self.command = byte;
                self.crc = Crc32::new();
                self.crc.push(byte);
                self.phase = Phase::ReadingLength;
            },
            Phase::ReadingLength => {
                self.crc.push(byte);
                self.length |= u32::from(byte) << (8 * self.length_read);
                self.length_read += 1;
                if self.length_read == LENGTH_LEN {
                    let len = self.length as usize;
                    self.payload = Vec::with_capacity(len.min(MAX_PREALLOC));
                    self.phase = if len == 0 {
                        Phase::ReadingCrc
                    } else {
                        Phase::ReadingData
                    };
                }
            },
            Phase::ReadingData => {
                self.crc.push(byte);
                self.payload.push(byte);
                if self.payload.len() == self.length as usize {
                    self.phase = Phase::ReadingCrc;
                }
            },
            Phase::ReadingCrc => {
                self.received_crc |= u32::from(byte) << (8 * self.crc_read);
                self.crc_read += 1;
                if self.crc_read == CRC_LEN {
                    self.phase = Phase::AwaitingEnd;
                }
            },
            Phase::AwaitingStart | Phase::AwaitingEnd => unreachable!("handled above"),
        }
    }

    fn finish<S: FrameSink + ?Sized>(&mut self, raw: u8, sink: &mut S) {
        let command = self.command;
        let actual = self.crc.value();
        let expected = self.received_crc;
        let payload = std::mem::take(&mut self.payload);
        self.reset();

        if raw != SENTINEL {
            let error = FramingError::MissingEnd {
                command,
                found: raw,
            };
            warn!("{error}");
            sink.frame_rejected(Some(command), error);
        } else if actual != expected {
            let error = FramingError::CrcMismatch {
                command,
                expected,
                actual,
            };
            warn!("{error}");
            sink.frame_rejected(Some(command), error);
        } else {
            trace!(
                "Received frame {command:#04x} with {} payload bytes",
                payload.len()
            );
            sink.frame_received(Frame { command, payload });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::encode;

    fn frames(events: &[FrameEvent]) -> Vec<&Frame> {
        events
            .iter()
            .filter_map(|e| match e {
                FrameEvent::Frame(f) => Some(f),
                FrameEvent::Rejected { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_empty_payload_whole_chunk() {
        let mut rx = Receiver::new();
        let events = rx.feed_collect(&encode(0x01, &[]).unwrap());
        assert_eq!(events, vec![FrameEvent::Frame(Frame::new(0x01, Vec::new()))]);
        assert_eq!(rx.phase(), Phase::AwaitingStart);
    }

    #[test]
    fn test_byte_at_a_time_matches_whole_chunk() {
        let data = encode(0x01, &[]).unwrap();
        let mut rx = Receiver::new();
        let mut events = Vec::new();
        for b in &data {
            rx.feed(std::slice::from_ref(b), &mut events);
        }
        assert_eq!(events, Receiver::new().feed_collect(&data));
    }

    #[test]
    fn test_roundtrip_with_reserved_bytes() {
        let payloads: [&[u8]; 4] = [
            &[],
            &[SENTINEL],
            &[ESCAPE, SENTINEL, ESCAPE ^ ESCAPE_MASK, SENTINEL ^ ESCAPE_MASK],
            b"plain text payload",
        ];
        for (cmd, payload) in [0x00u8, SENTINEL, ESCAPE, 0xFF].into_iter().zip(payloads) {
            let mut rx = Receiver::new();
            let events = rx.feed_collect(&encode(cmd, payload).unwrap());
            assert_eq!(events, vec![FrameEvent::Frame(Frame::new(cmd, payload.to_vec()))]);
        }
    }

    #[test]
    fn test_large_payload_split_reads() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
        let data = encode(0x85, &payload).unwrap();
        let mut rx = Receiver::new();
        let mut events = Vec::new();
        for chunk in data.chunks(777) {
            rx.feed(chunk, &mut events);
        }
        assert_eq!(frames(&events), vec![&Frame::new(0x85, payload)]);
    }

    #[test]
    fn test_multiple_frames_in_one_read_with_noise() {
        let mut data = vec![0x00, 0x13, 0x37];
        data.extend(encode(0x81, b"one").unwrap());
        data.extend([0xAA, 0xBB]);
        data.extend(encode(0x82, b"two").unwrap());
        let events = Receiver::new().feed_collect(&data);
        assert_eq!(
            frames(&events),
            vec![&Frame::new(0x81, b"one".to_vec()), &Frame::new(0x82, b"two".to_vec())]
        );
    }

    #[test]
    fn test_every_single_bit_flip_is_rejected() {
        let data = encode(0x83, &[0x10, 0x20, 0x30, SENTINEL, 0x40]).unwrap();
        for index in 1..data.len() - 1 {
            for bit in 0..8 {
                let mut corrupted = data.clone();
                corrupted[index] ^= 1 << bit;
                let mut rx = Receiver::new();
                let mut events = rx.feed_collect(&corrupted);
                // Flush any frame still waiting on bytes a shortened length
                // field would never see.
                events.extend(rx.feed_collect(&[SENTINEL]));
                assert!(
                    frames(&events).iter().all(|f| **f != Frame::new(0x83, vec![0x10, 0x20, 0x30, SENTINEL, 0x40])),
                    "bit {bit} of byte {index} went undetected"
                );
                assert!(
                    events.iter().any(|e| matches!(e, FrameEvent::Rejected { .. })),
                    "bit {bit} of byte {index} produced no rejection"
                );
            }
        }
    }

    #[test]
    fn test_stub_then_sentinel_resynchronises() {
        crate::init_test_logging();
        let mut rx = Receiver::new();
        assert!(rx.feed_collect(&[SENTINEL, 0x01]).is_empty());
        assert_eq!(rx.phase(), Phase::ReadingLength);

        let events = rx.feed_collect(&[SENTINEL]);
        assert_eq!(
            events,
            vec![FrameEvent::Rejected {
                command: Some(0x01),
                error: FramingError::UnexpectedSentinel {
                    command: Some(0x01)
                },
            }]
        );
        assert_eq!(rx.phase(), Phase::AwaitingStart);

        let events = rx.feed_collect(&encode(0x81, b"ok").unwrap());
        assert_eq!(events, vec![FrameEvent::Frame(Frame::new(0x81, b"ok".to_vec()))]);
    }

    #[test]
    fn test_back_to_back_sentinels_report_no_command() {
        let events = Receiver::new().feed_collect(&[SENTINEL, SENTINEL]);
        assert_eq!(
            events,
            vec![FrameEvent::Rejected {
                command: None,
                error: FramingError::UnexpectedSentinel { command: None },
            }]
        );
    }

    #[test]
    fn test_missing_end_sentinel() {
        let mut data = encode(0x84, b"x").unwrap();
        let last = data.len() - 1;
        data[last] = 0x00;
        let events = Receiver::new().feed_collect(&data);
        assert_eq!(
            events,
            vec![FrameEvent::Rejected {
                command: Some(0x84),
                error: FramingError::MissingEnd {
                    command: 0x84,
                    found: 0x00
                },
            }]
        );
    }

    #[test]
    fn test_reset_discards_partial_frame() {
        let data = encode(0x81, b"abc").unwrap();
        let mut rx = Receiver::new();
        rx.feed_collect(&data[..5]);
        assert!(rx.in_frame());
        rx.reset();
        assert!(!rx.in_frame());
        assert_eq!(frames(&rx.feed_collect(&data)).len(), 1);
    }
}
