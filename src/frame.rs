//! Wire framing: the fixed 244-byte envelope, the resynchronising stream
//! unpacker, and the BLE notification demultiplexer.
//!
//! Layout of one frame:
//!
//! ```text
//! byte 0      : start byte 0x02
//! bytes 1..5  : CRC-32 (little-endian) over header ‖ payload[..payload_size]
//! byte 5      : payload size (0..=236)
//! bytes 6..8  : 16-bit header (little-endian)
//! bytes 8..244: payload, zero-padded to the full 236-byte slot
//! ```
//!
//! The CRC polynomial is the ubiquitous IEEE one (zlib `crc32`).

use log::warn;

use crate::error::FrameError;
use crate::protocol::{FRAME_PREFIX, FRAME_SIZE, MAX_PAYLOAD, START_BYTE};

// ── Frame ─────────────────────────────────────────────────────────────────────

/// A validated frame: header code plus the payload bytes (padding stripped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build the 244-byte wire image for `header` and `payload`.
    ///
    /// # Panics
    ///
    /// Panics if `payload` exceeds the 236-byte payload slot. All encoders in
    /// the packet registry stay well below it.
    pub fn encode(header: u16, payload: &[u8]) -> [u8; FRAME_SIZE] {
        assert!(
            payload.len() <= MAX_PAYLOAD,
            "payload of {} bytes exceeds the {}-byte slot",
            payload.len(),
            MAX_PAYLOAD
        );

        let mut buf = [0u8; FRAME_SIZE];
        buf[0] = START_BYTE;
        buf[5] = payload.len() as u8;
        buf[6..8].copy_from_slice(&header.to_le_bytes());
        buf[8..8 + payload.len()].copy_from_slice(payload);

        let crc = crc32fast::hash(&buf[6..FRAME_PREFIX + payload.len()]);
        buf[1..5].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Validate a 244-byte wire image and extract header and payload.
    pub fn decode(buf: &[u8; FRAME_SIZE]) -> Result<Frame, FrameError> {
        if buf[0] != START_BYTE {
            return Err(FrameError::BadStartByte(buf[0]));
        }
        let payload_size = buf[5] as usize;
        if payload_size > MAX_PAYLOAD {
            return Err(FrameError::BadPayloadSize(buf[5]));
        }

        let stored = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
        let computed = crc32fast::hash(&buf[6..FRAME_PREFIX + payload_size]);
        if computed != stored {
            return Err(FrameError::BadCrc { computed, stored });
        }

        let header = u16::from_le_bytes([buf[6], buf[7]]);
        Ok(Frame {
            header,
            payload: buf[FRAME_PREFIX..FRAME_PREFIX + payload_size].to_vec(),
        })
    }

    /// Wire image of this frame (encode round-trip convenience).
    pub fn to_bytes(&self) -> [u8; FRAME_SIZE] {
        Self::encode(self.header, &self.payload)
    }
}

// ── Channel ───────────────────────────────────────────────────────────────────

/// Which BLE sub-stream a frame arrived on.
///
/// USB and file playback deliver everything as [`Channel::SendBuffer`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Channel {
    /// Latest-snapshot packets framed one-per-notification.
    RealTime,
    /// The reliable in-order byte stream, reassembled across notifications.
    SendBuffer,
}

// ── Unpacker ──────────────────────────────────────────────────────────────────

/// Stateful byte-stream framer.
///
/// Feed arbitrary chunks with [`Unpacker::feed`] and drain whole frames with
/// [`Unpacker::next_frame`]. Corruption is handled by discarding a single
/// leading byte at a time, so a valid frame embedded after garbage is always
/// recovered, never skipped. Discarded bytes are counted for telemetry.
#[derive(Debug, Default)]
pub struct Unpacker {
    buffer: Vec<u8>,
    dropped: u64,
}

impl Unpacker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes to the internal buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Drop all buffered bytes (counted as dropped).
    pub fn clear(&mut self) {
        self.dropped += self.buffer.len() as u64;
        self.buffer.clear();
    }

    /// Total number of bytes silently discarded during resynchronisation.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped
    }

    /// Extract the next whole frame, or `None` if the buffer holds less than
    /// one valid frame.
    pub fn next_frame(&mut self) -> Option<Frame> {
        while self.buffer.len() >= FRAME_SIZE {
            let head: &[u8; FRAME_SIZE] = self.buffer[..FRAME_SIZE].try_into().unwrap();
            match Frame::decode(head) {
                Ok(frame) => {
                    self.buffer.drain(..FRAME_SIZE);
                    return Some(frame);
                }
                Err(_) => {
                    // Byte-precise resync: only the leading byte is ruled out.
                    self.buffer.drain(..1);
                    self.dropped += 1;
                }
            }
        }
        None
    }
}

// ── BLE demultiplexer ─────────────────────────────────────────────────────────

/// Splits BLE notifications into the real-time and send-buffer channels.
///
/// The first byte of every notification encodes the number of real-time
/// frames as `0xFF - byte` (so a notification with none starts with `0xFF`,
/// which can never be a frame start byte). The real-time frames follow
/// back-to-back, each complete within the notification; whatever remains is
/// send-buffer stream data that may continue in the next notification.
#[derive(Debug, Default)]
pub struct BleDemux {
    rt: Unpacker,
    stream: Unpacker,
}

impl BleDemux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one notification buffer.
    pub fn feed_notification(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let rt_count = (0xFF - data[0] as usize).min(254);
        let rt_end = (1 + rt_count * FRAME_SIZE).min(data.len());
        if rt_end < 1 + rt_count * FRAME_SIZE {
            warn!(
                "truncated notification: {} real-time frames announced, {} bytes present",
                rt_count,
                data.len()
            );
        }

        self.rt.feed(&data[1..rt_end]);
        self.stream.feed(&data[rt_end..]);
    }

    /// Next frame in arrival order, tagged with its channel.
    ///
    /// Real-time frames of a notification always drain before that
    /// notification's send-buffer bytes.
    pub fn next_frame(&mut self) -> Option<(Channel, Frame)> {
        if let Some(frame) = self.rt.next_frame() {
            return Some((Channel::RealTime, frame));
        }
        self.stream
            .next_frame()
            .map(|frame| (Channel::SendBuffer, frame))
    }

    /// Dropped-byte counters for (real-time, send-buffer).
    pub fn dropped_bytes(&self) -> (u64, u64) {
        (self.rt.dropped_bytes(), self.stream.dropped_bytes())
    }

    /// Discard any partially buffered send-buffer bytes.
    pub fn clear(&mut self) {
        self.rt.clear();
        self.stream.clear();
    }
}
