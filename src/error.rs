//! Error types surfaced by the client.
//!
//! Frame-level problems (bad start byte, CRC mismatch) are recovered inside
//! the [`crate::frame::Unpacker`] by resynchronising and are only counted,
//! never propagated. Everything that reaches a caller goes through
//! [`ImuError`].

use thiserror::Error;

use crate::packets::Header;

// ── Frame errors ──────────────────────────────────────────────────────────────

/// Why a 244-byte candidate frame was rejected.
///
/// These never escape the unpacker; they drive byte-precise resync and the
/// dropped-byte counter.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("bad start byte 0x{0:02X}")]
    BadStartByte(u8),
    #[error("payload size {0} exceeds the 236-byte payload slot")]
    BadPayloadSize(u8),
    #[error("CRC mismatch: computed 0x{computed:08X}, frame carries 0x{stored:08X}")]
    BadCrc { computed: u32, stored: u32 },
}

// ── Device error codes ────────────────────────────────────────────────────────

/// Error codes carried by a `SensorError` packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SensorErrorCode {
    FileNotFound,
    FileAlreadyExists,
    FileNameInvalid,
    FilesystemFull,
    WrongState,
    UnknownCommand,
    SendBufferFull,
    /// A code this client version does not know about.
    Unknown(u8),
}

impl SensorErrorCode {
    pub const fn from_u8(code: u8) -> Self {
        match code {
            1 => Self::FileNotFound,
            2 => Self::FileAlreadyExists,
            3 => Self::FileNameInvalid,
            4 => Self::FilesystemFull,
            5 => Self::WrongState,
            6 => Self::UnknownCommand,
            7 => Self::SendBufferFull,
            other => Self::Unknown(other),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            Self::FileNotFound => 1,
            Self::FileAlreadyExists => 2,
            Self::FileNameInvalid => 3,
            Self::FilesystemFull => 4,
            Self::WrongState => 5,
            Self::UnknownCommand => 6,
            Self::SendBufferFull => 7,
            Self::Unknown(other) => other,
        }
    }
}

impl std::fmt::Display for SensorErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "unknown error code {code}"),
            other => write!(f, "{other:?}"),
        }
    }
}

// ── Client errors ─────────────────────────────────────────────────────────────

/// Everything that can go wrong between a caller and a sensor.
#[derive(Debug, Error)]
pub enum ImuError {
    /// The underlying transport failed (I/O error, link dropped mid-frame).
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame decoded cleanly but its payload length does not match the
    /// registry entry for the header. Fatal for that frame only.
    #[error("payload size {got} does not match {expected} expected for {header:?}")]
    Decode {
        header: Header,
        expected: usize,
        got: usize,
    },

    /// The device answered a command with a `SensorError` packet.
    #[error("device rejected {command:?}: {code}")]
    Device {
        command: Header,
        code: SensorErrorCode,
    },

    /// The cached device status forbids the command; nothing was sent.
    #[error("device is recording")]
    DeviceIsRecording,

    /// The cached device status forbids the command; nothing was sent.
    #[error("device is streaming")]
    DeviceIsStreaming,

    /// Another command with the same expected echo header is still in flight.
    #[error("a command awaiting {0:?} is already in flight")]
    CommandInFlight(Header),

    /// The expected echo did not arrive within the configured window.
    #[error("timed out waiting for {0:?}")]
    Timeout(Header),

    /// The session closed while an operation was pending, or a command was
    /// issued on a poisoned session.
    #[error("disconnected")]
    Disconnected,

    /// The consumer queue overflowed under the `Error` overflow policy.
    #[error("consumer queue overflow")]
    QueueOverflow,

    /// A BLE or serial setup step failed.
    #[error("{0}")]
    Setup(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<btleplug::Error> for ImuError {
    fn from(e: btleplug::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serialport::Error> for ImuError {
    fn from(e: serialport::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_error_code_roundtrip() {
        for code in 0..=20u8 {
            assert_eq!(SensorErrorCode::from_u8(code).as_u8(), code);
        }
        assert_eq!(SensorErrorCode::from_u8(5), SensorErrorCode::WrongState);
        assert_eq!(SensorErrorCode::from_u8(99), SensorErrorCode::Unknown(99));
    }
}
