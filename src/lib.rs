//! # imu-rs
//!
//! Async Rust client for wearable IMU sensors speaking the fixed-frame
//! binary protocol over Bluetooth Low Energy or USB serial.
//!
//! The sensor family streams orientation and raw inertial data in 244-byte
//! CRC-protected frames. Over BLE, a dedicated real-time sub-channel is
//! multiplexed into each notification in front of the reliable send-buffer
//! stream; over USB everything arrives interleaved on one CDC-ACM stream.
//! This crate handles discovery, framing, the ~100-entry packet registry,
//! fixed-point decoding (including the smallest-three quaternion compression
//! and gyro-integrated reconstruction of packed sample blocks), and the
//! command/echo session protocol including recording control and file
//! transfer.
//!
//! ## Quick start
//!
//! ```no_run
//! use imu_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ImuClient::new(ImuClientConfig::default());
//!     let device = client.connect_one("IMU_ab1234").await?;
//!     device.init(InitOptions { set_time: true, ..Default::default() }).await?;
//!
//!     device.set_measurement_mode(MeasurementMode {
//!         full_packed_mode: SamplingMode::Hz200,
//!         status_mode: 1,
//!         ..Default::default()
//!     }).await?;
//!     device.start_streaming().await?;
//!
//!     while let Some(packet) = device.recv().await? {
//!         if let Packet::DataFullPacked(rate, data) = packet {
//!             let block = data.parse(rate);
//!             println!("{:?}", block.quat_9d[0]);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Recorded files downloaded from a sensor are plain concatenations of wire
//! frames; parse them offline with [`packets::load_binary_file`] or replay
//! them by passing the path to [`client::ImuClient::connect_one`].
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the commonly needed types |
//! | [`client`] | [`client::ImuClient`]: scanning and the connect dispatcher |
//! | [`device`] | [`device::Device`]: one session with its command API and packet stream |
//! | [`packets`] | Header registry, packet union, payload layouts |
//! | [`parse`] | Fixed-point → SI decoding, quaternion codec, packed reconstruction |
//! | [`frame`] | Frame codec, stream unpacker, BLE demultiplexer |
//! | [`ble`] | BLE scanner and link |
//! | [`protocol`] | UUIDs, frame constants, scaling factors |
//! | [`quat`] | Minimal quaternion arithmetic |
//! | [`error`] | [`error::ImuError`] and friends |

pub mod ble;
pub mod client;
pub mod device;
pub mod error;
pub mod frame;
pub mod packets;
pub mod parse;
pub mod protocol;
pub mod quat;
pub(crate) mod transport;

pub use transport::TransportKind;

/// Generate a random 64-bit synchronisation group id.
///
/// Use the same id for every device that should record synchronously (one
/// configured as [`packets::SyncMode::Sender`], the rest as
/// [`packets::SyncMode::Receiver`]); generate a fresh id whenever the set of
/// sensors changes.
pub fn generate_sync_id() -> u64 {
    rand::random()
}

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports covering the surface needed to scan, connect, and
/// consume packets.
pub mod prelude {
    // ── Client and session ────────────────────────────────────────────────────
    pub use crate::client::{ImuClient, ImuClientConfig};
    pub use crate::device::{ConnectionState, Device, InitOptions, OverflowPolicy};

    // ── Packets ───────────────────────────────────────────────────────────────
    pub use crate::packets::{
        load_binary_file, DataRate, Header, MeasurementMode, Packet, RealTimeDataMode,
        SamplingMode, SensorState, SyncMode,
    };

    // ── Decoded data ──────────────────────────────────────────────────────────
    pub use crate::parse::{ClockSync, SampleBlock, SensorSample};
    pub use crate::quat::Quaternion;

    // ── Errors and misc ───────────────────────────────────────────────────────
    pub use crate::ble::{BleScanner, ScanRecord};
    pub use crate::error::{ImuError, SensorErrorCode};
    pub use crate::frame::Channel;
    pub use crate::generate_sync_id;
    pub use crate::TransportKind;
}
