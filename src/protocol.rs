//! GATT UUIDs, frame constants, and fixed-point scaling factors for the
//! IMU wire protocol.
//!
//! All UUIDs belong to the sensor vendor namespace
//! `8003XXXX-e629-4c98-9324-aa7fc0c66de7`.

use std::f64::consts::PI;

use uuid::Uuid;

// ── Service ──────────────────────────────────────────────────────────────────

/// Primary GATT service UUID advertised by all IMU sensors.
///
/// Used as a scan filter to identify IMU devices among nearby BLE peripherals.
pub const IMU_SERVICE_UUID: Uuid = Uuid::from_u128(0x80030001_e629_4c98_9324_aa7fc0c66de7);

// ── Characteristics ───────────────────────────────────────────────────────────

/// Write characteristic (host → device).
///
/// Every write is exactly one full [`FRAME_SIZE`]-byte frame.
pub const IMU_RX_CHARACTERISTIC: Uuid = Uuid::from_u128(0x80030002_e629_4c98_9324_aa7fc0c66de7);

/// Notify characteristic (device → host).
///
/// Each notification starts with a real-time count byte, followed by
/// `0xFF - count` whole real-time frames and then send-buffer stream bytes.
/// See [`crate::frame::BleDemux`] for the exact framing.
pub const IMU_TX_CHARACTERISTIC: Uuid = Uuid::from_u128(0x80030003_e629_4c98_9324_aa7fc0c66de7);

// ── Frame constants ───────────────────────────────────────────────────────────

/// Value of the first byte of every frame on the wire.
pub const START_BYTE: u8 = 0x02;

/// Size of the fixed frame envelope: start byte (1), CRC-32 (4),
/// payload size (1), header (2), payload slot (236).
pub const FRAME_SIZE: usize = 244;

/// Number of bytes preceding the payload slot in a frame.
pub const FRAME_PREFIX: usize = 8;

/// Capacity of the payload slot; payloads shorter than this are zero-padded.
pub const MAX_PAYLOAD: usize = 236;

// ── Scaling factors ───────────────────────────────────────────────────────────
//
// Raw sensor words are signed 16-bit counts. Multiplying by the factors below
// yields SI units.

/// Gyroscope: rad/s per count (±2000 °/s full scale over 16 bits).
pub const GYR_SCALE: f64 = 2000.0 * PI / 180.0 / 32768.0;

/// Accelerometer: m/s² per count (±16 g full scale over 16 bits).
pub const ACC_SCALE: f64 = 16.0 * 9.81 / 32768.0;

/// Magnetometer: µT per count.
pub const MAG_SCALE: f64 = 1.0 / 16.0;

/// Heading offset delta: rad per count (±π over 16 bits).
pub const DELTA_SCALE: f64 = PI / 32768.0;

/// Gyroscope bias: rad/s per count (±2 °/s full scale over 16 bits).
pub const GYR_BIAS_SCALE: f64 = 2.0 * PI / 180.0 / 32768.0;

// ── Sampling ─────────────────────────────────────────────────────────────────

/// Native sample rate of the sensor pipeline in Hz.
///
/// Packed packets always carry history sampled at this rate, regardless of
/// how often they are delivered.
pub const NATIVE_RATE_HZ: f64 = 200.0;

/// Samples per `DataFullPacked` / `DataFull6dPacked` package.
pub const FULL_PACKED_SAMPLES: usize = 8;

/// Samples per `DataQuatPacked` package.
pub const QUAT_PACKED_SAMPLES: usize = 20;

/// Default real-time streaming rate in Hz when the rate limit is left at 0.
pub const DEFAULT_RT_RATE_HZ: u32 = 50;

// ── Device naming ─────────────────────────────────────────────────────────────

/// Advertised name prefix of IMU sensors (full names look like `IMU_ab1234`).
pub const DEVICE_NAME_PREFIX: &str = "IMU_";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_geometry_adds_up() {
        assert_eq!(FRAME_PREFIX + MAX_PAYLOAD, FRAME_SIZE);
    }

    #[test]
    fn scale_factors_match_protocol_tables() {
        assert!((GYR_SCALE - 0.001_065_264_436_031_695).abs() < 1e-15);
        assert!((ACC_SCALE - 0.004_790_039_062_5).abs() < 1e-15);
        assert!((MAG_SCALE - 0.0625).abs() < 1e-15);
        assert!((DELTA_SCALE - 9.587_379_924_285_257e-5).abs() < 1e-18);
        assert!((GYR_BIAS_SCALE - 1.065_264_436_031_695e-6).abs() < 1e-18);
    }
}
