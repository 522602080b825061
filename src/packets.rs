//! The packet registry: header codes, payload layouts, and the typed
//! [`Packet`] union.
//!
//! Every packet kind is identified by a 16-bit header. The high byte encodes
//! the class (`0x01` command, `0x02` data/echo, `0x03` acknowledgement,
//! `0x04` error), the low byte the operation. Sensor-data families occupy
//! seven consecutive header slots: the six configured rates
//! 200/100/50/25/10/1 Hz followed by the real-time variant.
//!
//! All payload integers are little-endian, floats are IEEE-754 binary32, and
//! fields are packed without padding. Filenames are ASCII, at most 64
//! characters, null-padded in a 65-byte field.

use std::io::Read;
use std::path::Path;

use crate::error::{ImuError, SensorErrorCode};
use crate::frame::{Frame, Unpacker};
use crate::protocol::{FRAME_SIZE, MAX_PAYLOAD};

// ── Data rates ────────────────────────────────────────────────────────────────

/// Rate slot of a sensor-data header.
///
/// The rate is part of the header, not the payload; packed packets use it to
/// reconstruct per-sample timestamps and incremental rotations.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DataRate {
    Hz200,
    Hz100,
    Hz50,
    Hz25,
    Hz10,
    Hz1,
    /// Real-time variant. Carries history sampled at the native 200 Hz
    /// pipeline rate regardless of how often packets are delivered.
    Rt,
}

impl DataRate {
    const fn from_slot(slot: u16) -> Option<DataRate> {
        Some(match slot {
            0 => DataRate::Hz200,
            1 => DataRate::Hz100,
            2 => DataRate::Hz50,
            3 => DataRate::Hz25,
            4 => DataRate::Hz10,
            5 => DataRate::Hz1,
            6 => DataRate::Rt,
            _ => return None,
        })
    }

    const fn slot(self) -> u16 {
        match self {
            DataRate::Hz200 => 0,
            DataRate::Hz100 => 1,
            DataRate::Hz50 => 2,
            DataRate::Hz25 => 3,
            DataRate::Hz10 => 4,
            DataRate::Hz1 => 5,
            DataRate::Rt => 6,
        }
    }

    /// Sample rate in Hz used for per-sample timestamps and gyro integration.
    pub const fn hz(self) -> f64 {
        match self {
            DataRate::Hz200 | DataRate::Rt => 200.0,
            DataRate::Hz100 => 100.0,
            DataRate::Hz50 => 50.0,
            DataRate::Hz25 => 25.0,
            DataRate::Hz10 => 10.0,
            DataRate::Hz1 => 1.0,
        }
    }

    /// Sample period in nanoseconds.
    pub fn sample_period_ns(self) -> i64 {
        (1_000_000_000.0 / self.hz()) as i64
    }
}

// ── Field enums ───────────────────────────────────────────────────────────────

/// Per-output sampling mode in `CmdSetMeasurementMode`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum SamplingMode {
    #[default]
    Disabled,
    Hz200,
    Hz100,
    Hz50,
    Hz25,
    Hz10,
    Hz1,
    Unknown(u8),
}

impl SamplingMode {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disabled,
            1 => Self::Hz200,
            2 => Self::Hz100,
            3 => Self::Hz50,
            4 => Self::Hz25,
            5 => Self::Hz10,
            6 => Self::Hz1,
            other => Self::Unknown(other),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Disabled => 0,
            Self::Hz200 => 1,
            Self::Hz100 => 2,
            Self::Hz50 => 3,
            Self::Hz25 => 4,
            Self::Hz10 => 5,
            Self::Hz1 => 6,
            Self::Unknown(other) => other,
        }
    }
}

/// Synchronisation role in a multi-sensor recording group.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum SyncMode {
    #[default]
    NoSync,
    Sender,
    Receiver,
    Unknown(u8),
}

impl SyncMode {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NoSync,
            1 => Self::Sender,
            2 => Self::Receiver,
            other => Self::Unknown(other),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            Self::NoSync => 0,
            Self::Sender => 1,
            Self::Receiver => 2,
            Self::Unknown(other) => other,
        }
    }
}

/// Whether the sensor interleaves `DataCalib` packets into the stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum CalibDataMode {
    #[default]
    Disabled,
    Enabled,
    Unknown(u8),
}

impl CalibDataMode {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disabled,
            1 => Self::Enabled,
            other => Self::Unknown(other),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Disabled => 0,
            Self::Enabled => 1,
            Self::Unknown(other) => other,
        }
    }
}

/// On-device processing extension selector.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ProcessExtensionMode {
    #[default]
    NoExtension,
    Unknown(u8),
}

impl ProcessExtensionMode {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NoExtension,
            other => Self::Unknown(other),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            Self::NoExtension => 0,
            Self::Unknown(other) => other,
        }
    }
}

/// Which packet family the real-time channel carries.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum RealTimeDataMode {
    #[default]
    Disabled,
    /// `DataQuatFixedRt` packets (orientation only).
    Quat,
    /// `DataFullFixedRt` packets (orientation plus raw sensors).
    Full,
    Unknown(u8),
}

impl RealTimeDataMode {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disabled,
            1 => Self::Quat,
            2 => Self::Full,
            other => Self::Unknown(other),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Disabled => 0,
            Self::Quat => 1,
            Self::Full => 2,
            Self::Unknown(other) => other,
        }
    }
}

/// Operating state reported in `DataStatus`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum SensorState {
    #[default]
    Idle,
    Recording,
    Streaming,
    RealTimeStreaming,
    Unknown(u8),
}

impl SensorState {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Recording,
            2 => Self::Streaming,
            3 => Self::RealTimeStreaming,
            other => Self::Unknown(other),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Recording => 1,
            Self::Streaming => 2,
            Self::RealTimeStreaming => 3,
            Self::Unknown(other) => other,
        }
    }
}

// ── Error-flag bits ───────────────────────────────────────────────────────────

/// Bits of the per-sample/per-package `error_flags` field.
pub mod error_flags {
    pub const TIME_GAP: u8 = 1;
    pub const GYR_CLIPPING: u8 = 2;
    pub const ACC_CLIPPING: u8 = 4;
    pub const MAG_CLIPPING: u8 = 8;
    pub const PROCESSING_ISSUE: u8 = 16;
}

// ── Header ────────────────────────────────────────────────────────────────────

/// 16-bit header registry.
///
/// Sensor-data variants carry their [`DataRate`] so the 56 wire values of the
/// eight families collapse into eight parameterised entries.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Header {
    CmdGetDeviceInfo,
    DataDeviceInfo,
    CmdSleep,
    AckSleep,
    CmdDeepSleep,
    AckDeepSleep,
    CmdSetMeasurementMode,
    DataMeasurementMode,
    CmdSetBurstMode,
    DataBurstMode,
    CmdSetRecordingConfig,
    DataRecordingConfig,
    CmdStartRecording,
    AckStartRecording,
    CmdStopRecording,
    AckStopRecording,
    CmdStartStreaming,
    AckStartStreaming,
    CmdStopStreaming,
    AckStopStreaming,
    CmdStopStreamingAndClearBuffer,
    AckStopStreamingAndClearBuffer,
    CmdStartRealTimeStreaming,
    AckStartRealTimeStreaming,
    CmdStopRealTimeStreaming,
    AckStopRealTimeStreaming,
    CmdSetAbsoluteTime,
    DataAbsoluteTime,
    DataClockRoundtrip,
    CmdSetLed,
    AckSetLed,
    CmdSetSyncOutput,
    AckSetSyncOutput,
    DataSyncTrigger,
    DataStatus,
    DataFullPacked(DataRate),
    DataFull6dPacked(DataRate),
    DataFullFixed(DataRate),
    DataFull6dFixed(DataRate),
    DataFullFloat(DataRate),
    DataQuatPacked(DataRate),
    DataQuatFixed(DataRate),
    DataQuatFloat(DataRate),
    DataRawBurst,
    DataAccZBurst,
    DataCalib,
    CmdFsListFiles,
    DataFsFileCount,
    DataFsFile,
    CmdFsGetSize,
    DataFsSize,
    CmdFsGetBytes,
    DataFsBytes,
    CmdFsStopGetBytes,
    AckFsStopGetBytes,
    CmdFsDeleteFile,
    AckFsDeleteFile,
    CmdFsFormatFilesystem,
    AckFsFormatFilesystem,
    SensorError,
}

/// Registered payload size of a header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PayloadLen {
    Fixed(usize),
    Variable { min: usize },
}

impl Header {
    /// Map a wire value to a registry entry, `None` for reserved values.
    pub const fn from_u16(value: u16) -> Option<Header> {
        use Header::*;
        Some(match value {
            0x0110 => CmdGetDeviceInfo,
            0x0210 => DataDeviceInfo,
            0x0118 => CmdSleep,
            0x0318 => AckSleep,
            0x0119 => CmdDeepSleep,
            0x0319 => AckDeepSleep,
            0x0120 => CmdSetMeasurementMode,
            0x0220 => DataMeasurementMode,
            0x0128 => CmdSetBurstMode,
            0x0228 => DataBurstMode,
            0x0130 => CmdSetRecordingConfig,
            0x0230 => DataRecordingConfig,
            0x0138 => CmdStartRecording,
            0x0338 => AckStartRecording,
            0x0139 => CmdStopRecording,
            0x0339 => AckStopRecording,
            0x0140 => CmdStartStreaming,
            0x0340 => AckStartStreaming,
            0x0141 => CmdStopStreaming,
            0x0341 => AckStopStreaming,
            0x0142 => CmdStopStreamingAndClearBuffer,
            0x0342 => AckStopStreamingAndClearBuffer,
            0x0148 => CmdStartRealTimeStreaming,
            0x0348 => AckStartRealTimeStreaming,
            0x0149 => CmdStopRealTimeStreaming,
            0x0349 => AckStopRealTimeStreaming,
            0x0170 => CmdSetAbsoluteTime,
            0x0270 => DataAbsoluteTime,
            0x0271 => DataClockRoundtrip,
            0x0178 => CmdSetLed,
            0x0378 => AckSetLed,
            0x017C => CmdSetSyncOutput,
            0x037C => AckSetSyncOutput,
            0x027D => DataSyncTrigger,
            0x0280 => DataStatus,
            0x0290..=0x0296 => {
                DataFullPacked(match DataRate::from_slot(value - 0x0290) {
                    Some(rate) => rate,
                    None => return None,
                })
            }
            0x0298..=0x029E => {
                DataFull6dPacked(match DataRate::from_slot(value - 0x0298) {
                    Some(rate) => rate,
                    None => return None,
                })
            }
            0x02A0..=0x02A6 => {
                DataFullFixed(match DataRate::from_slot(value - 0x02A0) {
                    Some(rate) => rate,
                    None => return None,
                })
            }
            0x02A8..=0x02AE => {
                DataFull6dFixed(match DataRate::from_slot(value - 0x02A8) {
                    Some(rate) => rate,
                    None => return None,
                })
            }
            0x02B0..=0x02B6 => {
                DataFullFloat(match DataRate::from_slot(value - 0x02B0) {
                    Some(rate) => rate,
                    None => return None,
                })
            }
            0x02B8..=0x02BE => {
                DataQuatPacked(match DataRate::from_slot(value - 0x02B8) {
                    Some(rate) => rate,
                    None => return None,
                })
            }
            0x02C0..=0x02C6 => {
                DataQuatFixed(match DataRate::from_slot(value - 0x02C0) {
                    Some(rate) => rate,
                    None => return None,
                })
            }
            0x02C8..=0x02CE => {
                DataQuatFloat(match DataRate::from_slot(value - 0x02C8) {
                    Some(rate) => rate,
                    None => return None,
                })
            }
            0x02D0 => DataRawBurst,
            0x02D1 => DataAccZBurst,
            0x02D8 => DataCalib,
            0x01E0 => CmdFsListFiles,
            0x02E0 => DataFsFileCount,
            0x02E1 => DataFsFile,
            0x01E2 => CmdFsGetSize,
            0x02E2 => DataFsSize,
            0x01E3 => CmdFsGetBytes,
            0x02E3 => DataFsBytes,
            0x01E4 => CmdFsStopGetBytes,
            0x03E4 => AckFsStopGetBytes,
            0x01E5 => CmdFsDeleteFile,
            0x03E5 => AckFsDeleteFile,
            0x01E6 => CmdFsFormatFilesystem,
            0x03E6 => AckFsFormatFilesystem,
            0x0400 => SensorError,
            _ => return None,
        })
    }

    /// The 16-bit wire value of this header.
    pub const fn as_u16(self) -> u16 {
        use Header::*;
        match self {
            CmdGetDeviceInfo => 0x0110,
            DataDeviceInfo => 0x0210,
            CmdSleep => 0x0118,
            AckSleep => 0x0318,
            CmdDeepSleep => 0x0119,
            AckDeepSleep => 0x0319,
            CmdSetMeasurementMode => 0x0120,
            DataMeasurementMode => 0x0220,
            CmdSetBurstMode => 0x0128,
            DataBurstMode => 0x0228,
            CmdSetRecordingConfig => 0x0130,
            DataRecordingConfig => 0x0230,
            CmdStartRecording => 0x0138,
            AckStartRecording => 0x0338,
            CmdStopRecording => 0x0139,
            AckStopRecording => 0x0339,
            CmdStartStreaming => 0x0140,
            AckStartStreaming => 0x0340,
            CmdStopStreaming => 0x0141,
            AckStopStreaming => 0x0341,
            CmdStopStreamingAndClearBuffer => 0x0142,
            AckStopStreamingAndClearBuffer => 0x0342,
            CmdStartRealTimeStreaming => 0x0148,
            AckStartRealTimeStreaming => 0x0348,
            CmdStopRealTimeStreaming => 0x0149,
            AckStopRealTimeStreaming => 0x0349,
            CmdSetAbsoluteTime => 0x0170,
            DataAbsoluteTime => 0x0270,
            DataClockRoundtrip => 0x0271,
            CmdSetLed => 0x0178,
            AckSetLed => 0x0378,
            CmdSetSyncOutput => 0x017C,
            AckSetSyncOutput => 0x037C,
            DataSyncTrigger => 0x027D,
            DataStatus => 0x0280,
            DataFullPacked(rate) => 0x0290 + rate.slot(),
            DataFull6dPacked(rate) => 0x0298 + rate.slot(),
            DataFullFixed(rate) => 0x02A0 + rate.slot(),
            DataFull6dFixed(rate) => 0x02A8 + rate.slot(),
            DataFullFloat(rate) => 0x02B0 + rate.slot(),
            DataQuatPacked(rate) => 0x02B8 + rate.slot(),
            DataQuatFixed(rate) => 0x02C0 + rate.slot(),
            DataQuatFloat(rate) => 0x02C8 + rate.slot(),
            DataRawBurst => 0x02D0,
            DataAccZBurst => 0x02D1,
            DataCalib => 0x02D8,
            CmdFsListFiles => 0x01E0,
            DataFsFileCount => 0x02E0,
            DataFsFile => 0x02E1,
            CmdFsGetSize => 0x01E2,
            DataFsSize => 0x02E2,
            CmdFsGetBytes => 0x01E3,
            DataFsBytes => 0x02E3,
            CmdFsStopGetBytes => 0x01E4,
            AckFsStopGetBytes => 0x03E4,
            CmdFsDeleteFile => 0x01E5,
            AckFsDeleteFile => 0x03E5,
            CmdFsFormatFilesystem => 0x01E6,
            AckFsFormatFilesystem => 0x03E6,
            SensorError => 0x0400,
        }
    }

    /// Registered payload size for this header.
    pub const fn payload_len(self) -> PayloadLen {
        use Header::*;
        PayloadLen::Fixed(match self {
            CmdGetDeviceInfo | CmdSleep | AckSleep | CmdDeepSleep | AckDeepSleep
            | CmdStartRecording | AckStartRecording | CmdStopRecording | AckStopRecording
            | CmdStartStreaming | AckStartStreaming | CmdStopStreaming | AckStopStreaming
            | CmdStopStreamingAndClearBuffer | AckStopStreamingAndClearBuffer
            | AckStartRealTimeStreaming | CmdStopRealTimeStreaming
            | AckStopRealTimeStreaming | AckSetLed | AckSetSyncOutput | CmdFsListFiles
            | CmdFsStopGetBytes | AckFsStopGetBytes | AckFsDeleteFile
            | CmdFsFormatFilesystem | AckFsFormatFilesystem => 0,
            DataDeviceInfo => 54,
            CmdSetMeasurementMode | DataMeasurementMode => 29,
            CmdSetBurstMode | DataBurstMode => 2,
            CmdSetRecordingConfig | DataRecordingConfig => 65,
            CmdStartRealTimeStreaming => 2,
            CmdSetAbsoluteTime | DataAbsoluteTime => 8,
            DataClockRoundtrip => 32,
            CmdSetLed => 4,
            CmdSetSyncOutput => 5,
            DataSyncTrigger => 16,
            DataStatus => 19,
            DataFullPacked(_) => 163,
            DataFull6dPacked(_) => 113,
            DataFullFixed(_) => 37,
            DataFull6dFixed(_) => 29,
            DataFullFloat(_) => 65,
            DataQuatPacked(_) => 196,
            DataQuatFixed(_) => 19,
            DataQuatFloat(_) => 29,
            DataRawBurst => 152,
            DataAccZBurst => 208,
            DataCalib => 26,
            DataFsFileCount => 4,
            DataFsFile => 77,
            CmdFsGetSize | CmdFsDeleteFile => 65,
            DataFsSize => 73,
            CmdFsGetBytes => 73,
            DataFsBytes => return PayloadLen::Variable { min: 4 },
            SensorError => 3,
        })
    }

    /// True for the sensor-data families (everything the stream consumer is
    /// usually interested in, as opposed to echoes and acks).
    pub const fn is_sensor_data(self) -> bool {
        use Header::*;
        matches!(
            self,
            DataFullPacked(_)
                | DataFull6dPacked(_)
                | DataFullFixed(_)
                | DataFull6dFixed(_)
                | DataFullFloat(_)
                | DataQuatPacked(_)
                | DataQuatFixed(_)
                | DataQuatFloat(_)
                | DataRawBurst
                | DataAccZBurst
        )
    }
}

// ── Payload structs ───────────────────────────────────────────────────────────

/// Identity block reported in `DataDeviceInfo`.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    /// Six ASCII characters, e.g. `"ab1234"`. The advertised BLE name is
    /// `IMU_` followed by this serial.
    pub serial: String,
    pub hardware_version: String,
    pub firmware_version: String,
}

/// Measurement configuration; sent as `CmdSetMeasurementMode` and echoed
/// verbatim as `DataMeasurementMode`.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct MeasurementMode {
    pub timestamp: i64,
    pub full_float_200hz: bool,
    pub full_fixed_mode: SamplingMode,
    pub full_packed_mode: SamplingMode,
    pub quat_float_mode: SamplingMode,
    pub quat_fixed_mode: SamplingMode,
    pub quat_packed_mode: SamplingMode,
    /// 0 disables periodic `DataStatus`, 1 enables it.
    pub status_mode: u8,
    pub calib_data_mode: CalibDataMode,
    pub process_extension_mode: ProcessExtensionMode,
    pub sync_mode: SyncMode,
    /// Shared group id for synchronised recordings; see
    /// [`crate::generate_sync_id`].
    pub sync_id: u64,
    pub disable_bias_estimation: bool,
    pub disable_mag_dist_rejection: bool,
    pub disable_mag_data: bool,
}

/// Burst capture configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct BurstMode {
    pub acc_z_mode: u8,
    pub raw_mode: u8,
}

/// Recording target filename.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct RecordingConfig {
    pub filename: String,
}

/// Real-time streaming configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct RealTimeConfig {
    pub mode: RealTimeDataMode,
    /// Delivery rate limit in Hz; 0 selects the device default (50 Hz).
    pub rate_limit: u8,
}

/// Absolute clock value in nanoseconds since the Unix epoch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct AbsoluteTime {
    pub new_timestamp: i64,
}

/// Four-timestamp clock round-trip record. The host sends it with only
/// `host_send` filled; the device stamps its receive/send times; the host
/// fills `host_receive` on arrival.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct ClockRoundtrip {
    pub host_send: i64,
    pub sensor_receive: i64,
    pub sensor_send: i64,
    pub host_receive: i64,
}

/// Status LED override.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct LedConfig {
    pub mode: u8,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

/// Hardware sync-pulse output configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct SyncOutput {
    pub enabled: bool,
    pub interval_ms: u32,
}

/// A sync pulse observed by the device.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct SyncTrigger {
    pub timestamp: i64,
    pub sync_id: u64,
}

/// Periodic device status.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct Status {
    pub timestamp: i64,
    pub sensor_state: SensorState,
    /// Battery state of charge in percent.
    pub battery_level: u8,
    pub charging: bool,
    pub storage_free_kb: u32,
    pub storage_total_kb: u32,
}

/// Eight-sample packed record with gyro, accelerometer, and magnetometer.
///
/// Only the anchor orientation is transmitted (`quat`, smallest-three
/// encoded); the remaining seven orientations are reconstructed by
/// integrating the gyro samples. One `delta`/`error_flags` pair covers the
/// whole package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FullPacked {
    pub timestamp: i64,
    pub quat: u64,
    pub delta: i16,
    pub error_flags: u8,
    pub gyr: [[i16; 3]; 8],
    pub acc: [[i16; 3]; 8],
    pub mag: [[i16; 3]; 8],
}

/// Eight-sample packed record without magnetometer (6D fusion).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Full6dPacked {
    pub timestamp: i64,
    pub quat: u64,
    pub error_flags: u8,
    pub gyr: [[i16; 3]; 8],
    pub acc: [[i16; 3]; 8],
}

/// Single fixed-point sample with all sensors.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct FullFixed {
    pub timestamp: i64,
    pub quat: u64,
    pub gyr: [i16; 3],
    pub acc: [i16; 3],
    pub mag: [i16; 3],
    pub delta: i16,
    pub error_flags: u8,
}

/// Single fixed-point sample without magnetometer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct Full6dFixed {
    pub timestamp: i64,
    pub quat: u64,
    pub gyr: [i16; 3],
    pub acc: [i16; 3],
    pub error_flags: u8,
}

/// Single float sample with all sensors, already in SI units.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct FullFloat {
    pub timestamp: i64,
    pub quat: [f32; 4],
    pub gyr: [f32; 3],
    pub acc: [f32; 3],
    pub mag: [f32; 3],
    pub delta: f32,
    pub error_flags: u8,
}

/// Twenty-sample packed orientation record.
///
/// Gyro triplets are carried solely so the host can reconstruct the
/// nineteen non-anchor orientations; `delta` and `error_flags` are
/// per-sample here, unlike [`FullPacked`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuatPacked {
    pub timestamp: i64,
    pub quat: u64,
    pub gyr: [[i16; 3]; 20],
    pub delta: [i16; 20],
    pub error_flags: [u8; 20],
}

/// Single fixed-point orientation sample.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct QuatFixed {
    pub timestamp: i64,
    pub quat: u64,
    pub delta: i16,
    pub error_flags: u8,
}

/// Single float orientation sample.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct QuatFloat {
    pub timestamp: i64,
    pub quat: [f32; 4],
    pub delta: f32,
    pub error_flags: u8,
}

/// Raw high-rate burst of gyro and accelerometer counts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawBurst {
    pub timestamp: i64,
    pub gyr: [[i16; 3]; 12],
    pub acc: [[i16; 3]; 12],
}

/// Vertical-axis accelerometer burst (100 consecutive counts).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccZBurst {
    pub timestamp: i64,
    pub acc_z: [i16; 100],
}

/// Estimated sensor biases, interleaved when `calib_data_mode` is enabled.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct CalibData {
    pub timestamp: i64,
    /// Gyroscope bias counts; scale with
    /// [`crate::protocol::GYR_BIAS_SCALE`].
    pub gyr_bias: [i16; 3],
    pub acc_bias: [i16; 3],
    pub mag_bias: [i16; 3],
}

/// Number of files on the device filesystem.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct FsFileCount {
    pub file_count: u32,
}

/// One directory entry, sent `file_count` times in index order.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct FsFile {
    pub index: u32,
    pub size: u64,
    pub filename: String,
}

/// Filename argument of `CmdFsGetSize` / `CmdFsDeleteFile`.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct FsName {
    pub filename: String,
}

/// Size answer for `CmdFsGetSize`.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct FsSize {
    pub filename: String,
    pub file_size: u64,
}

/// Byte-range request. `end_pos == 0` means "to end of file".
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct FsGetBytes {
    pub filename: String,
    pub start_pos: u32,
    pub end_pos: u32,
}

/// One chunk of file content. The chunk length is whatever the frame's
/// payload size says (at most 232 bytes), never assumed.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct FsBytes {
    pub offset: u32,
    pub data: Vec<u8>,
}

/// Device-side rejection of a command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SensorErrorInfo {
    /// Raw header value of the rejected command.
    pub command: u16,
    pub code: SensorErrorCode,
}

impl SensorErrorInfo {
    /// The rejected command as a registry entry, if it is a known header.
    pub fn command_header(&self) -> Option<Header> {
        Header::from_u16(self.command)
    }
}

// ── Byte cursor helpers ───────────────────────────────────────────────────────
//
// Payload sizes are validated against the registry before any decoder runs,
// so the cursors index without per-field bounds checks.

const NAME_FIELD: usize = 65;

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self) -> u8 {
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }

    fn bool(&mut self) -> bool {
        self.u8() != 0
    }

    fn u16(&mut self) -> u16 {
        let v = u16::from_le_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        v
    }

    fn i16(&mut self) -> i16 {
        self.u16() as i16
    }

    fn u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    fn u64(&mut self) -> u64 {
        let v = u64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }

    fn i64(&mut self) -> i64 {
        self.u64() as i64
    }

    fn f32(&mut self) -> f32 {
        f32::from_bits(self.u32())
    }

    fn tri(&mut self) -> [i16; 3] {
        [self.i16(), self.i16(), self.i16()]
    }

    fn f32_n<const N: usize>(&mut self) -> [f32; N] {
        std::array::from_fn(|_| self.f32())
    }

    /// Null-padded ASCII field of fixed width.
    fn name(&mut self) -> String {
        let field = &self.buf[self.pos..self.pos + NAME_FIELD];
        self.pos += NAME_FIELD;
        let end = field.iter().position(|&b| b == 0).unwrap_or(NAME_FIELD);
        String::from_utf8_lossy(&field[..end]).into_owned()
    }

    fn rest(&mut self) -> Vec<u8> {
        let v = self.buf[self.pos..].to_vec();
        self.pos = self.buf.len();
        v
    }
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn bool(&mut self, v: bool) {
        self.u8(v as u8);
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn i16(&mut self, v: i16) {
        self.u16(v as u16);
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn i64(&mut self, v: i64) {
        self.u64(v as u64);
    }

    fn f32(&mut self, v: f32) {
        self.u32(v.to_bits());
    }

    fn tri(&mut self, v: [i16; 3]) {
        for c in v {
            self.i16(c);
        }
    }

    /// Null-padded ASCII field of fixed width; over-long names are truncated
    /// to the 64-character protocol limit.
    fn name(&mut self, s: &str) {
        let bytes = s.as_bytes();
        let take = bytes.len().min(NAME_FIELD - 1);
        self.buf.extend_from_slice(&bytes[..take]);
        self.buf.extend(std::iter::repeat(0).take(NAME_FIELD - take));
    }

    /// Fixed-width ASCII field without the 65-byte filename convention.
    fn ascii(&mut self, s: &str, width: usize) {
        let bytes = s.as_bytes();
        let take = bytes.len().min(width);
        self.buf.extend_from_slice(&bytes[..take]);
        self.buf.extend(std::iter::repeat(0).take(width - take));
    }
}

fn read_ascii(r: &mut Reader<'_>, width: usize) -> String {
    let field = &r.buf[r.pos..r.pos + width];
    r.pos += width;
    let end = field.iter().position(|&b| b == 0).unwrap_or(width);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

// ── Packet ────────────────────────────────────────────────────────────────────

/// A decoded packet: the tagged union over every registered header.
///
/// Reserved header values decode to [`Packet::Unknown`] so forward-compatible
/// applications can ignore packets this client version does not know.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    CmdGetDeviceInfo,
    DataDeviceInfo(DeviceInfo),
    CmdSleep,
    AckSleep,
    CmdDeepSleep,
    AckDeepSleep,
    CmdSetMeasurementMode(MeasurementMode),
    DataMeasurementMode(MeasurementMode),
    CmdSetBurstMode(BurstMode),
    DataBurstMode(BurstMode),
    CmdSetRecordingConfig(RecordingConfig),
    DataRecordingConfig(RecordingConfig),
    CmdStartRecording,
    AckStartRecording,
    CmdStopRecording,
    AckStopRecording,
    CmdStartStreaming,
    AckStartStreaming,
    CmdStopStreaming,
    AckStopStreaming,
    CmdStopStreamingAndClearBuffer,
    AckStopStreamingAndClearBuffer,
    CmdStartRealTimeStreaming(RealTimeConfig),
    AckStartRealTimeStreaming,
    CmdStopRealTimeStreaming,
    AckStopRealTimeStreaming,
    CmdSetAbsoluteTime(AbsoluteTime),
    DataAbsoluteTime(AbsoluteTime),
    DataClockRoundtrip(ClockRoundtrip),
    CmdSetLed(LedConfig),
    AckSetLed,
    CmdSetSyncOutput(SyncOutput),
    AckSetSyncOutput,
    DataSyncTrigger(SyncTrigger),
    DataStatus(Status),
    DataFullPacked(DataRate, FullPacked),
    DataFull6dPacked(DataRate, Full6dPacked),
    DataFullFixed(DataRate, FullFixed),
    DataFull6dFixed(DataRate, Full6dFixed),
    DataFullFloat(DataRate, FullFloat),
    DataQuatPacked(DataRate, QuatPacked),
    DataQuatFixed(DataRate, QuatFixed),
    DataQuatFloat(DataRate, QuatFloat),
    DataRawBurst(RawBurst),
    DataAccZBurst(AccZBurst),
    DataCalib(CalibData),
    CmdFsListFiles,
    DataFsFileCount(FsFileCount),
    DataFsFile(FsFile),
    CmdFsGetSize(FsName),
    DataFsSize(FsSize),
    CmdFsGetBytes(FsGetBytes),
    DataFsBytes(FsBytes),
    CmdFsStopGetBytes,
    AckFsStopGetBytes,
    CmdFsDeleteFile(FsName),
    AckFsDeleteFile,
    CmdFsFormatFilesystem,
    AckFsFormatFilesystem,
    SensorError(SensorErrorInfo),
    /// A frame whose header is not in the registry; carried opaquely.
    Unknown { header: u16, payload: Vec<u8> },
}

impl Packet {
    /// The registry entry this packet belongs to, `None` for
    /// [`Packet::Unknown`].
    pub fn header(&self) -> Option<Header> {
        use Packet::*;
        Some(match self {
            CmdGetDeviceInfo => Header::CmdGetDeviceInfo,
            DataDeviceInfo(_) => Header::DataDeviceInfo,
            CmdSleep => Header::CmdSleep,
            AckSleep => Header::AckSleep,
            CmdDeepSleep => Header::CmdDeepSleep,
            AckDeepSleep => Header::AckDeepSleep,
            CmdSetMeasurementMode(_) => Header::CmdSetMeasurementMode,
            DataMeasurementMode(_) => Header::DataMeasurementMode,
            CmdSetBurstMode(_) => Header::CmdSetBurstMode,
            DataBurstMode(_) => Header::DataBurstMode,
            CmdSetRecordingConfig(_) => Header::CmdSetRecordingConfig,
            DataRecordingConfig(_) => Header::DataRecordingConfig,
            CmdStartRecording => Header::CmdStartRecording,
            AckStartRecording => Header::AckStartRecording,
            CmdStopRecording => Header::CmdStopRecording,
            AckStopRecording => Header::AckStopRecording,
            CmdStartStreaming => Header::CmdStartStreaming,
            AckStartStreaming => Header::AckStartStreaming,
            CmdStopStreaming => Header::CmdStopStreaming,
            AckStopStreaming => Header::AckStopStreaming,
            CmdStopStreamingAndClearBuffer => Header::CmdStopStreamingAndClearBuffer,
            AckStopStreamingAndClearBuffer => Header::AckStopStreamingAndClearBuffer,
            CmdStartRealTimeStreaming(_) => Header::CmdStartRealTimeStreaming,
            AckStartRealTimeStreaming => Header::AckStartRealTimeStreaming,
            CmdStopRealTimeStreaming => Header::CmdStopRealTimeStreaming,
            AckStopRealTimeStreaming => Header::AckStopRealTimeStreaming,
            CmdSetAbsoluteTime(_) => Header::CmdSetAbsoluteTime,
            DataAbsoluteTime(_) => Header::DataAbsoluteTime,
            DataClockRoundtrip(_) => Header::DataClockRoundtrip,
            CmdSetLed(_) => Header::CmdSetLed,
            AckSetLed => Header::AckSetLed,
            CmdSetSyncOutput(_) => Header::CmdSetSyncOutput,
            AckSetSyncOutput => Header::AckSetSyncOutput,
            DataSyncTrigger(_) => Header::DataSyncTrigger,
            DataStatus(_) => Header::DataStatus,
            DataFullPacked(rate, _) => Header::DataFullPacked(*rate),
            DataFull6dPacked(rate, _) => Header::DataFull6dPacked(*rate),
            DataFullFixed(rate, _) => Header::DataFullFixed(*rate),
            DataFull6dFixed(rate, _) => Header::DataFull6dFixed(*rate),
            DataFullFloat(rate, _) => Header::DataFullFloat(*rate),
            DataQuatPacked(rate, _) => Header::DataQuatPacked(*rate),
            DataQuatFixed(rate, _) => Header::DataQuatFixed(*rate),
            DataQuatFloat(rate, _) => Header::DataQuatFloat(*rate),
            DataRawBurst(_) => Header::DataRawBurst,
            DataAccZBurst(_) => Header::DataAccZBurst,
            DataCalib(_) => Header::DataCalib,
            CmdFsListFiles => Header::CmdFsListFiles,
            DataFsFileCount(_) => Header::DataFsFileCount,
            DataFsFile(_) => Header::DataFsFile,
            CmdFsGetSize(_) => Header::CmdFsGetSize,
            DataFsSize(_) => Header::DataFsSize,
            CmdFsGetBytes(_) => Header::CmdFsGetBytes,
            DataFsBytes(_) => Header::DataFsBytes,
            CmdFsStopGetBytes => Header::CmdFsStopGetBytes,
            AckFsStopGetBytes => Header::AckFsStopGetBytes,
            CmdFsDeleteFile(_) => Header::CmdFsDeleteFile,
            AckFsDeleteFile => Header::AckFsDeleteFile,
            CmdFsFormatFilesystem => Header::CmdFsFormatFilesystem,
            AckFsFormatFilesystem => Header::AckFsFormatFilesystem,
            SensorError(_) => Header::SensorError,
            Unknown { .. } => return None,
        })
    }

    /// The 16-bit wire header, including unknown packets.
    pub fn raw_header(&self) -> u16 {
        match self {
            Packet::Unknown { header, .. } => *header,
            other => other.header().unwrap().as_u16(),
        }
    }

    /// Decode a validated frame into a typed packet.
    ///
    /// # Errors
    ///
    /// [`ImuError::Decode`] when the header is known but the payload length
    /// does not match the registry. Unknown headers are not an error.
    pub fn decode(frame: &Frame) -> Result<Packet, ImuError> {
        let Some(header) = Header::from_u16(frame.header) else {
            return Ok(Packet::Unknown {
                header: frame.header,
                payload: frame.payload.clone(),
            });
        };

        match header.payload_len() {
            PayloadLen::Fixed(expected) if frame.payload.len() != expected => {
                return Err(ImuError::Decode {
                    header,
                    expected,
                    got: frame.payload.len(),
                });
            }
            PayloadLen::Variable { min } if frame.payload.len() < min => {
                return Err(ImuError::Decode {
                    header,
                    expected: min,
                    got: frame.payload.len(),
                });
            }
            _ => {}
        }

        let r = &mut Reader::new(&frame.payload);
        use Header as H;
        Ok(match header {
            H::CmdGetDeviceInfo => Packet::CmdGetDeviceInfo,
            H::DataDeviceInfo => Packet::DataDeviceInfo(DeviceInfo {
                serial: read_ascii(r, 6),
                hardware_version: read_ascii(r, 16),
                firmware_version: read_ascii(r, 32),
            }),
            H::CmdSleep => Packet::CmdSleep,
            H::AckSleep => Packet::AckSleep,
            H::CmdDeepSleep => Packet::CmdDeepSleep,
            H::AckDeepSleep => Packet::AckDeepSleep,
            H::CmdSetMeasurementMode => Packet::CmdSetMeasurementMode(read_measurement_mode(r)),
            H::DataMeasurementMode => Packet::DataMeasurementMode(read_measurement_mode(r)),
            H::CmdSetBurstMode => Packet::CmdSetBurstMode(read_burst_mode(r)),
            H::DataBurstMode => Packet::DataBurstMode(read_burst_mode(r)),
            H::CmdSetRecordingConfig => {
                Packet::CmdSetRecordingConfig(RecordingConfig { filename: r.name() })
            }
            H::DataRecordingConfig => {
                Packet::DataRecordingConfig(RecordingConfig { filename: r.name() })
            }
            H::CmdStartRecording => Packet::CmdStartRecording,
            H::AckStartRecording => Packet::AckStartRecording,
            H::CmdStopRecording => Packet::CmdStopRecording,
            H::AckStopRecording => Packet::AckStopRecording,
            H::CmdStartStreaming => Packet::CmdStartStreaming,
            H::AckStartStreaming => Packet::AckStartStreaming,
            H::CmdStopStreaming => Packet::CmdStopStreaming,
            H::AckStopStreaming => Packet::AckStopStreaming,
            H::CmdStopStreamingAndClearBuffer => Packet::CmdStopStreamingAndClearBuffer,
            H::AckStopStreamingAndClearBuffer => Packet::AckStopStreamingAndClearBuffer,
            H::CmdStartRealTimeStreaming => Packet::CmdStartRealTimeStreaming(RealTimeConfig {
                mode: RealTimeDataMode::from_u8(r.u8()),
                rate_limit: r.u8(),
            }),
            H::AckStartRealTimeStreaming => Packet::AckStartRealTimeStreaming,
            H::CmdStopRealTimeStreaming => Packet::CmdStopRealTimeStreaming,
            H::AckStopRealTimeStreaming => Packet::AckStopRealTimeStreaming,
            H::CmdSetAbsoluteTime => Packet::CmdSetAbsoluteTime(AbsoluteTime {
                new_timestamp: r.i64(),
            }),
            H::DataAbsoluteTime => Packet::DataAbsoluteTime(AbsoluteTime {
                new_timestamp: r.i64(),
            }),
            H::DataClockRoundtrip => Packet::DataClockRoundtrip(ClockRoundtrip {
                host_send: r.i64(),
                sensor_receive: r.i64(),
                sensor_send: r.i64(),
                host_receive: r.i64(),
            }),
            H::CmdSetLed => Packet::CmdSetLed(LedConfig {
                mode: r.u8(),
                red: r.u8(),
                green: r.u8(),
                blue: r.u8(),
            }),
            H::AckSetLed => Packet::AckSetLed,
            H::CmdSetSyncOutput => Packet::CmdSetSyncOutput(SyncOutput {
                enabled: r.bool(),
                interval_ms: r.u32(),
            }),
            H::AckSetSyncOutput => Packet::AckSetSyncOutput,
            H::DataSyncTrigger => Packet::DataSyncTrigger(SyncTrigger {
                timestamp: r.i64(),
                sync_id: r.u64(),
            }),
            H::DataStatus => Packet::DataStatus(Status {
                timestamp: r.i64(),
                sensor_state: SensorState::from_u8(r.u8()),
                battery_level: r.u8(),
                charging: r.bool(),
                storage_free_kb: r.u32(),
                storage_total_kb: r.u32(),
            }),
            H::DataFullPacked(rate) => Packet::DataFullPacked(
                rate,
                FullPacked {
                    timestamp: r.i64(),
                    quat: r.u64(),
                    delta: r.i16(),
                    error_flags: r.u8(),
                    gyr: std::array::from_fn(|_| r.tri()),
                    acc: std::array::from_fn(|_| r.tri()),
                    mag: std::array::from_fn(|_| r.tri()),
                },
            ),
            H::DataFull6dPacked(rate) => Packet::DataFull6dPacked(
                rate,
                Full6dPacked {
                    timestamp: r.i64(),
                    quat: r.u64(),
                    error_flags: r.u8(),
                    gyr: std::array::from_fn(|_| r.tri()),
                    acc: std::array::from_fn(|_| r.tri()),
                },
            ),
            H::DataFullFixed(rate) => Packet::DataFullFixed(
                rate,
                FullFixed {
                    timestamp: r.i64(),
                    quat: r.u64(),
                    gyr: r.tri(),
                    acc: r.tri(),
                    mag: r.tri(),
                    delta: r.i16(),
                    error_flags: r.u8(),
                },
            ),
            H::DataFull6dFixed(rate) => Packet::DataFull6dFixed(
                rate,
                Full6dFixed {
                    timestamp: r.i64(),
                    quat: r.u64(),
                    gyr: r.tri(),
                    acc: r.tri(),
                    error_flags: r.u8(),
                },
            ),
            H::DataFullFloat(rate) => Packet::DataFullFloat(
                rate,
                FullFloat {
                    timestamp: r.i64(),
                    quat: r.f32_n(),
                    gyr: r.f32_n(),
                    acc: r.f32_n(),
                    mag: r.f32_n(),
                    delta: r.f32(),
                    error_flags: r.u8(),
                },
            ),
            H::DataQuatPacked(rate) => Packet::DataQuatPacked(
                rate,
                QuatPacked {
                    timestamp: r.i64(),
                    quat: r.u64(),
                    gyr: std::array::from_fn(|_| r.tri()),
                    delta: std::array::from_fn(|_| r.i16()),
                    error_flags: std::array::from_fn(|_| r.u8()),
                },
            ),
            H::DataQuatFixed(rate) => Packet::DataQuatFixed(
                rate,
                QuatFixed {
                    timestamp: r.i64(),
                    quat: r.u64(),
                    delta: r.i16(),
                    error_flags: r.u8(),
                },
            ),
            H::DataQuatFloat(rate) => Packet::DataQuatFloat(
                rate,
                QuatFloat {
                    timestamp: r.i64(),
                    quat: r.f32_n(),
                    delta: r.f32(),
                    error_flags: r.u8(),
                },
            ),
            H::DataRawBurst => Packet::DataRawBurst(RawBurst {
                timestamp: r.i64(),
                gyr: std::array::from_fn(|_| r.tri()),
                acc: std::array::from_fn(|_| r.tri()),
            }),
            H::DataAccZBurst => Packet::DataAccZBurst(AccZBurst {
                timestamp: r.i64(),
                acc_z: std::array::from_fn(|_| r.i16()),
            }),
            H::DataCalib => Packet::DataCalib(CalibData {
                timestamp: r.i64(),
                gyr_bias: r.tri(),
                acc_bias: r.tri(),
                mag_bias: r.tri(),
            }),
            H::CmdFsListFiles => Packet::CmdFsListFiles,
            H::DataFsFileCount => Packet::DataFsFileCount(FsFileCount {
                file_count: r.u32(),
            }),
            H::DataFsFile => Packet::DataFsFile(FsFile {
                index: r.u32(),
                size: r.u64(),
                filename: r.name(),
            }),
            H::CmdFsGetSize => Packet::CmdFsGetSize(FsName { filename: r.name() }),
            H::DataFsSize => Packet::DataFsSize(FsSize {
                filename: r.name(),
                file_size: r.u64(),
            }),
            H::CmdFsGetBytes => Packet::CmdFsGetBytes(FsGetBytes {
                filename: r.name(),
                start_pos: r.u32(),
                end_pos: r.u32(),
            }),
            H::DataFsBytes => Packet::DataFsBytes(FsBytes {
                offset: r.u32(),
                data: r.rest(),
            }),
            H::CmdFsStopGetBytes => Packet::CmdFsStopGetBytes,
            H::AckFsStopGetBytes => Packet::AckFsStopGetBytes,
            H::CmdFsDeleteFile => Packet::CmdFsDeleteFile(FsName { filename: r.name() }),
            H::AckFsDeleteFile => Packet::AckFsDeleteFile,
            H::CmdFsFormatFilesystem => Packet::CmdFsFormatFilesystem,
            H::AckFsFormatFilesystem => Packet::AckFsFormatFilesystem,
            H::SensorError => Packet::SensorError(SensorErrorInfo {
                command: r.u16(),
                code: SensorErrorCode::from_u8(r.u8()),
            }),
        })
    }

    /// Serialise the payload in registry layout (no frame envelope).
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut w = Writer::default();
        use Packet::*;
        match self {
            CmdGetDeviceInfo | CmdSleep | AckSleep | CmdDeepSleep | AckDeepSleep
            | CmdStartRecording | AckStartRecording | CmdStopRecording | AckStopRecording
            | CmdStartStreaming | AckStartStreaming | CmdStopStreaming | AckStopStreaming
            | CmdStopStreamingAndClearBuffer | AckStopStreamingAndClearBuffer
            | AckStartRealTimeStreaming | CmdStopRealTimeStreaming | AckStopRealTimeStreaming
            | AckSetLed | AckSetSyncOutput | CmdFsListFiles | CmdFsStopGetBytes
            | AckFsStopGetBytes | AckFsDeleteFile | CmdFsFormatFilesystem
            | AckFsFormatFilesystem => {}
            DataDeviceInfo(info) => {
                w.ascii(&info.serial, 6);
                w.ascii(&info.hardware_version, 16);
                w.ascii(&info.firmware_version, 32);
            }
            CmdSetMeasurementMode(mode) | DataMeasurementMode(mode) => {
                write_measurement_mode(&mut w, mode);
            }
            CmdSetBurstMode(mode) | DataBurstMode(mode) => {
                w.u8(mode.acc_z_mode);
                w.u8(mode.raw_mode);
            }
            CmdSetRecordingConfig(cfg) | DataRecordingConfig(cfg) => w.name(&cfg.filename),
            CmdStartRealTimeStreaming(cfg) => {
                w.u8(cfg.mode.as_u8());
                w.u8(cfg.rate_limit);
            }
            CmdSetAbsoluteTime(t) | DataAbsoluteTime(t) => w.i64(t.new_timestamp),
            DataClockRoundtrip(c) => {
                w.i64(c.host_send);
                w.i64(c.sensor_receive);
                w.i64(c.sensor_send);
                w.i64(c.host_receive);
            }
            CmdSetLed(led) => {
                w.u8(led.mode);
                w.u8(led.red);
                w.u8(led.green);
                w.u8(led.blue);
            }
            CmdSetSyncOutput(sync) => {
                w.bool(sync.enabled);
                w.u32(sync.interval_ms);
            }
            DataSyncTrigger(trig) => {
                w.i64(trig.timestamp);
                w.u64(trig.sync_id);
            }
            DataStatus(status) => {
                w.i64(status.timestamp);
                w.u8(status.sensor_state.as_u8());
                w.u8(status.battery_level);
                w.bool(status.charging);
                w.u32(status.storage_free_kb);
                w.u32(status.storage_total_kb);
            }
            DataFullPacked(_, p) => {
                w.i64(p.timestamp);
                w.u64(p.quat);
                w.i16(p.delta);
                w.u8(p.error_flags);
                for t in p.gyr {
                    w.tri(t);
                }
                for t in p.acc {
                    w.tri(t);
                }
                for t in p.mag {
                    w.tri(t);
                }
            }
            DataFull6dPacked(_, p) => {
                w.i64(p.timestamp);
                w.u64(p.quat);
                w.u8(p.error_flags);
                for t in p.gyr {
                    w.tri(t);
                }
                for t in p.acc {
                    w.tri(t);
                }
            }
            DataFullFixed(_, p) => {
                w.i64(p.timestamp);
                w.u64(p.quat);
                w.tri(p.gyr);
                w.tri(p.acc);
                w.tri(p.mag);
                w.i16(p.delta);
                w.u8(p.error_flags);
            }
            DataFull6dFixed(_, p) => {
                w.i64(p.timestamp);
                w.u64(p.quat);
                w.tri(p.gyr);
                w.tri(p.acc);
                w.u8(p.error_flags);
            }
            DataFullFloat(_, p) => {
                w.i64(p.timestamp);
                for v in p.quat {
                    w.f32(v);
                }
                for v in p.gyr {
                    w.f32(v);
                }
                for v in p.acc {
                    w.f32(v);
                }
                for v in p.mag {
                    w.f32(v);
                }
                w.f32(p.delta);
                w.u8(p.error_flags);
            }
            DataQuatPacked(_, p) => {
                w.i64(p.timestamp);
                w.u64(p.quat);
                for t in p.gyr {
                    w.tri(t);
                }
                for d in p.delta {
                    w.i16(d);
                }
                for e in p.error_flags {
                    w.u8(e);
                }
            }
            DataQuatFixed(_, p) => {
                w.i64(p.timestamp);
                w.u64(p.quat);
                w.i16(p.delta);
                w.u8(p.error_flags);
            }
            DataQuatFloat(_, p) => {
                w.i64(p.timestamp);
                for v in p.quat {
                    w.f32(v);
                }
                w.f32(p.delta);
                w.u8(p.error_flags);
            }
            DataRawBurst(p) => {
                w.i64(p.timestamp);
                for t in p.gyr {
                    w.tri(t);
                }
                for t in p.acc {
                    w.tri(t);
                }
            }
            DataAccZBurst(p) => {
                w.i64(p.timestamp);
                for v in p.acc_z {
                    w.i16(v);
                }
            }
            DataCalib(p) => {
                w.i64(p.timestamp);
                w.tri(p.gyr_bias);
                w.tri(p.acc_bias);
                w.tri(p.mag_bias);
            }
            DataFsFileCount(c) => w.u32(c.file_count),
            DataFsFile(f) => {
                w.u32(f.index);
                w.u64(f.size);
                w.name(&f.filename);
            }
            CmdFsGetSize(n) | CmdFsDeleteFile(n) => w.name(&n.filename),
            DataFsSize(s) => {
                w.name(&s.filename);
                w.u64(s.file_size);
            }
            CmdFsGetBytes(g) => {
                w.name(&g.filename);
                w.u32(g.start_pos);
                w.u32(g.end_pos);
            }
            DataFsBytes(b) => {
                w.u32(b.offset);
                w.buf.extend_from_slice(&b.data);
            }
            SensorError(e) => {
                w.u16(e.command);
                w.u8(e.code.as_u8());
            }
            Unknown { payload, .. } => w.buf.extend_from_slice(payload),
        }

        debug_assert!(w.buf.len() <= MAX_PAYLOAD);
        w.buf
    }

    /// Build the full 244-byte wire frame for this packet.
    pub fn to_frame(&self) -> [u8; FRAME_SIZE] {
        Frame::encode(self.raw_header(), &self.encode_payload())
    }
}

fn read_measurement_mode(r: &mut Reader<'_>) -> MeasurementMode {
    MeasurementMode {
        timestamp: r.i64(),
        full_float_200hz: r.bool(),
        full_fixed_mode: SamplingMode::from_u8(r.u8()),
        full_packed_mode: SamplingMode::from_u8(r.u8()),
        quat_float_mode: SamplingMode::from_u8(r.u8()),
        quat_fixed_mode: SamplingMode::from_u8(r.u8()),
        quat_packed_mode: SamplingMode::from_u8(r.u8()),
        status_mode: r.u8(),
        calib_data_mode: CalibDataMode::from_u8(r.u8()),
        process_extension_mode: ProcessExtensionMode::from_u8(r.u8()),
        sync_mode: SyncMode::from_u8(r.u8()),
        sync_id: r.u64(),
        disable_bias_estimation: r.bool(),
        disable_mag_dist_rejection: r.bool(),
        disable_mag_data: r.bool(),
    }
}

fn write_measurement_mode(w: &mut Writer, mode: &MeasurementMode) {
    w.i64(mode.timestamp);
    w.bool(mode.full_float_200hz);
    w.u8(mode.full_fixed_mode.as_u8());
    w.u8(mode.full_packed_mode.as_u8());
    w.u8(mode.quat_float_mode.as_u8());
    w.u8(mode.quat_fixed_mode.as_u8());
    w.u8(mode.quat_packed_mode.as_u8());
    w.u8(mode.status_mode);
    w.u8(mode.calib_data_mode.as_u8());
    w.u8(mode.process_extension_mode.as_u8());
    w.u8(mode.sync_mode.as_u8());
    w.u64(mode.sync_id);
    w.bool(mode.disable_bias_estimation);
    w.bool(mode.disable_mag_dist_rejection);
    w.bool(mode.disable_mag_data);
}

fn read_burst_mode(r: &mut Reader<'_>) -> BurstMode {
    BurstMode {
        acc_z_mode: r.u8(),
        raw_mode: r.u8(),
    }
}

// ── Recorded files ────────────────────────────────────────────────────────────

/// Parse a persisted recording: the file is a direct concatenation of wire
/// frames, so this is equivalent to feeding the bytes to an [`Unpacker`].
///
/// Unknown headers come back as [`Packet::Unknown`]; frames whose payload
/// size disagrees with the registry are skipped with a warning.
pub fn load_binary_file(path: impl AsRef<Path>) -> std::io::Result<Vec<Packet>> {
    let mut file = std::fs::File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    let mut unpacker = Unpacker::new();
    unpacker.feed(&bytes);

    let mut packets = Vec::new();
    while let Some(frame) = unpacker.next_frame() {
        match Packet::decode(&frame) {
            Ok(packet) => packets.push(packet),
            Err(e) => log::warn!("skipping undecodable frame: {e}"),
        }
    }
    if unpacker.dropped_bytes() > 0 {
        log::warn!(
            "{} bytes of the recording were not valid frames",
            unpacker.dropped_bytes()
        );
    }
    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet: Packet) {
        let wire = packet.to_frame();
        let frame = Frame::decode(&wire).unwrap();
        assert_eq!(Packet::decode(&frame).unwrap(), packet);
    }

    #[test]
    fn header_wire_values_roundtrip() {
        // Every registered value maps back to itself through the enum.
        for value in 0x0100..=0x0500u16 {
            if let Some(header) = Header::from_u16(value) {
                assert_eq!(header.as_u16(), value, "header 0x{value:04X}");
            }
        }
    }

    #[test]
    fn set_absolute_time_encodes_little_endian() {
        let packet = Packet::CmdSetAbsoluteTime(AbsoluteTime {
            new_timestamp: 1_700_000_000_000_000_000,
        });
        assert_eq!(packet.raw_header(), 0x0170);
        assert_eq!(
            packet.encode_payload(),
            1_700_000_000_000_000_000i64.to_le_bytes().to_vec()
        );
        roundtrip(packet);
    }

    #[test]
    fn empty_payload_packets_roundtrip() {
        roundtrip(Packet::CmdGetDeviceInfo);
        roundtrip(Packet::AckStartRecording);
        roundtrip(Packet::AckStopStreamingAndClearBuffer);
        roundtrip(Packet::CmdFsFormatFilesystem);
    }

    #[test]
    fn device_info_roundtrip() {
        roundtrip(Packet::DataDeviceInfo(DeviceInfo {
            serial: "ab1234".into(),
            hardware_version: "rev C".into(),
            firmware_version: "2.4.1".into(),
        }));
    }

    #[test]
    fn measurement_mode_roundtrip() {
        roundtrip(Packet::CmdSetMeasurementMode(MeasurementMode {
            timestamp: 123,
            full_packed_mode: SamplingMode::Hz200,
            status_mode: 1,
            sync_mode: SyncMode::Sender,
            sync_id: 0xDEAD_BEEF_CAFE_F00D,
            disable_mag_data: true,
            ..Default::default()
        }));
    }

    #[test]
    fn status_roundtrip() {
        roundtrip(Packet::DataStatus(Status {
            timestamp: -5,
            sensor_state: SensorState::Recording,
            battery_level: 87,
            charging: true,
            storage_free_kb: 1024,
            storage_total_kb: 8192,
        }));
    }

    #[test]
    fn full_packed_roundtrip() {
        let mut gyr = [[0i16; 3]; 8];
        gyr[3] = [100, -200, 300];
        roundtrip(Packet::DataFullPacked(
            DataRate::Hz100,
            FullPacked {
                timestamp: 42_000,
                quat: 0x8FFF_F000_1234_5678,
                delta: -400,
                error_flags: error_flags::TIME_GAP | error_flags::MAG_CLIPPING,
                gyr,
                acc: [[1, 2, 3]; 8],
                mag: [[-9, 8, -7]; 8],
            },
        ));
    }

    #[test]
    fn quat_packed_roundtrip() {
        let mut delta = [0i16; 20];
        delta[19] = 777;
        roundtrip(Packet::DataQuatPacked(
            DataRate::Rt,
            QuatPacked {
                timestamp: 1,
                quat: u64::MAX,
                gyr: [[5, 5, 5]; 20],
                delta,
                error_flags: [0; 20],
            },
        ));
    }

    #[test]
    fn float_packets_roundtrip() {
        roundtrip(Packet::DataFullFloat(
            DataRate::Hz50,
            FullFloat {
                timestamp: 7,
                quat: [1.0, 0.0, 0.0, 0.0],
                gyr: [0.1, -0.2, 0.3],
                acc: [0.0, 0.0, 9.81],
                mag: [20.0, -5.0, 43.5],
                delta: 0.25,
                error_flags: 0,
            },
        ));
        roundtrip(Packet::DataQuatFloat(
            DataRate::Hz1,
            QuatFloat {
                timestamp: -1,
                quat: [0.5, 0.5, 0.5, 0.5],
                delta: -0.5,
                error_flags: error_flags::PROCESSING_ISSUE,
            },
        ));
    }

    #[test]
    fn burst_and_calib_roundtrip() {
        roundtrip(Packet::DataRawBurst(RawBurst {
            timestamp: 99,
            gyr: [[1, -1, 1]; 12],
            acc: [[-2, 2, -2]; 12],
        }));
        roundtrip(Packet::DataAccZBurst(AccZBurst {
            timestamp: 100,
            acc_z: [i16::MIN; 100],
        }));
        roundtrip(Packet::DataCalib(CalibData {
            timestamp: 0,
            gyr_bias: [10, -10, 5],
            acc_bias: [0, 0, 0],
            mag_bias: [1, 2, 3],
        }));
    }

    #[test]
    fn filesystem_packets_roundtrip() {
        roundtrip(Packet::DataFsFileCount(FsFileCount { file_count: 3 }));
        roundtrip(Packet::DataFsFile(FsFile {
            index: 2,
            size: 1_048_576,
            filename: "2025-07-01_120000_rec".into(),
        }));
        roundtrip(Packet::CmdFsGetBytes(FsGetBytes {
            filename: "2025-07-01_120000_rec".into(),
            start_pos: 4096,
            end_pos: 0,
        }));
        roundtrip(Packet::CmdFsDeleteFile(FsName {
            filename: "old".into(),
        }));
        roundtrip(Packet::DataFsSize(FsSize {
            filename: "x".into(),
            file_size: 12,
        }));
    }

    #[test]
    fn fs_bytes_is_variable_size() {
        // Shorter than the 232-byte maximum chunk must decode fine.
        roundtrip(Packet::DataFsBytes(FsBytes {
            offset: 8,
            data: vec![0xAB; 17],
        }));
        // And the full-size chunk fills the payload slot exactly.
        let full = Packet::DataFsBytes(FsBytes {
            offset: 0,
            data: vec![0x11; 232],
        });
        assert_eq!(full.encode_payload().len(), MAX_PAYLOAD);
        roundtrip(full);

        // Below the 4-byte offset it is malformed.
        let frame = Frame {
            header: Header::DataFsBytes.as_u16(),
            payload: vec![0, 0],
        };
        assert!(matches!(
            Packet::decode(&frame),
            Err(ImuError::Decode { .. })
        ));
    }

    #[test]
    fn clock_and_sync_roundtrip() {
        roundtrip(Packet::DataClockRoundtrip(ClockRoundtrip {
            host_send: 1000,
            sensor_receive: 1050,
            sensor_send: 1060,
            host_receive: 1120,
        }));
        roundtrip(Packet::DataSyncTrigger(SyncTrigger {
            timestamp: 444,
            sync_id: 0x0123_4567_89AB_CDEF,
        }));
        roundtrip(Packet::CmdSetSyncOutput(SyncOutput {
            enabled: true,
            interval_ms: 1000,
        }));
        roundtrip(Packet::CmdSetLed(LedConfig {
            mode: 1,
            red: 255,
            green: 0,
            blue: 128,
        }));
    }

    #[test]
    fn sensor_error_roundtrip() {
        let packet = Packet::SensorError(SensorErrorInfo {
            command: Header::CmdStartRecording.as_u16(),
            code: SensorErrorCode::WrongState,
        });
        roundtrip(packet.clone());
        if let Packet::SensorError(info) = packet {
            assert_eq!(info.command_header(), Some(Header::CmdStartRecording));
        }
    }

    #[test]
    fn unknown_header_is_carried_opaquely() {
        let frame = Frame {
            header: 0x0567,
            payload: vec![1, 2, 3],
        };
        let packet = Packet::decode(&frame).unwrap();
        assert_eq!(
            packet,
            Packet::Unknown {
                header: 0x0567,
                payload: vec![1, 2, 3]
            }
        );
        assert_eq!(packet.raw_header(), 0x0567);
        assert_eq!(packet.header(), None);
        // Opaque packets re-encode byte-identically.
        let wire = packet.to_frame();
        assert_eq!(Frame::decode(&wire).unwrap(), frame);
    }

    #[test]
    fn size_mismatch_is_a_decode_error() {
        let frame = Frame {
            header: Header::DataStatus.as_u16(),
            payload: vec![0; 18],
        };
        assert!(matches!(
            Packet::decode(&frame),
            Err(ImuError::Decode {
                header: Header::DataStatus,
                expected: 19,
                got: 18,
            })
        ));
    }

    #[test]
    fn rate_slots_map_to_headers() {
        assert_eq!(
            Header::from_u16(0x0290),
            Some(Header::DataFullPacked(DataRate::Hz200))
        );
        assert_eq!(
            Header::from_u16(0x0296),
            Some(Header::DataFullPacked(DataRate::Rt))
        );
        assert_eq!(
            Header::from_u16(0x02C6),
            Some(Header::DataQuatFixed(DataRate::Rt))
        );
        // The unused eighth slot of each family is reserved.
        assert_eq!(Header::from_u16(0x0297), None);
        assert_eq!(Header::DataQuatFloat(DataRate::Hz10).as_u16(), 0x02CC);
    }

    #[test]
    fn sample_periods() {
        assert_eq!(DataRate::Hz200.sample_period_ns(), 5_000_000);
        assert_eq!(DataRate::Hz1.sample_period_ns(), 1_000_000_000);
        assert_eq!(DataRate::Rt.sample_period_ns(), 5_000_000);
    }

    #[test]
    fn payload_sizes_match_encoders() {
        // The registry sizes and the encoders must agree for defaults of
        // every fixed-size family.
        let packets = vec![
            Packet::DataDeviceInfo(DeviceInfo::default()),
            Packet::CmdSetMeasurementMode(MeasurementMode::default()),
            Packet::CmdSetBurstMode(BurstMode::default()),
            Packet::CmdSetRecordingConfig(RecordingConfig::default()),
            Packet::CmdStartRealTimeStreaming(RealTimeConfig::default()),
            Packet::CmdSetAbsoluteTime(AbsoluteTime::default()),
            Packet::DataClockRoundtrip(ClockRoundtrip::default()),
            Packet::CmdSetLed(LedConfig::default()),
            Packet::CmdSetSyncOutput(SyncOutput::default()),
            Packet::DataSyncTrigger(SyncTrigger::default()),
            Packet::DataStatus(Status::default()),
            Packet::DataFullPacked(
                DataRate::Hz200,
                FullPacked {
                    timestamp: 0,
                    quat: 0,
                    delta: 0,
                    error_flags: 0,
                    gyr: [[0; 3]; 8],
                    acc: [[0; 3]; 8],
                    mag: [[0; 3]; 8],
                },
            ),
            Packet::DataFull6dPacked(
                DataRate::Hz200,
                Full6dPacked {
                    timestamp: 0,
                    quat: 0,
                    error_flags: 0,
                    gyr: [[0; 3]; 8],
                    acc: [[0; 3]; 8],
                },
            ),
            Packet::DataFullFixed(DataRate::Hz200, FullFixed::default()),
            Packet::DataFull6dFixed(DataRate::Hz200, Full6dFixed::default()),
            Packet::DataFullFloat(DataRate::Hz200, FullFloat::default()),
            Packet::DataQuatPacked(
                DataRate::Hz200,
                QuatPacked {
                    timestamp: 0,
                    quat: 0,
                    gyr: [[0; 3]; 20],
                    delta: [0; 20],
                    error_flags: [0; 20],
                },
            ),
            Packet::DataQuatFixed(DataRate::Hz200, QuatFixed::default()),
            Packet::DataQuatFloat(DataRate::Hz200, QuatFloat::default()),
            Packet::DataRawBurst(RawBurst {
                timestamp: 0,
                gyr: [[0; 3]; 12],
                acc: [[0; 3]; 12],
            }),
            Packet::DataAccZBurst(AccZBurst {
                timestamp: 0,
                acc_z: [0; 100],
            }),
            Packet::DataCalib(CalibData::default()),
            Packet::DataFsFileCount(FsFileCount::default()),
            Packet::DataFsFile(FsFile::default()),
            Packet::CmdFsGetSize(FsName::default()),
            Packet::DataFsSize(FsSize::default()),
            Packet::CmdFsGetBytes(FsGetBytes::default()),
            Packet::SensorError(SensorErrorInfo {
                command: 0,
                code: SensorErrorCode::Unknown(0),
            }),
        ];
        for packet in packets {
            let header = packet.header().unwrap();
            match header.payload_len() {
                PayloadLen::Fixed(size) => {
                    assert_eq!(packet.encode_payload().len(), size, "{header:?}");
                }
                PayloadLen::Variable { .. } => unreachable!(),
            }
        }
    }

    #[test]
    fn load_binary_file_reads_concatenated_frames() {
        let dir = std::env::temp_dir().join("imu_rs_load_binary_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("recording.bin");

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&Packet::DataStatus(Status::default()).to_frame());
        bytes.extend_from_slice(
            &Packet::DataQuatFixed(DataRate::Hz50, QuatFixed::default()).to_frame(),
        );
        std::fs::write(&path, &bytes).unwrap();

        let packets = load_binary_file(&path).unwrap();
        assert_eq!(packets.len(), 2);
        assert!(matches!(packets[0], Packet::DataStatus(_)));
        assert!(matches!(
            packets[1],
            Packet::DataQuatFixed(DataRate::Hz50, _)
        ));
        std::fs::remove_file(&path).ok();
    }
}
