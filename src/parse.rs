//! Decoders from wire representation to SI units.
//!
//! All functions in this module are pure (no I/O) and safe to call from any
//! async or sync context. The heavy lifting is the smallest-three quaternion
//! codec and the reconstruction of per-sample orientations from packed
//! records, which only transmit one anchor quaternion plus raw gyro counts.

use crate::packets::{
    ClockRoundtrip, DataRate, Full6dFixed, Full6dPacked, FullFixed, FullFloat, FullPacked,
    QuatFixed, QuatFloat, QuatPacked,
};
use crate::protocol::{ACC_SCALE, DELTA_SCALE, GYR_BIAS_SCALE, GYR_SCALE, MAG_SCALE};
use crate::quat::Quaternion;

// ── Fixed-point → SI ──────────────────────────────────────────────────────────

fn scale_tri(v: [i16; 3], k: f64) -> [f64; 3] {
    [v[0] as f64 * k, v[1] as f64 * k, v[2] as f64 * k]
}

/// Gyroscope counts → rad/s.
pub fn decode_gyr(v: [i16; 3]) -> [f64; 3] {
    scale_tri(v, GYR_SCALE)
}

/// Accelerometer counts → m/s².
pub fn decode_acc(v: [i16; 3]) -> [f64; 3] {
    scale_tri(v, ACC_SCALE)
}

/// Magnetometer counts → µT.
pub fn decode_mag(v: [i16; 3]) -> [f64; 3] {
    scale_tri(v, MAG_SCALE)
}

/// Heading-offset counts → rad.
pub fn decode_delta(v: i16) -> f64 {
    v as f64 * DELTA_SCALE
}

/// Gyroscope-bias counts → rad/s.
pub fn decode_gyr_bias(v: [i16; 3]) -> [f64; 3] {
    scale_tri(v, GYR_BIAS_SCALE)
}

// ── Smallest-three quaternion codec ───────────────────────────────────────────

/// Number of values representable in one 20-bit component field.
const QUAT_FIELD_MAX: f64 = 0xFFFFF as f64;

/// Decode a smallest-three 64-bit quaternion word.
///
/// Bit layout, low to high: three 20-bit component fields, 2-bit index of
/// the omitted component, restDetected, magDistDetected. Reading the fields
/// upward from the lowest, they hold components `(axis+3) % 4`,
/// `(axis+2) % 4`, and `(axis+1) % 4`; the omitted component is recovered
/// from the unit-norm constraint. Quantisation noise can push the stored
/// square sum slightly past one, so the value under the square root clamps
/// at zero.
///
/// Returns the quaternion and the `(rest_detected, mag_dist_detected)` flags.
pub fn decode_quat64(word: u64) -> (Quaternion, bool, bool) {
    let rest = (word >> 62) & 1 != 0;
    let mag_dist = (word >> 63) & 1 != 0;
    let axis = ((word >> 60) & 3) as usize;

    let mut components = [0.0f64; 4];
    let mut sq_sum = 0.0;
    let mut w = word;
    for i in (1..=3).rev() {
        let raw = (w & 0xFFFFF) as f64;
        let value = raw / (QUAT_FIELD_MAX / std::f64::consts::SQRT_2) - 1.0 / std::f64::consts::SQRT_2;
        components[(axis + i) % 4] = value;
        sq_sum += value * value;
        w >>= 20;
    }
    components[axis] = (1.0 - sq_sum).max(0.0).sqrt();

    (
        Quaternion::new(components[0], components[1], components[2], components[3]),
        rest,
        mag_dist,
    )
}

/// Encode a unit quaternion into the smallest-three 64-bit word.
///
/// The omitted component is the one with the largest magnitude; the sign of
/// the whole quaternion is flipped if needed so that it is non-negative
/// (`q` and `-q` encode the same rotation).
pub fn encode_quat64(q: &Quaternion, rest: bool, mag_dist: bool) -> u64 {
    let components = [q.w, q.x, q.y, q.z];
    let axis = components
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.abs().total_cmp(&b.abs()))
        .map(|(i, _)| i)
        .unwrap();

    let sign = if components[axis] < 0.0 { -1.0 } else { 1.0 };

    let mut word = 0u64;
    // Highest-placed field first: component (axis+1)%4 sits in bits 40..60.
    for i in 1..=3 {
        let value = sign * components[(axis + i) % 4];
        let raw = ((value + 1.0 / std::f64::consts::SQRT_2)
            * (QUAT_FIELD_MAX / std::f64::consts::SQRT_2))
            .round()
            .clamp(0.0, QUAT_FIELD_MAX) as u64;
        word = (word << 20) | raw;
    }

    word |= (axis as u64) << 60;
    word |= (rest as u64) << 62;
    word |= (mag_dist as u64) << 63;
    word
}

// ── Parsed records ────────────────────────────────────────────────────────────

/// One decoded sensor sample in SI units.
///
/// Produced by the single-sample packet families; `gyr`/`acc`/`mag` are
/// `None` for families that do not carry them.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorSample {
    /// Nanoseconds since the Unix epoch (provided the device clock was set
    /// via `CmdSetAbsoluteTime`).
    pub timestamp_ns: i64,
    pub gyr: Option<[f64; 3]>,
    pub acc: Option<[f64; 3]>,
    pub mag: Option<[f64; 3]>,
    /// 6D orientation (w, x, y, z).
    pub quat: Quaternion,
    /// 9D orientation: `quat` with the heading offset composed on top.
    pub quat_9d: Quaternion,
    /// Heading offset in rad; 0 for the 6D families.
    pub delta: f64,
    pub rest_detected: bool,
    pub mag_dist_detected: bool,
    pub error_flags: u8,
}

/// A decoded multi-sample record from one packed packet.
///
/// All per-sample vectors have one entry per sample. `delta` and
/// `error_flags` keep the wire shape: length 1 when the packet carries a
/// single package-level value (`DataFullPacked`), full length when it is
/// per-sample (`DataQuatPacked`), empty when absent (`DataFull6dPacked`).
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBlock {
    pub timestamps_ns: Vec<i64>,
    pub gyr: Vec<[f64; 3]>,
    pub acc: Vec<[f64; 3]>,
    pub mag: Vec<[f64; 3]>,
    pub quat: Vec<Quaternion>,
    pub quat_9d: Vec<Quaternion>,
    pub delta: Vec<f64>,
    pub error_flags: Vec<u8>,
    /// Flags of the anchor sample (not transmitted for the others).
    pub rest_detected: bool,
    pub mag_dist_detected: bool,
}

fn sample_timestamps(start_ns: i64, n: usize, rate: DataRate) -> Vec<i64> {
    let period = rate.sample_period_ns();
    (0..n as i64).map(|i| start_ns + i * period).collect()
}

/// Extrapolate the per-sample orientations of a packed record.
///
/// Sample 0 is the anchor; sample i (i ≥ 1) applies the incremental rotation
/// integrated from gyro sample i over one sample period, renormalising at
/// every step.
fn reconstruct_quats(anchor: Quaternion, gyr_si: &[[f64; 3]], rate: DataRate) -> Vec<Quaternion> {
    let mut quats = Vec::with_capacity(gyr_si.len());
    let mut q = anchor;
    quats.push(q);
    for gyr in gyr_si.iter().skip(1) {
        q = q.multiply(&Quaternion::from_gyr(*gyr, rate.hz())).normalized();
        quats.push(q);
    }
    quats
}

impl FullPacked {
    /// Decode to SI units and reconstruct all eight sample orientations.
    pub fn parse(&self, rate: DataRate) -> SampleBlock {
        let (anchor, rest, mag_dist) = decode_quat64(self.quat);
        let gyr: Vec<[f64; 3]> = self.gyr.iter().map(|&t| decode_gyr(t)).collect();
        let quat = reconstruct_quats(anchor, &gyr, rate);
        let delta = decode_delta(self.delta);
        let quat_9d = quat.iter().map(|q| q.add_heading(delta)).collect();

        SampleBlock {
            timestamps_ns: sample_timestamps(self.timestamp, self.gyr.len(), rate),
            gyr,
            acc: self.acc.iter().map(|&t| decode_acc(t)).collect(),
            mag: self.mag.iter().map(|&t| decode_mag(t)).collect(),
            quat,
            quat_9d,
            delta: vec![delta],
            error_flags: vec![self.error_flags],
            rest_detected: rest,
            mag_dist_detected: mag_dist,
        }
    }
}

impl Full6dPacked {
    /// Decode to SI units and reconstruct all eight sample orientations.
    ///
    /// Without a magnetometer there is no heading offset; `quat_9d` equals
    /// `quat` and `delta` is empty.
    pub fn parse(&self, rate: DataRate) -> SampleBlock {
        let (anchor, rest, mag_dist) = decode_quat64(self.quat);
        let gyr: Vec<[f64; 3]> = self.gyr.iter().map(|&t| decode_gyr(t)).collect();
        let quat = reconstruct_quats(anchor, &gyr, rate);

        SampleBlock {
            timestamps_ns: sample_timestamps(self.timestamp, self.gyr.len(), rate),
            quat_9d: quat.clone(),
            gyr,
            acc: self.acc.iter().map(|&t| decode_acc(t)).collect(),
            mag: Vec::new(),
            quat,
            delta: Vec::new(),
            error_flags: vec![self.error_flags],
            rest_detected: rest,
            mag_dist_detected: mag_dist,
        }
    }
}

impl QuatPacked {
    /// Decode and reconstruct all twenty sample orientations.
    ///
    /// The gyro counts exist only to drive the reconstruction, but they are
    /// exposed anyway; `delta` and `error_flags` are per-sample here.
    pub fn parse(&self, rate: DataRate) -> SampleBlock {
        let (anchor, rest, mag_dist) = decode_quat64(self.quat);
        let gyr: Vec<[f64; 3]> = self.gyr.iter().map(|&t| decode_gyr(t)).collect();
        let quat = reconstruct_quats(anchor, &gyr, rate);
        let delta: Vec<f64> = self.delta.iter().map(|&d| decode_delta(d)).collect();
        let quat_9d = quat
            .iter()
            .zip(&delta)
            .map(|(q, &d)| q.add_heading(d))
            .collect();

        SampleBlock {
            timestamps_ns: sample_timestamps(self.timestamp, self.gyr.len(), rate),
            gyr,
            acc: Vec::new(),
            mag: Vec::new(),
            quat,
            quat_9d,
            delta,
            error_flags: self.error_flags.to_vec(),
            rest_detected: rest,
            mag_dist_detected: mag_dist,
        }
    }
}

impl FullFixed {
    pub fn parse(&self) -> SensorSample {
        let (quat, rest, mag_dist) = decode_quat64(self.quat);
        let delta = decode_delta(self.delta);
        SensorSample {
            timestamp_ns: self.timestamp,
            gyr: Some(decode_gyr(self.gyr)),
            acc: Some(decode_acc(self.acc)),
            mag: Some(decode_mag(self.mag)),
            quat_9d: quat.add_heading(delta),
            quat,
            delta,
            rest_detected: rest,
            mag_dist_detected: mag_dist,
            error_flags: self.error_flags,
        }
    }
}

impl Full6dFixed {
    pub fn parse(&self) -> SensorSample {
        let (quat, rest, mag_dist) = decode_quat64(self.quat);
        SensorSample {
            timestamp_ns: self.timestamp,
            gyr: Some(decode_gyr(self.gyr)),
            acc: Some(decode_acc(self.acc)),
            mag: None,
            quat_9d: quat,
            quat,
            delta: 0.0,
            rest_detected: rest,
            mag_dist_detected: mag_dist,
            error_flags: self.error_flags,
        }
    }
}

impl FullFloat {
    /// Float packets are already in SI units; the flags of the packed word
    /// are not transmitted in this family.
    pub fn parse(&self) -> SensorSample {
        let quat = Quaternion::new(
            self.quat[0] as f64,
            self.quat[1] as f64,
            self.quat[2] as f64,
            self.quat[3] as f64,
        );
        let delta = self.delta as f64;
        SensorSample {
            timestamp_ns: self.timestamp,
            gyr: Some([self.gyr[0] as f64, self.gyr[1] as f64, self.gyr[2] as f64]),
            acc: Some([self.acc[0] as f64, self.acc[1] as f64, self.acc[2] as f64]),
            mag: Some([self.mag[0] as f64, self.mag[1] as f64, self.mag[2] as f64]),
            quat_9d: quat.add_heading(delta),
            quat,
            delta,
            rest_detected: false,
            mag_dist_detected: false,
            error_flags: self.error_flags,
        }
    }
}

impl QuatFixed {
    pub fn parse(&self) -> SensorSample {
        let (quat, rest, mag_dist) = decode_quat64(self.quat);
        let delta = decode_delta(self.delta);
        SensorSample {
            timestamp_ns: self.timestamp,
            gyr: None,
            acc: None,
            mag: None,
            quat_9d: quat.add_heading(delta),
            quat,
            delta,
            rest_detected: rest,
            mag_dist_detected: mag_dist,
            error_flags: self.error_flags,
        }
    }
}

impl QuatFloat {
    pub fn parse(&self) -> SensorSample {
        let quat = Quaternion::new(
            self.quat[0] as f64,
            self.quat[1] as f64,
            self.quat[2] as f64,
            self.quat[3] as f64,
        );
        let delta = self.delta as f64;
        SensorSample {
            timestamp_ns: self.timestamp,
            gyr: None,
            acc: None,
            mag: None,
            quat_9d: quat.add_heading(delta),
            quat,
            delta,
            rest_detected: false,
            mag_dist_detected: false,
            error_flags: self.error_flags,
        }
    }
}

// ── Clock round-trip ──────────────────────────────────────────────────────────

/// Link delay and clock offset derived from one completed round-trip.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ClockSync {
    /// One-way link delay estimate in nanoseconds.
    pub delay_ns: i64,
    /// Host-clock minus sensor-clock offset estimate in nanoseconds.
    pub offset_ns: i64,
}

impl ClockSync {
    /// Evaluate a round-trip whose four timestamps are all filled.
    pub fn from_roundtrip(c: &ClockRoundtrip) -> ClockSync {
        ClockSync {
            delay_ns: ((c.host_receive + c.sensor_receive) - (c.host_send + c.sensor_send)) / 2,
            offset_ns: ((c.host_send + c.host_receive) - (c.sensor_receive + c.sensor_send)) / 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FULL_PACKED_SAMPLES;

    const COMPONENT_TOL: f64 = 1.0 / (1 << 19) as f64;

    fn unit(w: f64, x: f64, y: f64, z: f64) -> Quaternion {
        Quaternion::new(w, x, y, z).normalized()
    }

    #[test]
    fn quat64_roundtrip_within_quantisation() {
        let cases = [
            unit(1.0, 0.0, 0.0, 0.0),
            unit(0.5, 0.5, 0.5, 0.5),
            unit(0.9, -0.1, 0.3, -0.2),
            unit(-0.7, 0.1, 0.1, 0.69),
            unit(0.01, 0.99, -0.05, 0.12),
            unit(0.3, -0.3, 0.89, 0.1),
        ];
        for q in cases {
            for (rest, mag_dist) in [(false, false), (true, false), (false, true), (true, true)] {
                let word = encode_quat64(&q, rest, mag_dist);
                let (decoded, d_rest, d_mag) = decode_quat64(word);
                assert_eq!(d_rest, rest);
                assert_eq!(d_mag, mag_dist);
                assert!((decoded.norm() - 1.0).abs() < 1e-5);

                // q and -q encode the same rotation; compare against the
                // sign that matches.
                let sign = if q.w * decoded.w + q.x * decoded.x + q.y * decoded.y + q.z * decoded.z
                    < 0.0
                {
                    -1.0
                } else {
                    1.0
                };
                assert!((sign * q.w - decoded.w).abs() < COMPONENT_TOL, "{q:?}");
                assert!((sign * q.x - decoded.x).abs() < COMPONENT_TOL, "{q:?}");
                assert!((sign * q.y - decoded.y).abs() < COMPONENT_TOL, "{q:?}");
                assert!((sign * q.z - decoded.z).abs() < COMPONENT_TOL, "{q:?}");
            }
        }
    }

    #[test]
    fn quat64_boundary_word_clamps_under_the_root() {
        // Axis 0, all three stored fields zero: every stored component
        // decodes to -1/√2, the square sum is 1.5, and the omitted
        // component must clamp to exactly zero. Bit 62 is the rest flag.
        let (q, rest, mag_dist) = decode_quat64(0x4000_0000_0000_0000);
        assert!(rest);
        assert!(!mag_dist);
        assert_eq!(q.w, 0.0);
        let expected = -1.0 / std::f64::consts::SQRT_2;
        assert!((q.x - expected).abs() < 1e-12);
        assert!((q.y - expected).abs() < 1e-12);
        assert!((q.z - expected).abs() < 1e-12);
    }

    #[test]
    fn quat64_field_order_matches_axis_rotation() {
        // With axis = 0 the lowest field is component 3 (z), then 2 (y),
        // then 1 (x). Encode a quaternion with distinct small components
        // and check each lands in the right field.
        let q = unit(0.9, 0.1, 0.2, 0.3);
        let word = encode_quat64(&q, false, false);
        assert_eq!((word >> 60) & 3, 0);

        let field = |w: u64, i: u32| (w >> (20 * i)) & 0xFFFFF;
        let decode_field = |raw: u64| {
            raw as f64 / (QUAT_FIELD_MAX / std::f64::consts::SQRT_2)
                - 1.0 / std::f64::consts::SQRT_2
        };
        assert!((decode_field(field(word, 0)) - q.z).abs() < COMPONENT_TOL);
        assert!((decode_field(field(word, 1)) - q.y).abs() < COMPONENT_TOL);
        assert!((decode_field(field(word, 2)) - q.x).abs() < COMPONENT_TOL);
    }

    #[test]
    fn scaling_factors() {
        // 16384 counts = 1000 °/s.
        let gyr = decode_gyr([16384, 0, -16384]);
        let expected = 1000.0f64.to_radians();
        assert!((gyr[0] - expected).abs() < 1e-9);
        assert!((gyr[2] + expected).abs() < 1e-9);

        // 2048 counts = 1 g.
        let acc = decode_acc([2048, 0, 0]);
        assert!((acc[0] - 9.81).abs() < 1e-9);

        // 16 counts = 1 µT.
        let mag = decode_mag([16, -32, 0]);
        assert!((mag[0] - 1.0).abs() < 1e-12);
        assert!((mag[1] + 2.0).abs() < 1e-12);

        // 32768 counts would be π rad.
        assert!((decode_delta(16384) - std::f64::consts::FRAC_PI_2).abs() < 1e-9);

        // Bias scale is 1000x finer than the gyro scale.
        let bias = decode_gyr_bias([1000, 0, 0]);
        assert!((bias[0] * 1000.0 - decode_gyr([1000, 0, 0])[0]).abs() < 1e-12);
    }

    fn packed_with_gyr(gyr: [[i16; 3]; 8], quat: u64) -> FullPacked {
        FullPacked {
            timestamp: 1_000_000,
            quat,
            delta: 0,
            error_flags: 0,
            gyr,
            acc: [[0; 3]; 8],
            mag: [[0; 3]; 8],
        }
    }

    #[test]
    fn packed_reconstruction_zero_gyro_repeats_anchor() {
        let anchor = unit(0.8, 0.2, -0.4, 0.4);
        let word = encode_quat64(&anchor, false, false);
        let block = packed_with_gyr([[0; 3]; 8], word).parse(DataRate::Hz200);

        assert_eq!(block.quat.len(), FULL_PACKED_SAMPLES);
        let q0 = block.quat[0];
        for q in &block.quat {
            assert_eq!(*q, q0);
        }
        assert!((q0.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn packed_reconstruction_integrates_constant_rate() {
        // Constant rotation about x: increments commute, so sample i must
        // equal the anchor rotated by i times the per-sample rotation.
        let anchor = unit(1.0, 0.0, 0.0, 0.0);
        let word = encode_quat64(&anchor, false, false);
        let raw = [4096i16, 0, 0];
        let block = packed_with_gyr([raw; 8], word).parse(DataRate::Hz100);

        let omega = decode_gyr(raw);
        let (anchor_decoded, _, _) = decode_quat64(word);
        let mut expected = anchor_decoded;
        for (i, q) in block.quat.iter().enumerate() {
            if i > 0 {
                expected = expected
                    .multiply(&Quaternion::from_gyr(omega, DataRate::Hz100.hz()))
                    .normalized();
            }
            assert!((q.w - expected.w).abs() < 1e-12, "sample {i}");
            assert!((q.x - expected.x).abs() < 1e-12, "sample {i}");
            assert!((q.y - expected.y).abs() < 1e-12, "sample {i}");
            assert!((q.z - expected.z).abs() < 1e-12, "sample {i}");
            assert!((q.norm() - 1.0).abs() < 1e-9);
        }

        // Total rotation after 7 steps: angle = 7 * |ω| / rate about x.
        // Tolerance is bounded by the anchor's 20-bit quantisation, not by
        // the integration itself.
        let last = block.quat.last().unwrap();
        let angle = 7.0 * omega[0] / DataRate::Hz100.hz();
        assert!((last.w - (angle / 2.0).cos()).abs() < 1e-5);
        assert!((last.x - (angle / 2.0).sin()).abs() < 1e-5);
    }

    #[test]
    fn packed_timestamps_follow_rate() {
        let block = packed_with_gyr([[0; 3]; 8], 0).parse(DataRate::Hz100);
        assert_eq!(block.timestamps_ns[0], 1_000_000);
        assert_eq!(block.timestamps_ns[1], 11_000_000);
        assert_eq!(block.timestamps_ns[7], 71_000_000);
    }

    #[test]
    fn full_packed_keeps_package_level_shape() {
        let mut packet = packed_with_gyr([[0; 3]; 8], 0);
        packet.delta = 16384;
        packet.error_flags = 3;
        let block = packet.parse(DataRate::Hz200);
        assert_eq!(block.delta.len(), 1);
        assert_eq!(block.error_flags, vec![3]);
        // 9D = heading offset composed onto every sample.
        let d = block.delta[0];
        assert!((d - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
        let expected = block.quat[0].add_heading(d);
        assert!((block.quat_9d[0].w - expected.w).abs() < 1e-12);
    }

    #[test]
    fn quat_packed_keeps_per_sample_shape() {
        let mut delta = [0i16; 20];
        delta[4] = 100;
        let mut error_flags = [0u8; 20];
        error_flags[19] = 16;
        let packet = QuatPacked {
            timestamp: 0,
            quat: encode_quat64(&unit(1.0, 0.0, 0.0, 0.0), true, false),
            gyr: [[0; 3]; 20],
            delta,
            error_flags,
        };
        let block = packet.parse(DataRate::Rt);
        assert_eq!(block.quat.len(), 20);
        assert_eq!(block.delta.len(), 20);
        assert_eq!(block.error_flags.len(), 20);
        assert!((block.delta[4] - decode_delta(100)).abs() < 1e-12);
        assert_eq!(block.error_flags[19], 16);
        assert!(block.rest_detected);
        // Rt packets integrate at the native 200 Hz rate.
        assert_eq!(block.timestamps_ns[1], 5_000_000);
    }

    #[test]
    fn fixed_sample_parse() {
        let quat = encode_quat64(&unit(0.7, 0.0, 0.7, 0.0), false, true);
        let sample = FullFixed {
            timestamp: 17,
            quat,
            gyr: [16384, 0, 0],
            acc: [0, 2048, 0],
            mag: [0, 0, 160],
            delta: 0,
            error_flags: 2,
        }
        .parse();

        assert_eq!(sample.timestamp_ns, 17);
        assert!((sample.gyr.unwrap()[0] - 1000.0f64.to_radians()).abs() < 1e-9);
        assert!((sample.acc.unwrap()[1] - 9.81).abs() < 1e-9);
        assert!((sample.mag.unwrap()[2] - 10.0).abs() < 1e-9);
        assert!(!sample.rest_detected);
        assert!(sample.mag_dist_detected);
        assert_eq!(sample.error_flags, 2);
        assert_eq!(sample.quat_9d, sample.quat);
    }

    #[test]
    fn six_d_fixed_has_no_mag() {
        let sample = Full6dFixed {
            timestamp: 0,
            quat: encode_quat64(&unit(1.0, 0.0, 0.0, 0.0), false, false),
            gyr: [0; 3],
            acc: [0; 3],
            error_flags: 0,
        }
        .parse();
        assert!(sample.mag.is_none());
        assert_eq!(sample.delta, 0.0);
    }

    #[test]
    fn clock_roundtrip_arithmetic() {
        let sync = ClockSync::from_roundtrip(&ClockRoundtrip {
            host_send: 1000,
            sensor_receive: 1050,
            sensor_send: 1060,
            host_receive: 1120,
        });
        assert_eq!(sync.delay_ns, 55);
        assert_eq!(sync.offset_ns, 5);
    }
}
