use std::process::ExitCode;

use anyhow::{bail, Result};
use log::{info, warn};

use imu_rs::prelude::*;

/// Stream 200 Hz packed data from one sensor and print what arrives.
///
/// Usage:
///   imu-stream IMU_ab1234        # BLE
///   imu-stream usb               # the single USB-attached sensor
///   imu-stream recording.bin     # replay a downloaded recording
#[tokio::main]
async fn main() -> Result<ExitCode> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // Set RUST_LOG=imu_rs=debug for verbose output.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Some(target) = std::env::args().nth(1) else {
        eprintln!("usage: imu-stream <IMU_*|usb|/dev/tty*|COM*|recording.bin>");
        return Ok(ExitCode::FAILURE);
    };

    // ── Connect and initialise ────────────────────────────────────────────────
    let client = ImuClient::new(ImuClientConfig::default());
    info!("connecting to {target}…");
    let device = client.connect_one(&target).await?;

    device
        .init(InitOptions {
            set_time: true,
            abort_recording: true,
            abort_streaming: true,
        })
        .await?;
    info!("connected: {}", device.name());

    // ── Configure and start streaming ─────────────────────────────────────────
    if device.transport_kind() != TransportKind::Playback {
        device
            .set_measurement_mode(MeasurementMode {
                full_packed_mode: SamplingMode::Hz200,
                status_mode: 1,
                ..Default::default()
            })
            .await?;
        device.start_streaming().await?;
        info!("streaming started, press Ctrl-C to stop");
    }

    // ── Event loop ────────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("stopping…");
                break;
            }
            packet = device.recv() => {
                match packet? {
                    None => {
                        info!("device disconnected");
                        return Ok(ExitCode::SUCCESS);
                    }
                    Some(packet) => print_packet(&packet),
                }
            }
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    if device.transport_kind() != TransportKind::Playback {
        if let Err(e) = device.stop_streaming().await {
            warn!("stop streaming failed: {e}");
        }
    }
    device.disconnect().await;

    if device.dropped_packets() > 0 {
        bail!("{} packets were dropped by the consumer queue", device.dropped_packets());
    }
    Ok(ExitCode::SUCCESS)
}

fn print_packet(packet: &Packet) {
    match packet {
        Packet::DataFullPacked(rate, data) => {
            let block = data.parse(*rate);
            let q = block.quat_9d.first().expect("packed blocks are never empty");
            println!(
                "[FULL] t={:.3}s  gyr={:+7.2} {:+7.2} {:+7.2} rad/s  quat9D=({:+.3} {:+.3} {:+.3} {:+.3})",
                block.timestamps_ns[0] as f64 / 1e9,
                block.gyr[0][0],
                block.gyr[0][1],
                block.gyr[0][2],
                q.w,
                q.x,
                q.y,
                q.z,
            );
        }
        Packet::DataQuatFixed(_, data) => {
            let sample = data.parse();
            println!(
                "[QUAT] t={:.3}s  quat=({:+.3} {:+.3} {:+.3} {:+.3})  rest={}",
                sample.timestamp_ns as f64 / 1e9,
                sample.quat.w,
                sample.quat.x,
                sample.quat.y,
                sample.quat.z,
                sample.rest_detected,
            );
        }
        Packet::DataStatus(status) => {
            println!(
                "[STATUS] state={:?}  battery={}%  storage={}/{} kB",
                status.sensor_state,
                status.battery_level,
                status.storage_free_kb,
                status.storage_total_kb,
            );
        }
        other => println!("{other:?}"),
    }
}
