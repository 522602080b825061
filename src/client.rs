//! Client configuration, scanning, and the connect dispatcher.
//!
//! Targets are plain strings, matching what users type on a command line:
//!
//! * `"IMU_ab1234"` — connect over BLE to the sensor advertising that name
//! * `"usb"` — connect to the single USB-attached sensor
//! * `"/dev/ttyACM0"` / `"COM3"` — connect to a specific serial port
//! * a path to a recording file — replay it as a device

use std::path::Path;
use std::time::Duration;

use futures::future::join_all;
use log::info;
use tokio::sync::mpsc;

use crate::ble::{BleLink, BleScanner, ScanRecord};
use crate::device::{Device, OverflowPolicy};
use crate::error::ImuError;
use crate::transport::{discover_usb_port, PlaybackLink, TransportLink, UsbLink};

// ── Configuration ─────────────────────────────────────────────────────────────

/// Tunables for scanning, connecting, and the per-session machinery.
#[derive(Clone, Debug)]
pub struct ImuClientConfig {
    /// How long a BLE scan keeps looking for a named device. Default: 15 s.
    pub scan_timeout: Duration,
    /// Hard limit on the BLE connect call. Default: 10 s.
    pub connect_timeout: Duration,
    /// Deadline for simple command echoes and acks. Default: 2 s.
    pub command_timeout: Duration,
    /// Deadline for filesystem listing and formatting. Default: 30 s.
    pub fs_list_timeout: Duration,
    /// Progress watchdog for downloads: the transfer is cancelled when no
    /// chunk arrives for this long. Default: 3 s.
    pub download_grace: Duration,
    /// Consumer queue capacity in packets. Default: 1024.
    pub queue_capacity: usize,
    /// What happens when the consumer queue is full. Default: drop-oldest.
    pub overflow_policy: OverflowPolicy,
    /// Run the periodic clock round-trip task. Default: off.
    pub clock_roundtrip_enabled: bool,
    /// Interval of the clock round-trip task. Default: 1 s.
    pub clock_roundtrip_interval: Duration,
    /// Default real-time rate limit in Hz; 0 keeps the device default of
    /// 50 Hz.
    pub rt_rate_limit: u8,
}

impl Default for ImuClientConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(2),
            fs_list_timeout: Duration::from_secs(30),
            download_grace: Duration::from_secs(3),
            queue_capacity: 1024,
            overflow_policy: OverflowPolicy::DropOldest,
            clock_roundtrip_enabled: false,
            clock_roundtrip_interval: Duration::from_secs(1),
            rt_rate_limit: 0,
        }
    }
}

// ── Target classification ─────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
enum Target {
    UsbAuto,
    SerialPort(String),
    Playback(String),
    BleName(String),
}

fn classify(target: &str) -> Target {
    if target == "usb" {
        return Target::UsbAuto;
    }
    if Path::new(target).is_file() {
        return Target::Playback(target.to_owned());
    }
    if target.starts_with("/dev/") || target.to_ascii_uppercase().starts_with("COM") {
        return Target::SerialPort(target.to_owned());
    }
    Target::BleName(target.to_owned())
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Entry point: scans for sensors and opens sessions.
pub struct ImuClient {
    config: ImuClientConfig,
}

impl ImuClient {
    pub fn new(config: ImuClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ImuClientConfig {
        &self.config
    }

    /// Scan for all nearby IMU sensors and return them.
    pub async fn scan_all(&self) -> Result<Vec<ScanRecord>, ImuError> {
        let scanner = BleScanner::new().await?;
        scanner.scan(&[], self.config.scan_timeout).await
    }

    /// Open one session.
    pub async fn connect_one(&self, target: &str) -> Result<Device, ImuError> {
        self.open_target(target).await
    }

    /// Open several sessions concurrently; results come back in input order.
    ///
    /// If any target fails, every session that did open is closed before the
    /// first error is surfaced.
    pub async fn connect(&self, targets: &[&str]) -> Result<Vec<Device>, ImuError> {
        let results = join_all(targets.iter().map(|t| self.open_target(t))).await;

        if results.iter().any(Result::is_err) {
            let mut first_error = None;
            for result in results {
                match result {
                    Ok(device) => device.disconnect().await,
                    Err(e) if first_error.is_none() => first_error = Some(e),
                    Err(_) => {}
                }
            }
            return Err(first_error.unwrap());
        }

        let devices: Vec<Device> = results.into_iter().map(Result::unwrap).collect();
        info!("connected to {} device(s)", devices.len());
        Ok(devices)
    }

    async fn open_target(&self, target: &str) -> Result<Device, ImuError> {
        let (chunk_tx, chunk_rx) = mpsc::channel(64);

        let (link, name) = match classify(target) {
            Target::UsbAuto => {
                let port = discover_usb_port()?;
                info!("using USB serial port {port}");
                let link = UsbLink::open(&port, chunk_tx)?;
                (TransportLink::Usb(link), port)
            }
            Target::SerialPort(port) => {
                let link = UsbLink::open(&port, chunk_tx)?;
                (TransportLink::Usb(link), port)
            }
            Target::Playback(path) => {
                let link = PlaybackLink::open(&path, chunk_tx)?;
                (TransportLink::Playback(link), path)
            }
            Target::BleName(name) => {
                let link = BleLink::connect(
                    &name,
                    self.config.scan_timeout,
                    self.config.connect_timeout,
                    chunk_tx,
                )
                .await?;
                (TransportLink::Ble(link), name)
            }
        };

        Ok(Device::new(link, chunk_rx, self.config.clone(), name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_classify_by_shape() {
        assert_eq!(classify("usb"), Target::UsbAuto);
        assert_eq!(
            classify("/dev/ttyACM0"),
            Target::SerialPort("/dev/ttyACM0".into())
        );
        assert_eq!(classify("COM3"), Target::SerialPort("COM3".into()));
        assert_eq!(classify("com7"), Target::SerialPort("com7".into()));
        assert_eq!(classify("IMU_ab1234"), Target::BleName("IMU_ab1234".into()));
    }

    #[test]
    fn existing_files_classify_as_playback() {
        let dir = std::env::temp_dir().join("imu_rs_classify_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rec.bin");
        std::fs::write(&path, b"x").unwrap();

        let target = path.to_str().unwrap();
        assert_eq!(classify(target), Target::Playback(target.to_owned()));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = ImuClientConfig::default();
        assert_eq!(config.command_timeout, Duration::from_secs(2));
        assert_eq!(config.fs_list_timeout, Duration::from_secs(30));
        assert_eq!(config.overflow_policy, OverflowPolicy::DropOldest);
        assert!(!config.clock_roundtrip_enabled);
        assert_eq!(config.rt_rate_limit, 0);
    }
}
