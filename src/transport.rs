//! Uniform transport layer above BLE, USB serial, and file playback.
//!
//! Every link delivers raw receive-stamped byte chunks through an mpsc
//! channel handed over at connect time and accepts whole frames for sending.
//! The session never needs to know which physical link it runs on beyond the
//! [`TransportKind`] (BLE chunks carry the real-time prefix, the others do
//! not).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use serialport::SerialPortType;
use tokio::sync::mpsc;

use crate::ble::BleLink;
use crate::error::ImuError;
use crate::protocol::FRAME_SIZE;

// ── Timestamp helper ──────────────────────────────────────────────────────────

pub(crate) fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before Unix epoch")
        .as_nanos() as i64
}

// ── Chunks ────────────────────────────────────────────────────────────────────

/// One burst of raw bytes from the device, stamped at receive time.
#[derive(Debug)]
pub(crate) struct TransportChunk {
    pub data: Vec<u8>,
    pub timestamp_ns: i64,
}

/// Which physical link a session runs on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Ble,
    Usb,
    Playback,
}

// ── Link enum ─────────────────────────────────────────────────────────────────

/// A connected link. Concrete enum dispatch; the three variants share the
/// `send_frame` / `disconnect` / `kind` surface.
pub(crate) enum TransportLink {
    Ble(BleLink),
    Usb(UsbLink),
    Playback(PlaybackLink),
}

impl TransportLink {
    pub(crate) fn kind(&self) -> TransportKind {
        match self {
            TransportLink::Ble(_) => TransportKind::Ble,
            TransportLink::Usb(_) => TransportKind::Usb,
            TransportLink::Playback(_) => TransportKind::Playback,
        }
    }

    /// Write one complete frame to the device.
    pub(crate) async fn send_frame(&mut self, frame: &[u8; FRAME_SIZE]) -> Result<(), ImuError> {
        match self {
            TransportLink::Ble(link) => link.send_frame(frame).await,
            TransportLink::Usb(link) => link.send_frame(frame),
            TransportLink::Playback(link) => {
                link.ignore_send();
                Ok(())
            }
        }
    }

    /// Close the link and release its resources.
    pub(crate) async fn disconnect(&mut self) {
        match self {
            TransportLink::Ble(link) => link.disconnect().await,
            TransportLink::Usb(link) => link.disconnect(),
            TransportLink::Playback(_) => {}
        }
    }
}

// ── USB serial ────────────────────────────────────────────────────────────────

/// CDC-ACM ignores the configured rate; this placeholder keeps the setup
/// call happy on every platform.
const USB_BAUD: u32 = 2_147_483_647;

/// USB serial link: a blocking reader thread pumps the port into the chunk
/// channel so slow packet processing can never back up the OS receive
/// buffer.
pub(crate) struct UsbLink {
    port: Box<dyn serialport::SerialPort>,
    stop: Arc<AtomicBool>,
    reader: Option<thread::JoinHandle<()>>,
}

impl UsbLink {
    pub(crate) fn open(
        path: &str,
        chunk_tx: mpsc::Sender<TransportChunk>,
    ) -> Result<UsbLink, ImuError> {
        let port = serialport::new(path, USB_BAUD)
            .timeout(Duration::from_millis(10))
            .open()?;
        let reader_port = port.try_clone()?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let reader = thread::spawn(move || read_serial(reader_port, chunk_tx, stop_flag));

        Ok(UsbLink {
            port,
            stop,
            reader: Some(reader),
        })
    }

    fn send_frame(&mut self, frame: &[u8; FRAME_SIZE]) -> Result<(), ImuError> {
        self.port
            .write_all(frame)
            .and_then(|()| self.port.flush())
            .map_err(|e| ImuError::Transport(e.to_string()))
    }

    fn disconnect(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            reader.join().ok();
        }
    }
}

impl Drop for UsbLink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn read_serial(
    mut port: Box<dyn serialport::SerialPort>,
    chunk_tx: mpsc::Sender<TransportChunk>,
    stop: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 1024];
    while !stop.load(Ordering::Relaxed) {
        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                let chunk = TransportChunk {
                    data: buf[..n].to_vec(),
                    timestamp_ns: now_ns(),
                };
                if chunk_tx.blocking_send(chunk).is_err() {
                    // Session gone; nothing left to feed.
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                warn!("serial read failed: {e}");
                break;
            }
        }
    }
    // Dropping chunk_tx closes the channel, which the session receives as a
    // disconnect.
}

/// Find the single attached USB serial device for the `"usb"` target.
pub(crate) fn discover_usb_port() -> Result<String, ImuError> {
    let candidates: Vec<String> = serialport::available_ports()?
        .into_iter()
        .filter(|p| matches!(p.port_type, SerialPortType::UsbPort(_)))
        .map(|p| p.port_name)
        .collect();

    match candidates.len() {
        1 => Ok(candidates.into_iter().next().unwrap()),
        0 => Err(ImuError::Setup("no USB serial device found".into())),
        _ => Err(ImuError::Setup(format!(
            "more than one USB serial device found: {}. Pass a specific port instead of \"usb\"",
            candidates.join(", ")
        ))),
    }
}

// ── File playback ─────────────────────────────────────────────────────────────

/// Replays a persisted recording as if it were a live device.
///
/// The whole file is pushed through the chunk channel at no wall-clock rate,
/// so timing-sensitive code will not behave as it does against hardware.
/// Sends are ignored.
pub(crate) struct PlaybackLink;

impl PlaybackLink {
    pub(crate) fn open(
        path: &str,
        chunk_tx: mpsc::Sender<TransportChunk>,
    ) -> Result<PlaybackLink, ImuError> {
        let bytes = std::fs::read(path)?;
        debug!("playback: {} bytes from {path}", bytes.len());

        tokio::spawn(async move {
            for chunk in bytes.chunks(4096) {
                let chunk = TransportChunk {
                    data: chunk.to_vec(),
                    timestamp_ns: now_ns(),
                };
                if chunk_tx.send(chunk).await.is_err() {
                    return;
                }
            }
            // tx drops here: end of recording = disconnect.
        });

        Ok(PlaybackLink)
    }

    fn ignore_send(&self) {
        warn!("ignoring send on a playback device");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn playback_streams_file_and_closes() {
        let dir = std::env::temp_dir().join("imu_rs_playback_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("stream.bin");
        let payload: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &payload).unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let _link = PlaybackLink::open(path.to_str().unwrap(), tx).unwrap();

        let mut received = Vec::new();
        while let Some(chunk) = rx.recv().await {
            received.extend_from_slice(&chunk.data);
        }
        assert_eq!(received, payload);
        std::fs::remove_file(&path).ok();
    }
}
