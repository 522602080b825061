//! BLE scanning and the BLE transport link.
//!
//! Devices advertise the service UUID in [`crate::protocol::IMU_SERVICE_UUID`]
//! and a name like `IMU_ab1234`. The host writes whole frames to the RX
//! characteristic and receives notifications on TX, each carrying a
//! real-time-count byte followed by frame and stream data (see
//! [`crate::frame::BleDemux`]).

use std::collections::HashSet;
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ImuError;
use crate::protocol::{
    DEVICE_NAME_PREFIX, FRAME_SIZE, IMU_RX_CHARACTERISTIC, IMU_SERVICE_UUID, IMU_TX_CHARACTERISTIC,
};
use crate::transport::{now_ns, TransportChunk};

// ── Scan records ──────────────────────────────────────────────────────────────

/// One advertisement observed during a scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanRecord {
    /// Platform BLE identifier.
    /// • Linux — a Bluetooth MAC address (`AA:BB:CC:DD:EE:FF`)
    /// • macOS / Windows — a platform-specific peripheral id
    pub address: String,
    /// Advertised device name (e.g. `"IMU_ab1234"`).
    pub name: String,
    /// Signal strength at discovery time, dBm.
    pub rssi: i16,
}

// ── Adapter setup ─────────────────────────────────────────────────────────────

pub(crate) async fn default_adapter() -> Result<Adapter, ImuError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    let adapter = adapters
        .into_iter()
        .next()
        .ok_or_else(|| ImuError::Setup("no Bluetooth adapter found".into()))?;

    // macOS: CBCentralManager starts in an "unknown" state right after
    // launch, and scanning before it reports poweredOn is a silent no-op.
    #[cfg(target_os = "macos")]
    {
        use btleplug::api::CentralState;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            match adapter.adapter_state().await {
                Ok(CentralState::PoweredOn) => break,
                Ok(state) => {
                    if tokio::time::Instant::now() >= deadline {
                        warn!("adapter still in state {state:?} after 3 s, proceeding anyway");
                        break;
                    }
                    debug!("waiting for adapter, state = {state:?}");
                }
                Err(e) => {
                    warn!("adapter_state() error: {e}");
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    Ok(adapter)
}

fn service_filter() -> ScanFilter {
    ScanFilter {
        services: vec![IMU_SERVICE_UUID],
    }
}

fn name_matches(name: &str, filter: &[&str]) -> bool {
    if filter.is_empty() {
        return name.starts_with(DEVICE_NAME_PREFIX);
    }
    filter.iter().any(|f| name.starts_with(f))
}

// ── Scanner ───────────────────────────────────────────────────────────────────

/// BLE device scanner for IMU sensors.
///
/// The scan filters on the advertised service UUID; `filter` entries narrow
/// further by name prefix or exact name. Advertisements are deduplicated by
/// address within one scan call.
pub struct BleScanner {
    adapter: Adapter,
}

impl BleScanner {
    pub async fn new() -> Result<Self, ImuError> {
        Ok(Self {
            adapter: default_adapter().await?,
        })
    }

    /// Scan for `duration` and return everything found.
    pub async fn scan(
        &self,
        filter: &[&str],
        duration: Duration,
    ) -> Result<Vec<ScanRecord>, ImuError> {
        info!("scanning for {duration:?}…");
        self.adapter.start_scan(service_filter()).await?;
        tokio::time::sleep(duration).await;
        self.adapter.stop_scan().await.ok();

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for p in self.adapter.peripherals().await? {
            if let Ok(Some(props)) = p.properties().await {
                let Some(name) = props.local_name else {
                    continue;
                };
                if !name_matches(&name, filter) {
                    continue;
                }
                let address = p.address().to_string();
                if !seen.insert(address.clone()) {
                    continue;
                }
                found.push(ScanRecord {
                    address,
                    name,
                    rssi: props.rssi.unwrap_or(0),
                });
            }
        }
        info!("scan finished: {} device(s)", found.len());
        Ok(found)
    }

    /// Event-driven scan: yields each matching device once, as it is
    /// discovered. Scanning stops when the receiver is dropped.
    pub async fn scan_stream(
        &self,
        filter: Vec<String>,
    ) -> Result<mpsc::Receiver<ScanRecord>, ImuError> {
        let (tx, rx) = mpsc::channel(16);
        let adapter = self.adapter.clone();
        adapter.start_scan(service_filter()).await?;
        let mut events = adapter.events().await?;

        tokio::spawn(async move {
            let mut seen = HashSet::new();
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Ok(p) = adapter.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(props)) = p.properties().await else {
                    continue;
                };
                let Some(name) = props.local_name else {
                    continue;
                };
                let filter_refs: Vec<&str> = filter.iter().map(String::as_str).collect();
                if !name_matches(&name, &filter_refs) {
                    continue;
                }
                let address = p.address().to_string();
                if !seen.insert(address.clone()) {
                    continue;
                }
                let record = ScanRecord {
                    address,
                    name,
                    rssi: props.rssi.unwrap_or(0),
                };
                if tx.send(record).await.is_err() {
                    break;
                }
            }
            adapter.stop_scan().await.ok();
        });

        Ok(rx)
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

/// An established BLE link.
///
/// A background task forwards TX notifications into the session's chunk
/// channel; a second task watches for adapter-level disconnect events and
/// tears the forwarder down so the session always observes the link closing.
pub(crate) struct BleLink {
    peripheral: Peripheral,
    rx_char: Characteristic,
    notify_task: JoinHandle<()>,
    watcher_task: JoinHandle<()>,
}

impl BleLink {
    /// Scan for `name`, connect, subscribe, and start the forwarding tasks.
    pub(crate) async fn connect(
        name: &str,
        scan_timeout: Duration,
        connect_timeout: Duration,
        chunk_tx: mpsc::Sender<TransportChunk>,
    ) -> Result<BleLink, ImuError> {
        let adapter = default_adapter().await?;

        adapter.start_scan(service_filter()).await?;
        let peripheral = find_by_name(&adapter, name, scan_timeout).await;
        adapter.stop_scan().await.ok();
        let peripheral = peripheral?;

        // BlueZ's Connect call can block forever when the device went out of
        // range between discovery and now; a BLE connection normally
        // completes in under two seconds.
        tokio::time::timeout(connect_timeout, peripheral.connect())
            .await
            .map_err(|_| ImuError::Setup(format!("connect to {name} timed out")))??;

        // On Linux the stack can report the connection before the GATT cache
        // is populated; discovering too early yields an empty service set.
        #[cfg(target_os = "linux")]
        tokio::time::sleep(Duration::from_millis(600)).await;

        tokio::time::timeout(Duration::from_secs(15), peripheral.discover_services())
            .await
            .map_err(|_| ImuError::Setup("service discovery timed out".into()))??;
        info!("connected: {name}");

        let chars = peripheral.characteristics();
        let find_char = |uuid| {
            chars
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or_else(|| ImuError::Setup(format!("characteristic {uuid} not found")))
        };
        let rx_char = find_char(IMU_RX_CHARACTERISTIC)?;
        let tx_char = find_char(IMU_TX_CHARACTERISTIC)?;
        peripheral.subscribe(&tx_char).await?;

        // ── Notification forwarder ────────────────────────────────────────
        let mut notifications = peripheral.notifications().await?;
        let notify_task = tokio::spawn(async move {
            while let Some(n) = notifications.next().await {
                if n.uuid != IMU_TX_CHARACTERISTIC {
                    debug!("notification from unexpected characteristic {}", n.uuid);
                    continue;
                }
                let chunk = TransportChunk {
                    data: n.value,
                    timestamp_ns: now_ns(),
                };
                if chunk_tx.send(chunk).await.is_err() {
                    break;
                }
            }
            info!("notification stream ended");
            // chunk_tx drops here; the session sees the channel close.
        });

        // ── Disconnect watcher ────────────────────────────────────────────
        // The notification stream does not always end promptly when the
        // link drops; the adapter event fires reliably and faster.
        let abort = notify_task.abort_handle();
        let peripheral_id = peripheral.id();
        let watcher_adapter = adapter.clone();
        let watcher_task = tokio::spawn(async move {
            match watcher_adapter.events().await {
                Ok(mut events) => {
                    while let Some(event) = events.next().await {
                        if let CentralEvent::DeviceDisconnected(id) = event {
                            if id == peripheral_id {
                                info!("device {id:?} disconnected");
                                abort.abort();
                                break;
                            }
                        }
                    }
                }
                Err(e) => warn!("could not subscribe to adapter events: {e}"),
            }
        });

        Ok(BleLink {
            peripheral,
            rx_char,
            notify_task,
            watcher_task,
        })
    }

    pub(crate) async fn send_frame(&mut self, frame: &[u8; FRAME_SIZE]) -> Result<(), ImuError> {
        self.peripheral
            .write(&self.rx_char, frame, WriteType::WithoutResponse)
            .await
            .map_err(ImuError::from)
    }

    pub(crate) async fn disconnect(&mut self) {
        self.peripheral.disconnect().await.ok();
        self.notify_task.abort();
        self.watcher_task.abort();
    }
}

impl Drop for BleLink {
    fn drop(&mut self) {
        self.notify_task.abort();
        self.watcher_task.abort();
    }
}

/// Poll until a peripheral advertising exactly `name` appears or the timeout
/// expires.
async fn find_by_name(
    adapter: &Adapter,
    name: &str,
    timeout: Duration,
) -> Result<Peripheral, ImuError> {
    let result = tokio::time::timeout(timeout, async {
        loop {
            let peripherals = adapter.peripherals().await.unwrap_or_default();
            for p in peripherals {
                if let Ok(Some(props)) = p.properties().await {
                    if props.local_name.as_deref() == Some(name) {
                        return p;
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    })
    .await;

    result.map_err(|_| ImuError::Setup(format!("device {name} not found within {timeout:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_filter_defaults_to_device_prefix() {
        assert!(name_matches("IMU_ab1234", &[]));
        assert!(!name_matches("Muse-AB12", &[]));
        assert!(name_matches("IMU_ab1234", &["IMU_ab1234"]));
        assert!(name_matches("IMU_ab1234", &["IMU_ab"]));
        assert!(!name_matches("IMU_ab1234", &["IMU_cd"]));
    }
}
