//! The session: one connected device, its receive task, pending-echo table,
//! consumer queue, and the high-level operations built on top.
//!
//! A session is a single logical task plus per-command suspensions. The
//! receive task drains transport chunks, runs them through the framer(s),
//! decodes packets, and routes each one either to the waiter registered for
//! its header or into the consumer queue. Callers interact only through the
//! session's own methods; the pending table and the queue are never exposed.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

use crate::client::ImuClientConfig;
use crate::error::ImuError;
use crate::frame::{BleDemux, Channel, Frame, Unpacker};
use crate::packets::{
    AbsoluteTime, BurstMode, ClockRoundtrip, DeviceInfo, FsFile, FsGetBytes, FsName, Header,
    LedConfig, MeasurementMode, Packet, RealTimeConfig, RealTimeDataMode, RecordingConfig,
    SensorState, Status, SyncOutput,
};
use crate::parse::ClockSync;
use crate::transport::{now_ns, TransportChunk, TransportKind, TransportLink};

// ── Connection state ──────────────────────────────────────────────────────────

/// Lifecycle of a session.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// What to do when the consumer queue is full.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Discard the oldest queued packet and count it.
    #[default]
    DropOldest,
    /// Surface [`ImuError::QueueOverflow`] to the consumer.
    Error,
}

/// Options for [`Device::init`].
#[derive(Copy, Clone, Debug, Default)]
pub struct InitOptions {
    /// Set the sensor clock from the host clock. When synchronising several
    /// devices, set it on the sync sender only.
    pub set_time: bool,
    /// Abort an ongoing recording instead of failing with
    /// [`ImuError::DeviceIsRecording`].
    pub abort_recording: bool,
    /// Abort ongoing streaming (clearing the send buffer) instead of failing
    /// with [`ImuError::DeviceIsStreaming`].
    pub abort_streaming: bool,
}

// ── Shared session state ──────────────────────────────────────────────────────

struct Waiter {
    /// Header of the command this waiter belongs to; `SensorError` packets
    /// are matched against it.
    command: Header,
    /// Shared completion slot. One waiter may be registered under several
    /// expected headers; whichever arrives first takes the sender.
    slot: Arc<Mutex<Option<oneshot::Sender<Result<Packet, ImuError>>>>>,
}

struct ConsumerQueue {
    deque: VecDeque<(Channel, Packet)>,
    closed: bool,
    overflowed: bool,
}

struct SharedState {
    pending: Mutex<HashMap<Header, Waiter>>,
    queue: Mutex<ConsumerQueue>,
    queue_notify: Notify,
    status: Mutex<Option<Status>>,
    status_notify: Notify,
    device_info: Mutex<Option<DeviceInfo>>,
    clock_sync: Mutex<Option<ClockSync>>,
    name: Mutex<String>,
    state: Mutex<ConnectionState>,
    poisoned: AtomicBool,
    /// Set while a stop-and-clear-buffer command awaits its ack; stream
    /// data arriving in that window belongs to the aborted session and is
    /// discarded before it can reach the consumer.
    draining: AtomicBool,
    queue_capacity: usize,
    overflow_policy: OverflowPolicy,
    dropped_packets: AtomicU64,
    dropped_bytes: AtomicU64,
    decode_errors: AtomicU64,
}

impl SharedState {
    fn new(name: String, queue_capacity: usize, overflow_policy: OverflowPolicy) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            queue: Mutex::new(ConsumerQueue {
                deque: VecDeque::new(),
                closed: false,
                overflowed: false,
            }),
            queue_notify: Notify::new(),
            status: Mutex::new(None),
            status_notify: Notify::new(),
            device_info: Mutex::new(None),
            clock_sync: Mutex::new(None),
            name: Mutex::new(name),
            state: Mutex::new(ConnectionState::Connected),
            poisoned: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            queue_capacity,
            overflow_policy,
            dropped_packets: AtomicU64::new(0),
            dropped_bytes: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        }
    }

    /// Decode one frame and dispatch the packet.
    fn handle_frame(&self, channel: Channel, frame: &Frame, timestamp_ns: i64) {
        let mut packet = match Packet::decode(frame) {
            Ok(packet) => packet,
            Err(e) => {
                // Fatal for this frame only; the stream goes on.
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!("dropping frame: {e}");
                return;
            }
        };

        // Cache state the session mirrors before any dispatch, so a waiter
        // completing on this packet already observes the update.
        match &mut packet {
            Packet::DataStatus(status) => {
                *self.status.lock().unwrap() = Some(*status);
                self.status_notify.notify_one();
            }
            Packet::DataDeviceInfo(info) => {
                *self.device_info.lock().unwrap() = Some(info.clone());
                *self.name.lock().unwrap() = format!("IMU_{}", info.serial);
            }
            Packet::DataClockRoundtrip(roundtrip) => {
                if roundtrip.host_receive == 0 {
                    roundtrip.host_receive = timestamp_ns;
                }
                if roundtrip.host_send != 0 && roundtrip.sensor_send != 0 {
                    *self.clock_sync.lock().unwrap() = Some(ClockSync::from_roundtrip(roundtrip));
                }
            }
            _ => {}
        }

        self.dispatch(channel, packet);
    }

    fn dispatch(&self, channel: Channel, packet: Packet) {
        let Some(header) = packet.header() else {
            debug!("unknown header 0x{:04X}", packet.raw_header());
            self.push(channel, packet);
            return;
        };

        // Stale frames of an aborted stream keep arriving until the device
        // acks the stop; they must not surface as fresh samples. Echoes,
        // acks, and status packets still pass.
        if self.draining.load(Ordering::Relaxed)
            && (header.is_sensor_data() || header == Header::DataFsBytes)
        {
            debug!("discarding {header:?} from the aborted stream");
            return;
        }

        // A device-side rejection completes the waiter of the command it
        // refers to, as a typed error.
        if let Packet::SensorError(error) = &packet {
            let command = error.command_header();
            let key = {
                let pending = self.pending.lock().unwrap();
                pending
                    .iter()
                    .find(|(_, w)| Some(w.command) == command)
                    .map(|(k, _)| *k)
            };
            if let (Some(key), Some(command)) = (key, command) {
                if let Some(waiter) = self.pending.lock().unwrap().remove(&key) {
                    if let Some(tx) = waiter.slot.lock().unwrap().take() {
                        let _ = tx.send(Err(ImuError::Device {
                            command,
                            code: error.code,
                        }));
                        return;
                    }
                }
            }
            self.push(channel, packet);
            return;
        }

        let waiter = self.pending.lock().unwrap().remove(&header);
        if let Some(waiter) = waiter {
            let tx = waiter.slot.lock().unwrap().take();
            match tx {
                Some(tx) => {
                    if let Err(Ok(packet)) = tx.send(Ok(packet)) {
                        // The caller cancelled after the entry was looked
                        // up; a late response is never silently lost.
                        self.push(channel, packet);
                    }
                    return;
                }
                // Another expected header of the same command already won.
                None => {}
            }
        }

        self.push(channel, packet);
    }

    fn push(&self, channel: Channel, packet: Packet) {
        let mut queue = self.queue.lock().unwrap();
        if queue.closed {
            return;
        }
        if queue.deque.len() >= self.queue_capacity {
            match self.overflow_policy {
                OverflowPolicy::DropOldest => {
                    queue.deque.pop_front();
                    self.dropped_packets.fetch_add(1, Ordering::Relaxed);
                }
                OverflowPolicy::Error => {
                    queue.overflowed = true;
                    drop(queue);
                    self.queue_notify.notify_one();
                    return;
                }
            }
        }
        queue.deque.push_back((channel, packet));
        drop(queue);
        self.queue_notify.notify_one();
    }

    /// Mark the session dead: fail every pending waiter, end the consumer
    /// stream, refuse future commands.
    fn close(&self) {
        self.poisoned.store(true, Ordering::Relaxed);
        *self.state.lock().unwrap() = ConnectionState::Disconnected;

        let waiters: Vec<Waiter> = self.pending.lock().unwrap().drain().map(|(_, w)| w).collect();
        for waiter in waiters {
            if let Some(tx) = waiter.slot.lock().unwrap().take() {
                let _ = tx.send(Err(ImuError::Disconnected));
            }
        }

        self.queue.lock().unwrap().closed = true;
        self.queue_notify.notify_one();
        self.status_notify.notify_one();
    }
}

// ── Refusal policy ────────────────────────────────────────────────────────────

/// Client-side state check run before a start command touches the transport.
fn refuse_start(status: Option<Status>, forbidden: SensorState) -> Result<(), ImuError> {
    match status {
        Some(s) if s.sensor_state == forbidden => Err(match forbidden {
            SensorState::Recording => ImuError::DeviceIsRecording,
            _ => ImuError::DeviceIsStreaming,
        }),
        _ => Ok(()),
    }
}

// ── Receive task ──────────────────────────────────────────────────────────────

async fn receive_loop(
    shared: Arc<SharedState>,
    mut chunk_rx: mpsc::Receiver<TransportChunk>,
    kind: TransportKind,
) {
    let mut demux = BleDemux::new();
    let mut unpacker = Unpacker::new();

    while let Some(chunk) = chunk_rx.recv().await {
        match kind {
            TransportKind::Ble => {
                demux.feed_notification(&chunk.data);
                while let Some((channel, frame)) = demux.next_frame() {
                    shared.handle_frame(channel, &frame, chunk.timestamp_ns);
                }
                let (rt, stream) = demux.dropped_bytes();
                shared.dropped_bytes.store(rt + stream, Ordering::Relaxed);
            }
            TransportKind::Usb | TransportKind::Playback => {
                unpacker.feed(&chunk.data);
                while let Some(frame) = unpacker.next_frame() {
                    shared.handle_frame(Channel::SendBuffer, &frame, chunk.timestamp_ns);
                }
                shared
                    .dropped_bytes
                    .store(unpacker.dropped_bytes(), Ordering::Relaxed);
            }
        }
    }

    info!("transport stream ended");
    shared.close();
}

// ── Device ────────────────────────────────────────────────────────────────────

/// The host-side peer of one connected sensor.
///
/// Created by [`crate::client::ImuClient`]. Incoming data packets are
/// consumed with [`Device::recv`] / [`Device::poll`]; commands go through
/// the typed operation methods, which wait for the matching echo or
/// acknowledgement.
pub struct Device {
    shared: Arc<SharedState>,
    link: Arc<tokio::sync::Mutex<TransportLink>>,
    kind: TransportKind,
    config: ImuClientConfig,
    recv_task: JoinHandle<()>,
    clock_task: Option<JoinHandle<()>>,
}

impl Device {
    pub(crate) fn new(
        link: TransportLink,
        chunk_rx: mpsc::Receiver<TransportChunk>,
        config: ImuClientConfig,
        initial_name: String,
    ) -> Device {
        let kind = link.kind();
        let shared = Arc::new(SharedState::new(
            initial_name,
            config.queue_capacity,
            config.overflow_policy,
        ));
        let link = Arc::new(tokio::sync::Mutex::new(link));

        let recv_task = tokio::spawn(receive_loop(Arc::clone(&shared), chunk_rx, kind));

        let clock_task = if config.clock_roundtrip_enabled && kind != TransportKind::Playback {
            let shared_clock = Arc::clone(&shared);
            let link_clock = Arc::clone(&link);
            let interval = config.clock_roundtrip_interval;
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if shared_clock.poisoned.load(Ordering::Relaxed) {
                        break;
                    }
                    let packet = Packet::DataClockRoundtrip(ClockRoundtrip {
                        host_send: now_ns(),
                        ..Default::default()
                    });
                    let frame = packet.to_frame();
                    if let Err(e) = link_clock.lock().await.send_frame(&frame).await {
                        warn!("clock round-trip send failed: {e}");
                        break;
                    }
                }
            }))
        } else {
            None
        };

        Device {
            shared,
            link,
            kind,
            config,
            recv_task,
            clock_task,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    /// Device name; `IMU_<serial>` once a `DataDeviceInfo` was received,
    /// otherwise the name the session was opened with.
    pub fn name(&self) -> String {
        self.shared.name.lock().unwrap().clone()
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.kind
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.state.lock().unwrap()
    }

    /// Most recent `DataStatus`, if any arrived yet.
    pub fn status(&self) -> Option<Status> {
        *self.shared.status.lock().unwrap()
    }

    /// Most recent `DataDeviceInfo`, if any arrived yet.
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.shared.device_info.lock().unwrap().clone()
    }

    /// Latest clock round-trip result. The session never corrects packet
    /// timestamps with it; that is the caller's decision.
    pub fn clock_sync(&self) -> Option<ClockSync> {
        *self.shared.clock_sync.lock().unwrap()
    }

    /// Packets discarded because the consumer queue was full.
    pub fn dropped_packets(&self) -> u64 {
        self.shared.dropped_packets.load(Ordering::Relaxed)
    }

    /// Bytes the framers discarded while resynchronising.
    pub fn dropped_bytes(&self) -> u64 {
        self.shared.dropped_bytes.load(Ordering::Relaxed)
    }

    // ── Stream consumption ───────────────────────────────────────────────────

    /// Next packet from the consumer queue, in arrival order. `Ok(None)`
    /// means the session ended. Dropping the future (or not calling again)
    /// leaves later packets queued; it never closes the session.
    pub async fn recv(&self) -> Result<Option<Packet>, ImuError> {
        self.recv_tagged().await.map(|r| r.map(|(_, p)| p))
    }

    /// Like [`Device::recv`], with the BLE channel the packet arrived on.
    pub async fn recv_tagged(&self) -> Result<Option<(Channel, Packet)>, ImuError> {
        loop {
            {
                let mut queue = self.shared.queue.lock().unwrap();
                if queue.overflowed {
                    queue.overflowed = false;
                    return Err(ImuError::QueueOverflow);
                }
                if let Some(entry) = queue.deque.pop_front() {
                    return Ok(Some(entry));
                }
                if queue.closed {
                    return Ok(None);
                }
            }
            self.shared.queue_notify.notified().await;
        }
    }

    /// Non-blocking variant of [`Device::recv`].
    pub fn poll(&self) -> Option<Packet> {
        self.shared
            .queue
            .lock()
            .unwrap()
            .deque
            .pop_front()
            .map(|(_, p)| p)
    }

    // ── Send paths ───────────────────────────────────────────────────────────

    /// Encode and write one frame. Returns once the transport write
    /// completed.
    pub async fn send(&self, packet: &Packet) -> Result<(), ImuError> {
        if self.shared.poisoned.load(Ordering::Relaxed) {
            return Err(ImuError::Disconnected);
        }
        let frame = packet.to_frame();
        self.link.lock().await.send_frame(&frame).await
    }

    /// Send a command and suspend until the device answers with one of
    /// `expected` or with a `SensorError` for this command, or until
    /// `timeout` expires.
    ///
    /// Cancelling the returned future (or timing out) removes the waiter; a
    /// response arriving afterwards is rerouted to the consumer queue.
    pub async fn send_and_await(
        &self,
        packet: &Packet,
        expected: &[Header],
        timeout: Duration,
    ) -> Result<Packet, ImuError> {
        if self.shared.poisoned.load(Ordering::Relaxed) {
            return Err(ImuError::Disconnected);
        }
        let command = packet
            .header()
            .expect("commands always have a registered header");

        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(tx)));
        {
            let mut pending = self.shared.pending.lock().unwrap();
            for &header in expected {
                if pending.contains_key(&header) {
                    return Err(ImuError::CommandInFlight(header));
                }
            }
            for &header in expected {
                pending.insert(
                    header,
                    Waiter {
                        command,
                        slot: Arc::clone(&slot),
                    },
                );
            }
        }

        let cleanup = || {
            let mut pending = self.shared.pending.lock().unwrap();
            for &header in expected {
                if let Some(waiter) = pending.get(&header) {
                    if Arc::ptr_eq(&waiter.slot, &slot) {
                        pending.remove(&header);
                    }
                }
            }
        };

        if let Err(e) = self.send(packet).await {
            cleanup();
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => {
                cleanup();
                result
            }
            Ok(Err(_)) => {
                cleanup();
                Err(ImuError::Disconnected)
            }
            Err(_) => {
                cleanup();
                Err(ImuError::Timeout(expected[0]))
            }
        }
    }

    async fn command(&self, packet: Packet, expected: Header) -> Result<Packet, ImuError> {
        self.send_and_await(&packet, &[expected], self.config.command_timeout)
            .await
    }

    // ── Initialisation ───────────────────────────────────────────────────────

    /// Bring the device into a consistent state after connecting.
    ///
    /// Requests device info (which also starts USB transmission), waits for
    /// the first `DataStatus`, optionally aborts an ongoing recording or
    /// streaming session, and optionally sets the sensor clock. A no-op on
    /// playback devices.
    pub async fn init(&self, options: InitOptions) -> Result<(), ImuError> {
        if self.kind == TransportKind::Playback {
            return Ok(());
        }

        self.get_device_info().await?;
        let status = self.wait_for_status().await?;

        match status.sensor_state {
            SensorState::Recording => {
                if options.abort_recording {
                    self.command(Packet::CmdStopRecording, Header::AckStopRecording)
                        .await?;
                } else {
                    return Err(ImuError::DeviceIsRecording);
                }
            }
            SensorState::Streaming => {
                if options.abort_streaming {
                    self.stop_streaming_and_clear_buffer().await?;
                } else {
                    return Err(ImuError::DeviceIsStreaming);
                }
            }
            _ => {}
        }

        if options.set_time {
            self.set_absolute_time(now_ns()).await?;
        }
        Ok(())
    }

    async fn wait_for_status(&self) -> Result<Status, ImuError> {
        let deadline = tokio::time::Instant::now() + self.config.command_timeout;
        loop {
            if let Some(status) = self.status() {
                return Ok(status);
            }
            if self.shared.poisoned.load(Ordering::Relaxed) {
                return Err(ImuError::Disconnected);
            }
            let wait = self.shared.status_notify.notified();
            if tokio::time::timeout_at(deadline, wait).await.is_err() {
                return Err(ImuError::Timeout(Header::DataStatus));
            }
        }
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    /// Request the identity block. Also caches it (see
    /// [`Device::device_info`]) and updates the session name.
    pub async fn get_device_info(&self) -> Result<DeviceInfo, ImuError> {
        match self
            .command(Packet::CmdGetDeviceInfo, Header::DataDeviceInfo)
            .await?
        {
            Packet::DataDeviceInfo(info) => Ok(info),
            other => unreachable!("waiter returned {other:?}"),
        }
    }

    /// Set the sensor clock, nanoseconds since the Unix epoch.
    pub async fn set_absolute_time(&self, timestamp_ns: i64) -> Result<(), ImuError> {
        self.command(
            Packet::CmdSetAbsoluteTime(AbsoluteTime {
                new_timestamp: timestamp_ns,
            }),
            Header::DataAbsoluteTime,
        )
        .await
        .map(|_| ())
    }

    /// Configure which outputs the sensor produces. Returns the echoed
    /// configuration.
    pub async fn set_measurement_mode(
        &self,
        mode: MeasurementMode,
    ) -> Result<MeasurementMode, ImuError> {
        match self
            .command(
                Packet::CmdSetMeasurementMode(mode),
                Header::DataMeasurementMode,
            )
            .await?
        {
            Packet::DataMeasurementMode(echo) => Ok(echo),
            other => unreachable!("waiter returned {other:?}"),
        }
    }

    /// Configure burst capture.
    pub async fn set_burst_mode(&self, mode: BurstMode) -> Result<(), ImuError> {
        self.command(Packet::CmdSetBurstMode(mode), Header::DataBurstMode)
            .await
            .map(|_| ())
    }

    /// Set the filename for the next recording (ASCII, at most 64 chars).
    pub async fn set_recording_config(&self, filename: &str) -> Result<(), ImuError> {
        self.command(
            Packet::CmdSetRecordingConfig(RecordingConfig {
                filename: filename.to_owned(),
            }),
            Header::DataRecordingConfig,
        )
        .await
        .map(|_| ())
    }

    /// Start recording to device storage. Refused client-side with
    /// [`ImuError::DeviceIsRecording`] when the cached status already says
    /// recording; nothing is written to the transport in that case.
    pub async fn start_recording(&self) -> Result<(), ImuError> {
        refuse_start(self.status(), SensorState::Recording)?;
        self.command(Packet::CmdStartRecording, Header::AckStartRecording)
            .await
            .map(|_| ())
    }

    pub async fn stop_recording(&self) -> Result<(), ImuError> {
        self.command(Packet::CmdStopRecording, Header::AckStopRecording)
            .await
            .map(|_| ())
    }

    /// Start streaming over the send buffer. Refused client-side with
    /// [`ImuError::DeviceIsStreaming`] when already streaming.
    pub async fn start_streaming(&self) -> Result<(), ImuError> {
        refuse_start(self.status(), SensorState::Streaming)?;
        self.command(Packet::CmdStartStreaming, Header::AckStartStreaming)
            .await
            .map(|_| ())
    }

    pub async fn stop_streaming(&self) -> Result<(), ImuError> {
        self.command(Packet::CmdStopStreaming, Header::AckStopStreaming)
            .await
            .map(|_| ())
    }

    /// Stop streaming and discard whatever is still in the device's send
    /// buffer. The abandoned stream may cut off mid-frame; the framer
    /// resynchronises on its own.
    ///
    /// Sensor-data and file-content packets that were already in flight
    /// when the stop was sent are discarded until the ack arrives, so a
    /// consumer never observes pre-abort samples afterwards.
    pub async fn stop_streaming_and_clear_buffer(&self) -> Result<(), ImuError> {
        self.shared.draining.store(true, Ordering::Relaxed);
        let result = self
            .command(
                Packet::CmdStopStreamingAndClearBuffer,
                Header::AckStopStreamingAndClearBuffer,
            )
            .await
            .map(|_| ());
        self.shared.draining.store(false, Ordering::Relaxed);
        result
    }

    /// Start the real-time channel. `rate_limit` falls back to the
    /// configured default when `None`; 0 selects the device default of
    /// 50 Hz.
    pub async fn start_real_time_streaming(
        &self,
        mode: RealTimeDataMode,
        rate_limit: Option<u8>,
    ) -> Result<(), ImuError> {
        refuse_start(self.status(), SensorState::RealTimeStreaming)?;
        let rate_limit = rate_limit.unwrap_or(self.config.rt_rate_limit);
        self.command(
            Packet::CmdStartRealTimeStreaming(RealTimeConfig { mode, rate_limit }),
            Header::AckStartRealTimeStreaming,
        )
        .await
        .map(|_| ())
    }

    pub async fn stop_real_time_streaming(&self) -> Result<(), ImuError> {
        self.command(
            Packet::CmdStopRealTimeStreaming,
            Header::AckStopRealTimeStreaming,
        )
        .await
        .map(|_| ())
    }

    /// Put the sensor to sleep (wakes on motion or button).
    pub async fn sleep(&self) -> Result<(), ImuError> {
        self.command(Packet::CmdSleep, Header::AckSleep).await.map(|_| ())
    }

    /// Put the sensor into deep sleep (wakes on button only).
    pub async fn deep_sleep(&self) -> Result<(), ImuError> {
        self.command(Packet::CmdDeepSleep, Header::AckDeepSleep)
            .await
            .map(|_| ())
    }

    pub async fn set_led(&self, led: LedConfig) -> Result<(), ImuError> {
        self.command(Packet::CmdSetLed(led), Header::AckSetLed)
            .await
            .map(|_| ())
    }

    pub async fn set_sync_output(&self, sync: SyncOutput) -> Result<(), ImuError> {
        self.command(Packet::CmdSetSyncOutput(sync), Header::AckSetSyncOutput)
            .await
            .map(|_| ())
    }

    /// Fire one clock round-trip immediately (independent of the periodic
    /// task). The result lands in [`Device::clock_sync`] when the device
    /// answers.
    pub async fn send_clock_roundtrip(&self) -> Result<(), ImuError> {
        self.send(&Packet::DataClockRoundtrip(ClockRoundtrip {
            host_send: now_ns(),
            ..Default::default()
        }))
        .await
    }

    // ── Filesystem ───────────────────────────────────────────────────────────
    //
    // Filesystem operations are never refused client-side; the protocol
    // allows them to run alongside an active recording. The list and
    // download helpers consume data packets from the session stream while
    // they run.

    /// List the files on the device in index order.
    pub async fn list_files(&self) -> Result<Vec<FsFile>, ImuError> {
        let count = match self
            .send_and_await(
                &Packet::CmdFsListFiles,
                &[Header::DataFsFileCount],
                self.config.fs_list_timeout,
            )
            .await?
        {
            Packet::DataFsFileCount(c) => c.file_count as usize,
            other => unreachable!("waiter returned {other:?}"),
        };

        let mut files = Vec::with_capacity(count);
        let deadline = tokio::time::Instant::now() + self.config.fs_list_timeout;
        while files.len() < count {
            let packet = tokio::time::timeout_at(deadline, self.recv())
                .await
                .map_err(|_| ImuError::Timeout(Header::DataFsFile))??
                .ok_or(ImuError::Disconnected)?;
            match packet {
                Packet::DataFsFile(file) => files.push(file),
                other => debug!("ignoring {other:?} while listing files"),
            }
        }
        files.sort_by_key(|f| f.index);
        Ok(files)
    }

    /// Size of one file on the device.
    pub async fn file_size(&self, filename: &str) -> Result<u64, ImuError> {
        match self
            .command(
                Packet::CmdFsGetSize(FsName {
                    filename: filename.to_owned(),
                }),
                Header::DataFsSize,
            )
            .await?
        {
            Packet::DataFsSize(size) => Ok(size.file_size),
            other => unreachable!("waiter returned {other:?}"),
        }
    }

    /// Download a file (or a byte range of it) into memory.
    ///
    /// Chunks must advance the offset monotonically; a gap triggers a
    /// re-request of the missing range. If the device stops sending for the
    /// configured grace period, the transfer is cancelled with
    /// `CmdFsStopGetBytes` and the call fails with a timeout.
    pub async fn download(
        &self,
        filename: &str,
        range: Option<(u32, u32)>,
    ) -> Result<Vec<u8>, ImuError> {
        const MAX_GAP_RETRIES: u32 = 3;

        let (start, end) = range.unwrap_or((0, 0));
        let total: u64 = if end > start {
            (end - start) as u64
        } else {
            self.file_size(filename).await? - start as u64
        };

        self.send(&Packet::CmdFsGetBytes(FsGetBytes {
            filename: filename.to_owned(),
            start_pos: start,
            end_pos: end,
        }))
        .await?;

        let mut data = Vec::with_capacity(total as usize);
        let mut expected_offset = start as u64;
        let mut retries = 0u32;

        while (data.len() as u64) < total {
            let packet = match tokio::time::timeout(self.config.download_grace, self.recv()).await
            {
                Ok(result) => result?.ok_or(ImuError::Disconnected)?,
                Err(_) => {
                    // The device went quiet; cancel cleanly and give up.
                    self.command(Packet::CmdFsStopGetBytes, Header::AckFsStopGetBytes)
                        .await
                        .ok();
                    return Err(ImuError::Timeout(Header::DataFsBytes));
                }
            };

            let chunk = match packet {
                Packet::DataFsBytes(chunk) => chunk,
                other => {
                    debug!("ignoring {other:?} during download");
                    continue;
                }
            };

            if chunk.offset as u64 != expected_offset {
                warn!(
                    "chunk offset {} does not match expected {expected_offset}, re-requesting",
                    chunk.offset
                );
                retries += 1;
                if retries > MAX_GAP_RETRIES {
                    self.command(Packet::CmdFsStopGetBytes, Header::AckFsStopGetBytes)
                        .await
                        .ok();
                    return Err(ImuError::Timeout(Header::DataFsBytes));
                }
                self.send(&Packet::CmdFsGetBytes(FsGetBytes {
                    filename: filename.to_owned(),
                    start_pos: expected_offset as u32,
                    end_pos: end,
                }))
                .await?;
                continue;
            }

            expected_offset += chunk.data.len() as u64;
            data.extend_from_slice(&chunk.data);
        }

        Ok(data)
    }

    /// Delete one file from the device.
    pub async fn delete_file(&self, filename: &str) -> Result<(), ImuError> {
        self.command(
            Packet::CmdFsDeleteFile(FsName {
                filename: filename.to_owned(),
            }),
            Header::AckFsDeleteFile,
        )
        .await
        .map(|_| ())
    }

    /// Erase the whole device filesystem.
    pub async fn format_filesystem(&self) -> Result<(), ImuError> {
        self.send_and_await(
            &Packet::CmdFsFormatFilesystem,
            &[Header::AckFsFormatFilesystem],
            self.config.fs_list_timeout,
        )
        .await
        .map(|_| ())
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    /// Close the session: stop the background tasks, fail pending waiters
    /// with [`ImuError::Disconnected`], and release the transport.
    pub async fn disconnect(&self) {
        *self.shared.state.lock().unwrap() = ConnectionState::Closing;
        if let Some(clock_task) = &self.clock_task {
            clock_task.abort();
        }
        self.link.lock().await.disconnect().await;
        self.shared.close();
        self.recv_task.abort();
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Some(clock_task) = &self.clock_task {
            clock_task.abort();
        }
        self.recv_task.abort();
        self.shared.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SensorErrorCode;
    use crate::packets::{DataRate, FsBytes, QuatFixed, SensorErrorInfo};

    fn shared(capacity: usize, policy: OverflowPolicy) -> Arc<SharedState> {
        Arc::new(SharedState::new("IMU_test".into(), capacity, policy))
    }

    fn status_frame(state: SensorState) -> Frame {
        let packet = Packet::DataStatus(Status {
            sensor_state: state,
            ..Default::default()
        });
        Frame {
            header: packet.raw_header(),
            payload: packet.encode_payload(),
        }
    }

    fn register(
        shared: &SharedState,
        command: Header,
        expected: Header,
    ) -> oneshot::Receiver<Result<Packet, ImuError>> {
        let (tx, rx) = oneshot::channel();
        shared.pending.lock().unwrap().insert(
            expected,
            Waiter {
                command,
                slot: Arc::new(Mutex::new(Some(tx))),
            },
        );
        rx
    }

    #[tokio::test]
    async fn echo_completes_waiter_instead_of_queue() {
        let shared = shared(16, OverflowPolicy::DropOldest);
        let mut rx = register(&shared, Header::CmdStartRecording, Header::AckStartRecording);

        let packet = Packet::AckStartRecording;
        let frame = Frame {
            header: packet.raw_header(),
            payload: vec![],
        };
        shared.handle_frame(Channel::SendBuffer, &frame, 0);

        assert_eq!(rx.try_recv().unwrap().unwrap(), Packet::AckStartRecording);
        assert!(shared.queue.lock().unwrap().deque.is_empty());
    }

    #[tokio::test]
    async fn cancelled_waiter_reroutes_response_to_queue() {
        let shared = shared(16, OverflowPolicy::DropOldest);
        let rx = register(&shared, Header::CmdStartRecording, Header::AckStartRecording);
        drop(rx); // caller cancelled

        let frame = Frame {
            header: Packet::AckStartRecording.raw_header(),
            payload: vec![],
        };
        shared.handle_frame(Channel::SendBuffer, &frame, 0);

        let queued = shared.queue.lock().unwrap().deque.pop_front();
        assert_eq!(queued, Some((Channel::SendBuffer, Packet::AckStartRecording)));
    }

    #[tokio::test]
    async fn sensor_error_completes_matching_command_waiter() {
        let shared = shared(16, OverflowPolicy::DropOldest);
        let mut rx = register(&shared, Header::CmdStartRecording, Header::AckStartRecording);

        let packet = Packet::SensorError(SensorErrorInfo {
            command: Header::CmdStartRecording.as_u16(),
            code: SensorErrorCode::WrongState,
        });
        let frame = Frame {
            header: packet.raw_header(),
            payload: packet.encode_payload(),
        };
        shared.handle_frame(Channel::SendBuffer, &frame, 0);

        match rx.try_recv().unwrap() {
            Err(ImuError::Device { command, code }) => {
                assert_eq!(command, Header::CmdStartRecording);
                assert_eq!(code, SensorErrorCode::WrongState);
            }
            other => panic!("unexpected completion: {other:?}"),
        }
        // The error was consumed by the waiter, not queued.
        assert!(shared.queue.lock().unwrap().deque.is_empty());
    }

    #[tokio::test]
    async fn unmatched_sensor_error_goes_to_queue() {
        let shared = shared(16, OverflowPolicy::DropOldest);
        let packet = Packet::SensorError(SensorErrorInfo {
            command: Header::CmdFsListFiles.as_u16(),
            code: SensorErrorCode::FilesystemFull,
        });
        let frame = Frame {
            header: packet.raw_header(),
            payload: packet.encode_payload(),
        };
        shared.handle_frame(Channel::SendBuffer, &frame, 0);
        assert_eq!(shared.queue.lock().unwrap().deque.len(), 1);
    }

    #[tokio::test]
    async fn status_updates_cached_state_and_still_queues() {
        let shared = shared(16, OverflowPolicy::DropOldest);
        shared.handle_frame(Channel::SendBuffer, &status_frame(SensorState::Recording), 0);

        let cached = shared.status.lock().unwrap().unwrap();
        assert_eq!(cached.sensor_state, SensorState::Recording);
        assert_eq!(shared.queue.lock().unwrap().deque.len(), 1);
    }

    #[tokio::test]
    async fn drop_oldest_policy_counts_drops() {
        let shared = shared(2, OverflowPolicy::DropOldest);
        for _ in 0..5 {
            shared.handle_frame(Channel::SendBuffer, &status_frame(SensorState::Idle), 0);
        }
        assert_eq!(shared.queue.lock().unwrap().deque.len(), 2);
        assert_eq!(shared.dropped_packets.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn error_policy_flags_overflow() {
        let shared = shared(1, OverflowPolicy::Error);
        shared.handle_frame(Channel::SendBuffer, &status_frame(SensorState::Idle), 0);
        shared.handle_frame(Channel::SendBuffer, &status_frame(SensorState::Idle), 0);
        assert!(shared.queue.lock().unwrap().overflowed);
    }

    #[tokio::test]
    async fn close_fails_pending_waiters_with_disconnected() {
        let shared = shared(16, OverflowPolicy::DropOldest);
        let mut rx = register(&shared, Header::CmdSleep, Header::AckSleep);
        shared.close();
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(ImuError::Disconnected)
        ));
        assert!(shared.queue.lock().unwrap().closed);
    }

    #[tokio::test]
    async fn clock_roundtrip_is_stamped_and_cached() {
        let shared = shared(16, OverflowPolicy::DropOldest);
        let packet = Packet::DataClockRoundtrip(ClockRoundtrip {
            host_send: 1000,
            sensor_receive: 1050,
            sensor_send: 1060,
            host_receive: 0,
        });
        let frame = Frame {
            header: packet.raw_header(),
            payload: packet.encode_payload(),
        };
        shared.handle_frame(Channel::SendBuffer, &frame, 1120);

        let sync = shared.clock_sync.lock().unwrap().unwrap();
        assert_eq!(sync.delay_ns, 55);
        assert_eq!(sync.offset_ns, 5);

        // The stamped packet also reaches the consumer.
        let (_, queued) = shared.queue.lock().unwrap().deque.pop_front().unwrap();
        match queued {
            Packet::DataClockRoundtrip(c) => assert_eq!(c.host_receive, 1120),
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[tokio::test]
    async fn decode_errors_are_counted_not_fatal() {
        let shared = shared(16, OverflowPolicy::DropOldest);
        let frame = Frame {
            header: Header::DataStatus.as_u16(),
            payload: vec![0; 5], // wrong size
        };
        shared.handle_frame(Channel::SendBuffer, &frame, 0);
        assert_eq!(shared.decode_errors.load(Ordering::Relaxed), 1);
        assert!(shared.queue.lock().unwrap().deque.is_empty());
    }

    #[test]
    fn refusal_checks_cached_state_only() {
        let recording = Status {
            sensor_state: SensorState::Recording,
            ..Default::default()
        };
        assert!(matches!(
            refuse_start(Some(recording), SensorState::Recording),
            Err(ImuError::DeviceIsRecording)
        ));
        assert!(refuse_start(Some(recording), SensorState::Streaming).is_ok());

        let streaming = Status {
            sensor_state: SensorState::Streaming,
            ..Default::default()
        };
        assert!(matches!(
            refuse_start(Some(streaming), SensorState::Streaming),
            Err(ImuError::DeviceIsStreaming)
        ));
        // No status yet: nothing to refuse on.
        assert!(refuse_start(None, SensorState::Recording).is_ok());
    }

    #[tokio::test]
    async fn draining_discards_stale_stream_data() {
        let shared = shared(16, OverflowPolicy::DropOldest);
        shared.draining.store(true, Ordering::Relaxed);

        // Stream data and file content from the aborted session vanish.
        let stale = Packet::DataQuatFixed(DataRate::Hz50, QuatFixed::default());
        let frame = Frame {
            header: stale.raw_header(),
            payload: stale.encode_payload(),
        };
        shared.handle_frame(Channel::SendBuffer, &frame, 0);

        let stale_fs = Packet::DataFsBytes(FsBytes {
            offset: 0,
            data: vec![1, 2, 3],
        });
        let frame = Frame {
            header: stale_fs.raw_header(),
            payload: stale_fs.encode_payload(),
        };
        shared.handle_frame(Channel::SendBuffer, &frame, 0);
        assert!(shared.queue.lock().unwrap().deque.is_empty());

        // Status still flows, and the stop ack still completes its waiter.
        shared.handle_frame(Channel::SendBuffer, &status_frame(SensorState::Idle), 0);
        assert_eq!(shared.queue.lock().unwrap().deque.len(), 1);

        let mut rx = register(
            &shared,
            Header::CmdStopStreamingAndClearBuffer,
            Header::AckStopStreamingAndClearBuffer,
        );
        let ack = Packet::AckStopStreamingAndClearBuffer;
        let frame = Frame {
            header: ack.raw_header(),
            payload: vec![],
        };
        shared.handle_frame(Channel::SendBuffer, &frame, 0);
        assert_eq!(
            rx.try_recv().unwrap().unwrap(),
            Packet::AckStopStreamingAndClearBuffer
        );

        // Once the window closes, data packets pass again.
        shared.draining.store(false, Ordering::Relaxed);
        let fresh = Packet::DataQuatFixed(DataRate::Hz50, QuatFixed::default());
        let frame = Frame {
            header: fresh.raw_header(),
            payload: fresh.encode_payload(),
        };
        shared.handle_frame(Channel::SendBuffer, &frame, 0);
        assert_eq!(shared.queue.lock().unwrap().deque.len(), 2);
    }

    #[tokio::test]
    async fn unknown_header_reaches_queue_opaquely() {
        let shared = shared(16, OverflowPolicy::DropOldest);
        let frame = Frame {
            header: 0x0599,
            payload: vec![9, 9],
        };
        shared.handle_frame(Channel::RealTime, &frame, 0);
        let (channel, packet) = shared.queue.lock().unwrap().deque.pop_front().unwrap();
        assert_eq!(channel, Channel::RealTime);
        assert_eq!(
            packet,
            Packet::Unknown {
                header: 0x0599,
                payload: vec![9, 9]
            }
        );
    }
}
