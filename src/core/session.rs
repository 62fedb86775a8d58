//! Serial session engine.
//!
//! A [`SerialSession`] owns one open port, its configuration and the
//! background listener that drains inbound bytes. Outbound traffic flows
//! through manual sends, a repeating auto-send job or whole-file
//! transmission, all serialized over a single writer lock. Everything the
//! presentation layer needs to render comes back as [`SessionEvent`]s on a
//! broadcast channel.

use crate::core::codec::{self, EncodingError, TextEncoding};
use crate::core::transport::{
    LineEvent, LineSettings, Parity, SerialTransport, Transport, TransportError,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const LISTENER_IDLE_POLL: Duration = Duration::from_millis(10);
/// How long teardown waits for an in-flight transmission unit before
/// abandoning the task.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Port configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: Parity,
    /// Text encoding used for sends and text display
    pub encoding: TextEncoding,
}

impl PortConfig {
    /// Create a configuration with default line parameters (8-N-1, GBK).
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            encoding: TextEncoding::default(),
        }
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set the text encoding
    #[must_use]
    pub fn encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Check ranges before any hardware is touched. The presentation layer
    /// validates user input already; the engine re-validates defensively.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port.is_empty() {
            return Err(ConfigError::InvalidParameters(
                "port name is empty".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::InvalidParameters(
                "baud rate must be positive".to_string(),
            ));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ConfigError::InvalidParameters(format!(
                "data bits must be 5-8, got {}",
                self.data_bits
            )));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(ConfigError::InvalidParameters(format!(
                "stop bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        Ok(())
    }

    /// The wire-level subset of this configuration.
    pub fn line_settings(&self) -> LineSettings {
        LineSettings {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
        }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self::new("COM1", 9600)
    }
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No port held
    Closed,
    /// Port open and listener running
    Open,
}

/// Notifications pushed to the presentation layer.
///
/// Ordering within each kind matches the order bytes were produced or
/// consumed; the channel's total order makes that hold trivially.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// One received byte, in arrival order.
    InboundByte(u8),
    /// One transmission unit completed, carrying this many bytes.
    BytesSent(u64),
    /// Informational line-state change; never affects the session.
    Line(LineEvent),
}

/// Errors opening a port
#[derive(Debug, Error)]
pub enum OpenError {
    /// The named port does not exist
    #[error("port not found: {0}")]
    PortNotFound(String),

    /// The port is claimed by another process
    #[error("port is busy: {0}")]
    PortBusy(String),

    /// Parameters out of range
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The device rejected the configuration
    #[error("device error: {0}")]
    Device(#[source] TransportError),
}

impl From<TransportError> for OpenError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::PortNotFound(name) => Self::PortNotFound(name),
            TransportError::PortBusy(name) => Self::PortBusy(name),
            TransportError::InvalidSettings(msg) => Self::InvalidParameters(msg),
            other => Self::Device(other),
        }
    }
}

/// Errors re-applying line parameters
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The session is not open
    #[error("session is not open")]
    NotOpen,

    /// Parameters out of range
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The device rejected the settings; the previous parameters remain in
    /// effect as far as the driver allows
    #[error("device error: {0}")]
    Device(#[source] TransportError),
}

/// Errors on the outbound path
#[derive(Debug, Error)]
pub enum SendError {
    /// The session is not open
    #[error("session is not open")]
    NotOpen,

    /// File to transmit does not exist
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// The payload cannot be represented in the session encoding
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// Auto-send interval must be positive
    #[error("auto-send interval must be positive")]
    InvalidInterval,

    /// Write failed
    #[error("I/O error: {0}")]
    Io(#[source] TransportError),
}

/// Handle to a running auto-send job.
///
/// Each job owns its cancellation token, so starting a new job can never
/// leave a previous loop running on a stale flag.
#[derive(Debug, Clone)]
pub struct AutoSendHandle {
    cancel: CancellationToken,
}

impl AutoSendHandle {
    /// Signal the job to stop after its current iteration.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the job has been told to stop.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct AutoSendJob {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct ListenerTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// The serial session engine.
///
/// One instance binds the application to at most one open port at a time;
/// multiple instances are independent (there is no process-wide state).
pub struct SerialSession {
    config: RwLock<Option<PortConfig>>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    event_tx: broadcast::Sender<SessionEvent>,
    /// Serializes manual sends, file sends and the auto-send loop over the
    /// output handle so transmission units never interleave on the wire.
    write_gate: Arc<tokio::sync::Mutex<()>>,
    sent_total: Arc<AtomicU64>,
    listener: Mutex<Option<ListenerTask>>,
    auto_send: Mutex<Option<AutoSendJob>>,
}

impl SerialSession {
    /// Create a closed session.
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config: RwLock::new(None),
            transport: RwLock::new(None),
            event_tx,
            write_gate: Arc::new(tokio::sync::Mutex::new(())),
            sent_total: Arc::new(AtomicU64::new(0)),
            listener: Mutex::new(None),
            auto_send: Mutex::new(None),
        }
    }

    /// Open the configured port and start the inbound listener.
    ///
    /// An already-open session is implicitly closed first, so handles are
    /// never leaked by reopening.
    pub async fn open(&self, config: PortConfig) -> Result<(), OpenError> {
        config.validate().map_err(invalid_parameters)?;
        if self.is_open() {
            tracing::info!("closing previous session before reopening");
            self.close().await;
        }

        let transport = SerialTransport::open(&config.port, &config.line_settings()).await?;
        self.install(config, Arc::new(transport));
        Ok(())
    }

    /// Open over an externally supplied transport. This is how tests drive
    /// the engine against a fake port.
    pub async fn open_with(
        &self,
        config: PortConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<(), OpenError> {
        config.validate().map_err(invalid_parameters)?;
        if self.is_open() {
            self.close().await;
        }
        self.install(config, transport);
        Ok(())
    }

    fn install(&self, config: PortConfig, transport: Arc<dyn Transport>) {
        *self.config.write() = Some(config);
        *self.transport.write() = Some(transport.clone());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(listener_loop(
            transport,
            self.event_tx.clone(),
            cancel.clone(),
        ));
        *self.listener.lock() = Some(ListenerTask { cancel, task });
    }

    /// Re-apply line parameters on the live handle without tearing down
    /// streams or the listener. The session's port name is kept; only line
    /// parameters and encoding are taken from `config`.
    pub fn reconfigure(&self, config: PortConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let transport = self
            .transport
            .read()
            .clone()
            .ok_or(ConfigError::NotOpen)?;

        transport
            .reconfigure(&config.line_settings())
            .map_err(|e| match e {
                TransportError::InvalidSettings(msg) => ConfigError::InvalidParameters(msg),
                TransportError::NotOpen => ConfigError::NotOpen,
                other => ConfigError::Device(other),
            })?;

        let mut stored = self.config.write();
        if let Some(existing) = stored.as_mut() {
            let port = existing.port.clone();
            *existing = PortConfig { port, ..config };
        }
        Ok(())
    }

    /// Close the session. Valid in any state, idempotent, infallible:
    /// teardown failures are logged and skipped over.
    pub async fn close(&self) {
        // Stop the repeating job first so nothing new reaches the wire.
        self.stop_auto_send().await;

        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            listener.cancel.cancel();
            join_bounded("listener", listener.task).await;
        }

        let transport = self.transport.write().take();
        if let Some(transport) = transport {
            transport.close();
        }
        *self.config.write() = None;
    }

    /// Encode `text` and transmit it.
    ///
    /// Hex mode writes one byte per transmission unit; plain mode writes
    /// the whole buffer as one unit. Either way every unit is reported
    /// with one [`SessionEvent::BytesSent`]. Returns the number of bytes
    /// put on the wire.
    pub async fn send(&self, text: &str, hex_mode: bool) -> Result<u64, SendError> {
        let (transport, encoding) = self.open_parts()?;
        let payload = codec::encode(text, encoding)?;
        transmit(
            &transport,
            &self.write_gate,
            &self.event_tx,
            &self.sent_total,
            &payload,
            hex_mode,
        )
        .await
    }

    /// Encode `text` once and retransmit it every `interval` until the
    /// returned handle (or the session) stops it. A job that is already
    /// running is replaced: it is cancelled and awaited first.
    pub async fn start_auto_send(
        &self,
        text: &str,
        hex_mode: bool,
        interval: Duration,
    ) -> Result<AutoSendHandle, SendError> {
        if interval.is_zero() {
            return Err(SendError::InvalidInterval);
        }
        let (transport, encoding) = self.open_parts()?;
        let payload = codec::encode(text, encoding)?;

        self.stop_auto_send().await;

        let cancel = CancellationToken::new();
        let handle = AutoSendHandle {
            cancel: cancel.clone(),
        };

        let write_gate = self.write_gate.clone();
        let event_tx = self.event_tx.clone();
        let sent_total = self.sent_total.clone();
        let job_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                if job_cancel.is_cancelled() {
                    break;
                }
                let result = transmit(
                    &transport,
                    &write_gate,
                    &event_tx,
                    &sent_total,
                    &payload,
                    hex_mode,
                )
                .await;
                if let Err(e) = result {
                    tracing::warn!(error = %e, "auto-send transmission failed, stopping job");
                    break;
                }
                // Cancellation interrupts the sleep, never the write above.
                tokio::select! {
                    _ = job_cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        *self.auto_send.lock() = Some(AutoSendJob { cancel, task });
        Ok(handle)
    }

    /// Stop the running auto-send job, if any. Waits out the job's current
    /// transmission unit with a bounded join; idempotent.
    pub async fn stop_auto_send(&self) {
        let job = self.auto_send.lock().take();
        if let Some(job) = job {
            job.cancel.cancel();
            join_bounded("auto-send", job.task).await;
        }
    }

    /// Whether an auto-send job is currently running.
    pub fn is_auto_sending(&self) -> bool {
        self.auto_send
            .lock()
            .as_ref()
            .map(|job| !job.task.is_finished())
            .unwrap_or(false)
    }

    /// Read `path` as text in the session encoding and transmit it
    /// byte-by-byte, one [`SessionEvent::BytesSent`] per byte so progress
    /// can be rendered. A file that does not decode cleanly is rejected
    /// before anything reaches the wire.
    pub async fn send_file(&self, path: impl AsRef<Path>) -> Result<u64, SendError> {
        let (transport, encoding) = self.open_parts()?;
        let path = path.as_ref();

        let raw = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SendError::FileNotFound(path.to_path_buf()),
            _ => SendError::Io(TransportError::Io(e)),
        })?;

        // Strict decode doubles as the text-content check; a clean decode
        // re-encodes to the same bytes, so the file is transmitted as read.
        // File contents are not line-ending normalized.
        codec::decode(&raw, encoding)?;

        transmit(
            &transport,
            &self.write_gate,
            &self.event_tx,
            &self.sent_total,
            &raw,
            true,
        )
        .await
    }

    /// Subscribe to session notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        if self.is_open() {
            SessionState::Open
        } else {
            SessionState::Closed
        }
    }

    /// Whether a port is currently held.
    pub fn is_open(&self) -> bool {
        self.transport.read().is_some()
    }

    /// Bytes transmitted since the session was created (or the counter was
    /// last reset).
    pub fn bytes_sent_total(&self) -> u64 {
        self.sent_total.load(Ordering::Relaxed)
    }

    /// Reset the sent-bytes counter to zero.
    pub fn reset_sent_counter(&self) {
        self.sent_total.store(0, Ordering::Relaxed);
    }

    /// The active configuration, if open.
    pub fn config(&self) -> Option<PortConfig> {
        self.config.read().clone()
    }

    fn open_parts(&self) -> Result<(Arc<dyn Transport>, TextEncoding), SendError> {
        let transport = self.transport.read().clone().ok_or(SendError::NotOpen)?;
        let encoding = self
            .config
            .read()
            .as_ref()
            .map(|c| c.encoding)
            .unwrap_or_default();
        Ok((transport, encoding))
    }
}

impl Default for SerialSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SerialSession {
    fn drop(&mut self) {
        if let Some(job) = self.auto_send.get_mut().take() {
            job.cancel.cancel();
            job.task.abort();
        }
        if let Some(listener) = self.listener.get_mut().take() {
            listener.cancel.cancel();
            listener.task.abort();
        }
        if let Some(transport) = self.transport.get_mut().take() {
            transport.close();
        }
    }
}

/// Write one payload as one or many transmission units, reporting each
/// unit with a [`SessionEvent::BytesSent`]. The writer lock is held for
/// the whole payload so concurrent senders cannot interleave on the wire.
async fn transmit(
    transport: &Arc<dyn Transport>,
    write_gate: &tokio::sync::Mutex<()>,
    event_tx: &broadcast::Sender<SessionEvent>,
    sent_total: &AtomicU64,
    payload: &[u8],
    per_byte: bool,
) -> Result<u64, SendError> {
    let _writer = write_gate.lock().await;

    if per_byte {
        let mut sent = 0u64;
        for &byte in payload {
            transport.write_all(&[byte]).await.map_err(send_io)?;
            sent += 1;
            sent_total.fetch_add(1, Ordering::Relaxed);
            let _ = event_tx.send(SessionEvent::BytesSent(1));
        }
        Ok(sent)
    } else {
        transport.write_all(payload).await.map_err(send_io)?;
        let count = payload.len() as u64;
        sent_total.fetch_add(count, Ordering::Relaxed);
        let _ = event_tx.send(SessionEvent::BytesSent(count));
        Ok(count)
    }
}

fn send_io(e: TransportError) -> SendError {
    match e {
        TransportError::NotOpen => SendError::NotOpen,
        other => SendError::Io(other),
    }
}

fn invalid_parameters(e: ConfigError) -> OpenError {
    match e {
        ConfigError::InvalidParameters(msg) => OpenError::InvalidParameters(msg),
        other => OpenError::InvalidParameters(other.to_string()),
    }
}

/// Drain inbound bytes whenever the port has them, one byte at a time so
/// arrival order is preserved, and forward line-state changes as
/// informational events.
async fn listener_loop(
    transport: Arc<dyn Transport>,
    event_tx: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        for event in transport.poll_line_events() {
            tracing::debug!(%event, "line state change");
            let _ = event_tx.send(SessionEvent::Line(event));
        }

        match transport.bytes_to_read() {
            Ok(0) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(LISTENER_IDLE_POLL) => {}
                }
            }
            Ok(_) => loop {
                match transport.bytes_to_read() {
                    Ok(n) if n > 0 => match transport.read_byte() {
                        Ok(byte) => {
                            let _ = event_tx.send(SessionEvent::InboundByte(byte));
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "inbound read failed");
                            break;
                        }
                    },
                    Ok(_) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "available-count query failed");
                        break;
                    }
                }
            },
            Err(TransportError::NotOpen) => break,
            Err(e) => {
                tracing::warn!(error = %e, "listener poll failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(LISTENER_IDLE_POLL) => {}
                }
            }
        }
    }
}

async fn join_bounded(name: &str, mut task: JoinHandle<()>) {
    match tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(task = name, error = %e, "task ended abnormally"),
        Err(_) => {
            tracing::warn!(task = name, "task did not stop in time, abandoning it");
            task.abort();
        }
    }
}
