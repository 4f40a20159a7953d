//! The serial LMN port itself: a scoped resource that is open on `start`
//! and always closed on `stop` (spec §4.12), fanning received bytes out
//! to registered consumer tasks.
//!
//! The scoped-lifecycle and fan-out-to-consumer-tasks shape is grounded
//! on the teacher's connection accept/shutdown scoping and subscriber-set
//! fan-out, adapted here from room subscribers to byte-stream consumers.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::options::{PortConfig, PortOption};

/// Errors raised opening or reconfiguring a serial LMN port.
#[derive(Error, Debug)]
pub enum PortError {
    /// The underlying OS serial port failed to open or reconfigure.
    #[error("serial port error: {0}")]
    Serial(String),
    /// The port was already open when `start` was called again.
    #[error("port already open")]
    AlreadyOpen,
    /// An operation was attempted on a port that is not open.
    #[error("port not open")]
    NotOpen,
}

impl From<tokio_serial::Error> for PortError {
    fn from(err: tokio_serial::Error) -> Self {
        Self::Serial(err.to_string())
    }
}

/// Byte-count and lifecycle updates delivered to the status receiver
/// (spec §4.12: "a status receiver additionally gets byte counts and an
/// open/closed signal").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortStatus {
    /// The port was opened.
    Opened,
    /// `count` bytes were received since the last status update.
    BytesReceived {
        /// Number of bytes received.
        count: usize,
    },
    /// The port was closed.
    Closed,
}

/// A capacity for the broadcast channels fanning out received bytes and
/// status updates. Lagging consumers drop the oldest messages rather
/// than blocking the reader loop.
const CHANNEL_CAPACITY: usize = 256;

/// A scoped serial LMN port. Opens its device on [`LmnPort::start`],
/// always closes it on [`LmnPort::stop`] (or on drop, via the owned
/// reader task's cancellation), and fans received bytes out to every
/// subscriber of [`LmnPort::subscribe`].
pub struct LmnPort {
    device: String,
    config: PortConfig,
    data_tx: broadcast::Sender<Vec<u8>>,
    status_tx: broadcast::Sender<PortStatus>,
    reader_task: Option<JoinHandle<()>>,
    write_half: Option<tokio::io::WriteHalf<tokio_serial::SerialStream>>,
}

impl LmnPort {
    /// Create a port manager for `device` (e.g. `/dev/ttyUSB0`), not yet
    /// opened.
    #[must_use]
    pub fn new(device: impl Into<String>, config: PortConfig) -> Self {
        let (data_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (status_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            device: device.into(),
            config,
            data_tx,
            status_tx,
            reader_task: None,
            write_half: None,
        }
    }

    /// Subscribe to bytes read from the port.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.data_tx.subscribe()
    }

    /// Subscribe to lifecycle/byte-count status updates.
    #[must_use]
    pub fn subscribe_status(&self) -> broadcast::Receiver<PortStatus> {
        self.status_tx.subscribe()
    }

    /// Whether the port is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.reader_task.is_some()
    }

    /// Opens the serial device at the configured parameters and spawns
    /// the fan-out reader task.
    pub fn start(&mut self) -> Result<(), PortError> {
        if self.is_open() {
            return Err(PortError::AlreadyOpen);
        }

        let port = tokio_serial::new(&self.device, self.config.baud)
            .data_bits(self.config.data_bits)
            .parity(self.config.parity)
            .stop_bits(self.config.stop_bits)
            .flow_control(self.config.flow_control)
            .open_native_async()?;

        let (mut read_half, write_half) = tokio::io::split(port);
        self.write_half = Some(write_half);

        let data_tx = self.data_tx.clone();
        let status_tx = self.status_tx.clone();
        let device = self.device.clone();

        let task = tokio::spawn(async move {
            let _ = status_tx.send(PortStatus::Opened);
            let mut buf = [0u8; 1024];
            loop {
                match read_half.read(&mut buf).await {
                    Ok(0) => {
                        debug!(device = %device, "serial read returned EOF");
                        break;
                    }
                    Ok(n) => {
                        let chunk = buf[..n].to_vec();
                        let _ = status_tx.send(PortStatus::BytesReceived { count: n });
                        let _ = data_tx.send(chunk);
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        warn!(device = %device, error = %err, "serial read error");
                        break;
                    }
                }
            }
            let _ = status_tx.send(PortStatus::Closed);
        });

        self.reader_task = Some(task);
        info!(device = %self.device, baud = self.config.baud, "LMN port opened");
        Ok(())
    }

    /// Writes `bytes` to the port.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), PortError> {
        let write_half = self.write_half.as_mut().ok_or(PortError::NotOpen)?;
        write_half.write_all(bytes).await.map_err(|err| PortError::Serial(err.to_string()))
    }

    /// Applies a runtime reconfiguration option (spec §4.12). Takes
    /// effect on the next [`LmnPort::start`]: the in-flight reader task,
    /// once spawned, owns the OS file descriptor and is not
    /// reconfigured mid-session — the caller stops and restarts the
    /// port to apply changed line parameters.
    pub fn configure(&mut self, option: PortOption) {
        self.config.apply(option);
    }

    /// Closes the port: aborts the reader task and drops the write half.
    /// Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.write_half = None;
    }
}

impl Drop for LmnPort {
    fn drop(&mut self) {
        self.stop();
    }
}
