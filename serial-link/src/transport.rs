//! Physical transport for a serial device.
//!
//! A [`Connector`] turns a path, baud rate and [`PortMode`] into a raw byte
//! stream; [`SerialConnector`] does so with tokio-serial. The resulting
//! [`TransportHandle`] owns both halves of the stream. The read half is lent
//! to the reader loop while it runs, the write half stays behind a lock for
//! `send`, and `close` reunites and drops them.

use async_trait::async_trait;
use bitflags::bitflags;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_serial::{FlowControl, Parity, SerialPortBuilderExt, StopBits};

use crate::error::OpenError;
use crate::tracing::prelude::*;

bitflags! {
    /// Line settings applied when opening a device.
    ///
    /// The empty set means 8N1, no flow control, exclusive access.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PortMode: u32 {
        const HARDWARE_FLOW_CONTROL = 1 << 0;
        const EVEN_PARITY = 1 << 1;
        const ODD_PARITY = 1 << 2;
        const TWO_STOP_BITS = 1 << 3;
        /// Do not take the exclusive lock (TIOCEXCL) on Unix.
        const SHARED = 1 << 4;
    }
}

/// Byte stream to a device: whatever a [`Connector`] hands back.
pub trait DeviceStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> DeviceStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedStream = Box<dyn DeviceStream>;
pub type DeviceReader = ReadHalf<BoxedStream>;
pub type DeviceWriter = WriteHalf<BoxedStream>;

/// Opens device connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        path: &str,
        baud_rate: u32,
        mode: PortMode,
    ) -> Result<BoxedStream, OpenError>;
}

/// Opens real serial ports through tokio-serial.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(
        &self,
        path: &str,
        baud_rate: u32,
        mode: PortMode,
    ) -> Result<BoxedStream, OpenError> {
        if mode.contains(PortMode::EVEN_PARITY | PortMode::ODD_PARITY) {
            return Err(OpenError::InvalidInput(
                "even and odd parity are mutually exclusive".to_string(),
            ));
        }

        let parity = if mode.contains(PortMode::EVEN_PARITY) {
            Parity::Even
        } else if mode.contains(PortMode::ODD_PARITY) {
            Parity::Odd
        } else {
            Parity::None
        };
        let flow_control = if mode.contains(PortMode::HARDWARE_FLOW_CONTROL) {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };
        let stop_bits = if mode.contains(PortMode::TWO_STOP_BITS) {
            StopBits::Two
        } else {
            StopBits::One
        };

        #[allow(unused_mut)]
        let mut stream = tokio_serial::new(path, baud_rate)
            .parity(parity)
            .flow_control(flow_control)
            .stop_bits(stop_bits)
            .open_native_async()?;

        #[cfg(unix)]
        if mode.contains(PortMode::SHARED) {
            stream.set_exclusive(false)?;
        }

        Ok(Box::new(stream))
    }
}

/// An open device connection.
///
/// Both halves are `Some` exactly while the connection is open; `close`
/// takes them and is a no-op afterwards.
pub struct TransportHandle {
    path: String,
    open: AtomicBool,
    reader: Arc<Mutex<Option<DeviceReader>>>,
    writer: Mutex<Option<DeviceWriter>>,
}

impl TransportHandle {
    /// Open `path` through `connector`.
    pub async fn open(
        connector: &dyn Connector,
        path: &str,
        baud_rate: u32,
        mode: PortMode,
    ) -> Result<Self, OpenError> {
        let stream = connector.connect(path, baud_rate, mode).await?;
        debug!(path = %path, baud_rate, mode = ?mode, "Device opened.");
        Ok(Self::from_stream(path, stream))
    }

    /// Wrap an already-open stream.
    pub fn from_stream(path: impl Into<String>, stream: BoxedStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            path: path.into(),
            open: AtomicBool::new(true),
            reader: Arc::new(Mutex::new(Some(reader))),
            writer: Mutex::new(Some(writer)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// The read half, for the reader loop to hold while it runs.
    pub(crate) fn reader(&self) -> Arc<Mutex<Option<DeviceReader>>> {
        Arc::clone(&self.reader)
    }

    /// Write `bytes` and flush.
    ///
    /// Fails with `NotConnected` once the handle is closed. Concurrent sends
    /// are serialized by the writer lock but their relative order is up to
    /// the callers.
    pub async fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "output stream is closed",
            ));
        };
        debug!(path = %self.path, data = %hex::encode(bytes), "TX");
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    /// Release the device.
    ///
    /// Each half is released independently; failures are logged and the
    /// handle ends up closed regardless. The reader loop must already be
    /// stopped, otherwise this waits for it to hand back the read half.
    pub async fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }

        let reader = self.reader.lock().await.take();
        let writer = self.writer.lock().await.take();

        let mut writer = match writer {
            Some(w) => w,
            None => {
                drop(reader);
                debug!(path = %self.path, "Device closed.");
                return;
            }
        };

        if let Err(e) = writer.shutdown().await {
            warn!(path = %self.path, error = %e, "Failed to shut down output stream.");
        }

        // Dropping the reunited stream closes the file descriptor.
        match reader {
            Some(reader) => drop(reader.unsplit(writer)),
            None => drop(writer),
        }
        debug!(path = %self.path, "Device closed.");
    }
}
