//! Session controller for one serial device.
//!
//! A [`Session`] ties together the transport, the reader loop and the
//! liveness tracker. Lifecycle calls (`open`, `close`, `start_reading`,
//! `stop_reading`) take `&mut self`, so they are serialized by the owner.
//! `send`, listener replacement and the status queries take `&self` and may
//! run alongside the background tasks.
//!
//! Nothing here returns an error to the caller: failures become a `false`
//! from `open` or a recorded [`last_error`](Session::last_error), and are
//! logged.

use std::sync::Arc;

use crate::config::SessionConfig;
use crate::error::LastError;
use crate::listener::{ConnectionListener, ReadCallback, Slot};
use crate::liveness::{LinkStatus, LivenessClock, LivenessTracker};
use crate::reader::{ReaderContext, ReaderLoop, ReaderState};
use crate::tracing::prelude::*;
use crate::transport::{Connector, PortMode, SerialConnector, TransportHandle};

/// One device connection and everything watching it.
pub struct Session {
    config: SessionConfig,
    connector: Box<dyn Connector>,
    transport: Option<TransportHandle>,
    reader: Option<ReaderLoop>,
    tracker: Option<LivenessTracker>,
    clock: Arc<LivenessClock>,
    read_callback: Slot<dyn ReadCallback>,
    listener: Slot<dyn ConnectionListener>,
    last_error: LastError,
}

impl Session {
    /// A closed session that opens real serial ports.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(config, SerialConnector)
    }

    /// A closed session that opens devices through `connector`.
    pub fn with_connector(config: SessionConfig, connector: impl Connector + 'static) -> Self {
        Self {
            config,
            connector: Box::new(connector),
            transport: None,
            reader: None,
            tracker: None,
            clock: Arc::new(LivenessClock::new()),
            read_callback: Slot::empty(),
            listener: Slot::empty(),
            last_error: LastError::default(),
        }
    }

    /// Open the device and start liveness checks.
    ///
    /// An already-open session is closed first. Returns whether the device
    /// is now open; on failure the reason is in [`last_error`](Self::last_error).
    pub async fn open(&mut self, path: &str, baud_rate: u32, mode: PortMode) -> bool {
        if self.transport.is_some() {
            info!(path = %path, "Reopening; closing the current device first.");
            self.close().await;
        }

        match TransportHandle::open(self.connector.as_ref(), path, baud_rate, mode).await {
            Ok(handle) => {
                info!(path = %path, baud_rate, "Serial port open.");
                self.transport = Some(handle);
                self.reader = None;
                self.tracker = Some(LivenessTracker::start(
                    Arc::clone(&self.clock),
                    self.config.check_interval(),
                    self.config.disconnect_threshold(),
                    self.listener.clone(),
                ));
                self.last_error.clear();
                true
            }
            Err(e) => {
                error!(path = %path, error = %e, "Failed to open serial port.");
                self.last_error.record(e.to_string());
                false
            }
        }
    }

    /// Write `bytes` to the device.
    ///
    /// Failures are logged and recorded, and the data is dropped. Callers
    /// that send from several tasks must order the sends themselves.
    pub async fn send(&self, bytes: &[u8]) {
        let Some(transport) = &self.transport else {
            error!(len = bytes.len(), "Send failed: serial port is not open.");
            return;
        };

        if let Err(e) = transport.send(bytes).await {
            error!(path = %transport.path(), error = %e, "Send failed.");
            self.last_error.record(e.to_string());
        }
    }

    /// Install `callback` and (re)start the reader loop.
    ///
    /// Any loop already running is stopped first. If the port is not open
    /// the callback is kept but no loop starts.
    pub async fn start_reading(&mut self, callback: impl ReadCallback + 'static) {
        self.read_callback.replace(Some(Arc::new(callback)));
        self.stop_reading().await;

        let Some(transport) = self.transport.as_ref().filter(|t| t.is_open()) else {
            error!("Cannot start reading: serial port is not open.");
            return;
        };

        self.reader = Some(ReaderLoop::spawn(
            transport.reader(),
            ReaderContext {
                callback: self.read_callback.clone(),
                clock: Arc::clone(&self.clock),
                last_error: self.last_error.clone(),
                buffer_size: self.config.read_buffer_size,
            },
        ));
        debug!(path = %transport.path(), "Reader loop running.");
    }

    /// Stop the reader loop; a no-op if it is not running.
    pub async fn stop_reading(&mut self) {
        if let Some(reader) = self.reader.as_mut() {
            reader.stop().await;
        }
    }

    /// Stop reading, release the device, then stop liveness checks.
    ///
    /// Safe to call repeatedly. Once this returns no callback will fire.
    pub async fn close(&mut self) {
        self.stop_reading().await;

        if let Some(transport) = self.transport.take() {
            transport.close().await;
            info!(path = %transport.path(), "Serial port closed.");
        }

        if let Some(mut tracker) = self.tracker.take() {
            tracker.stop().await;
        }
    }

    /// Replace the connected/disconnected listener. Takes effect at the next
    /// liveness check, even if one is in progress.
    pub fn set_connection_listener(&self, listener: impl ConnectionListener + 'static) {
        self.listener.replace(Some(Arc::new(listener)));
    }

    pub fn clear_connection_listener(&self) {
        self.listener.replace(None);
    }

    /// Treat the link as having just received data.
    pub fn reset_receive_time(&self) {
        self.clock.touch();
    }

    pub fn is_open(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_open())
    }

    pub fn path(&self) -> Option<&str> {
        self.transport.as_ref().map(|t| t.path())
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.get()
    }

    pub fn reader_state(&self) -> ReaderState {
        self.reader
            .as_ref()
            .map_or(ReaderState::NotStarted, ReaderLoop::state)
    }

    /// Liveness verdict as of now, independent of the periodic check.
    pub fn link_status(&self) -> LinkStatus {
        self.clock.status(self.config.disconnect_threshold())
    }
}
