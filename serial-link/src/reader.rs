//! Reader loop: drains the device and dispatches to the read callback.
//!
//! The loop runs as a task that holds the transport's read half for as long
//! as it lives. Each iteration races a read into a fixed-size buffer against
//! the loop's cancellation token, so stopping never waits on a device that
//! has gone quiet. A read error or end of stream ends the loop; there is no
//! retry, restarting is the session owner's call.

use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::LastError;
use crate::listener::{ReadCallback, Slot};
use crate::liveness::LivenessClock;
use crate::tracing::prelude::*;
use crate::transport::DeviceReader;

/// Lifecycle of a session's reader loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    NotStarted,
    Running,
    Stopped,
}

/// What the loop needs besides the stream itself.
#[derive(Clone)]
pub struct ReaderContext {
    pub callback: Slot<dyn ReadCallback>,
    pub clock: Arc<LivenessClock>,
    pub last_error: LastError,
    pub buffer_size: usize,
}

/// Handle to a running (or finished) reader task.
pub struct ReaderLoop {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ReaderLoop {
    /// Spawn a loop reading from `source`.
    ///
    /// `source` is the transport's read half; the loop locks it for its whole
    /// lifetime and exits at once if the transport has already been closed.
    pub fn spawn(source: Arc<Mutex<Option<DeviceReader>>>, ctx: ReaderContext) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(source, ctx, cancel.clone()));
        Self {
            cancel,
            task: Some(task),
        }
    }

    pub fn state(&self) -> ReaderState {
        match &self.task {
            Some(task) if !task.is_finished() => ReaderState::Running,
            _ => ReaderState::Stopped,
        }
    }

    /// Cancel the loop and wait until it has released the read half.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(error = %e, "Reader loop panicked.");
                }
            }
        }
    }
}

impl Drop for ReaderLoop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    source: Arc<Mutex<Option<DeviceReader>>>,
    ctx: ReaderContext,
    cancel: CancellationToken,
) {
    let mut guard = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        guard = source.lock_owned() => guard,
    };
    let Some(stream) = guard.as_mut() else {
        warn!("Reader loop started on a closed transport.");
        return;
    };

    trace!(buffer_size = ctx.buffer_size, "Reader loop started.");
    let mut buf = vec![0u8; ctx.buffer_size];

    while !cancel.is_cancelled() {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = stream.read(&mut buf) => result,
        };

        match result {
            Ok(0) => {
                debug!("Device reached end of stream.");
                break;
            }
            Ok(n) => {
                trace!(data = %hex::encode(&buf[..n]), "RX");
                if let Some(callback) = ctx.callback.load() {
                    callback.read_data(&buf[..n]);
                }
                ctx.clock.touch();
            }
            Err(e) => {
                error!(error = %e, "Read failed, stopping reader loop.");
                ctx.last_error.record(e.to_string());
                break;
            }
        }
    }

    trace!("Reader loop stopped.");
}
