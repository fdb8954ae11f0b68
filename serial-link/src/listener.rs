//! Callback contracts exposed to session owners.
//!
//! Two kinds of callbacks exist: a [`ReadCallback`] that receives every chunk
//! the reader loop pulls off the device, and a [`ConnectionListener`] that
//! hears the liveness tracker's connected/disconnected verdicts. Both live in
//! a [`Slot`], which the owner may refill at any time while the reader and
//! tracker tasks keep invoking whatever is currently installed.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receives data read from the device.
///
/// Called once per successful read with exactly the bytes that arrived. The
/// slice borrows the reader's buffer, which is reused for the next read, so
/// copy out anything that must outlive the call. Runs on the reader task:
/// keep it short and never block.
pub trait ReadCallback: Send + Sync {
    fn read_data(&self, data: &[u8]);
}

impl<F> ReadCallback for F
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn read_data(&self, data: &[u8]) {
        self(data)
    }
}

/// Receives link health verdicts from the liveness tracker.
pub trait ConnectionListener: Send + Sync {
    fn connected(&self);
    fn disconnected(&self);
}

/// A liveness verdict, for listeners that prefer a channel to a trait object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
}

// A dropped receiver just means nobody cares anymore.
impl ConnectionListener for mpsc::UnboundedSender<LinkEvent> {
    fn connected(&self) {
        let _ = self.send(LinkEvent::Connected);
    }

    fn disconnected(&self) {
        let _ = self.send(LinkEvent::Disconnected);
    }
}

/// Shared, replaceable reference to an optional callback.
///
/// Readers clone the inner `Arc` out and release the lock before invoking
/// it, so replacing the callback never waits on a callback in progress and
/// an invocation never observes a half-written slot.
pub struct Slot<T: ?Sized> {
    inner: Arc<RwLock<Option<Arc<T>>>>,
}

impl<T: ?Sized> Slot<T> {
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
        }
    }

    /// Install `value`, returning whatever was there before.
    pub fn replace(&self, value: Option<Arc<T>>) -> Option<Arc<T>> {
        std::mem::replace(&mut *self.inner.write(), value)
    }

    /// Current occupant, if any.
    pub fn load(&self) -> Option<Arc<T>> {
        self.inner.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_none()
    }
}

impl<T: ?Sized> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ?Sized> Default for Slot<T> {
    fn default() -> Self {
        Self::empty()
    }
}
