//! Link liveness based on how recently any bytes arrived.
//!
//! The reader loop stamps a shared [`LivenessClock`] every time a read
//! returns data. A [`LivenessTracker`] task wakes on a fixed interval,
//! compares the time since that stamp against a threshold, and tells the
//! installed [`ConnectionListener`] which side of it the link is on. Payload
//! content is never inspected.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::listener::{ConnectionListener, Slot};
use crate::tracing::prelude::*;

/// Verdict of one liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

/// Timestamp of the most recent receive, shared between tasks.
///
/// Stored as microseconds since the clock was created so that it fits in an
/// atomic without rounding a sub-millisecond gap across the threshold. Uses tokio's clock, which tests can pause and advance.
#[derive(Debug)]
pub struct LivenessClock {
    origin: Instant,
    last_received_us: AtomicU64,
}

impl LivenessClock {
    /// A clock that reads as freshly received right now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_received_us: AtomicU64::new(0),
        }
    }

    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    /// Mark the link as alive as of now.
    pub fn touch(&self) {
        self.last_received_us.store(self.now_us(), Ordering::Release);
    }

    /// Time since the last [`touch`](Self::touch) (or creation).
    pub fn since_last_receive(&self) -> Duration {
        let last = self.last_received_us.load(Ordering::Acquire);
        Duration::from_micros(self.now_us().saturating_sub(last))
    }

    /// Connected when less than `threshold` has passed since the last receive.
    pub fn status(&self, threshold: Duration) -> LinkStatus {
        if self.since_last_receive() < threshold {
            LinkStatus::Connected
        } else {
            LinkStatus::Disconnected
        }
    }
}

impl Default for LivenessClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic liveness check running as its own task.
///
/// The first check fires immediately, then once per interval. Every check
/// notifies the listener (if any), not just changes. Dropping the tracker
/// cancels the task; [`stop`](Self::stop) also waits for it so that no
/// notification can follow.
pub struct LivenessTracker {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LivenessTracker {
    pub fn start(
        clock: Arc<LivenessClock>,
        interval: Duration,
        threshold: Duration,
        listener: Slot<dyn ConnectionListener>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(clock, interval, threshold, listener, cancel.clone()));
        Self {
            cancel,
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancel the task and wait for it to exit.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(error = %e, "Liveness tracker panicked.");
                }
            }
        }
    }
}

impl Drop for LivenessTracker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    clock: Arc<LivenessClock>,
    interval: Duration,
    threshold: Duration,
    listener: Slot<dyn ConnectionListener>,
    cancel: CancellationToken,
) {
    trace!("Liveness tracker started.");
    // interval() panics on zero.
    let mut ticker = time::interval(interval.max(Duration::from_millis(1)));
    let mut previous = None;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let status = clock.status(threshold);
        if previous != Some(status) {
            info!(
                status = ?status,
                silent_ms = clock.since_last_receive().as_millis() as u64,
                "Link status changed."
            );
            previous = Some(status);
        }

        if let Some(listener) = listener.load() {
            match status {
                LinkStatus::Connected => listener.connected(),
                LinkStatus::Disconnected => listener.disconnected(),
            }
        }
    }

    trace!("Liveness tracker stopped.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::LinkEvent;
    use test_case::test_case;
    use tokio::sync::mpsc;

    const THRESHOLD: Duration = Duration::from_millis(2000);
    const INTERVAL: Duration = Duration::from_secs(5);

    fn channel_slot() -> (
        Slot<dyn ConnectionListener>,
        mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let slot: Slot<dyn ConnectionListener> = Slot::empty();
        slot.replace(Some(Arc::new(tx)));
        (slot, rx)
    }

    #[test_case(0, LinkStatus::Connected ; "just received")]
    #[test_case(1999, LinkStatus::Connected ; "inside window")]
    #[test_case(2000, LinkStatus::Disconnected ; "at threshold")]
    #[test_case(7000, LinkStatus::Disconnected ; "long silence")]
    #[tokio::test(start_paused = true)]
    async fn test_status_against_threshold(silent_ms: u64, expected: LinkStatus) {
        let clock = LivenessClock::new();
        time::advance(Duration::from_millis(silent_ms)).await;
        assert_eq!(clock.status(THRESHOLD), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_refreshes() {
        let clock = LivenessClock::new();
        time::advance(Duration::from_secs(10)).await;
        assert_eq!(clock.status(THRESHOLD), LinkStatus::Disconnected);

        clock.touch();
        assert_eq!(clock.since_last_receive(), Duration::ZERO);
        assert_eq!(clock.status(THRESHOLD), LinkStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_check_is_immediate_then_periodic() {
        let clock = Arc::new(LivenessClock::new());
        let (slot, mut rx) = channel_slot();
        let start = Instant::now();
        let mut tracker = LivenessTracker::start(Arc::clone(&clock), INTERVAL, THRESHOLD, slot);

        assert_eq!(rx.recv().await, Some(LinkEvent::Connected));
        assert_eq!(start.elapsed(), Duration::ZERO);

        // Nothing arrives, so the next check reports the link down.
        assert_eq!(rx.recv().await, Some(LinkEvent::Disconnected));
        assert_eq!(start.elapsed(), INTERVAL);

        tracker.stop().await;
        assert!(!tracker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_listener_is_silent() {
        let clock = Arc::new(LivenessClock::new());
        let slot: Slot<dyn ConnectionListener> = Slot::empty();
        let mut tracker = LivenessTracker::start(clock, INTERVAL, THRESHOLD, slot.clone());

        time::sleep(INTERVAL * 2).await;
        assert!(tracker.is_running());

        // A listener installed later picks up the next check.
        let (tx, mut rx) = mpsc::unbounded_channel();
        slot.replace(Some(Arc::new(tx)));
        assert_eq!(rx.recv().await, Some(LinkEvent::Disconnected));

        tracker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_swap_between_checks() {
        let clock = Arc::new(LivenessClock::new());
        let (slot, mut old_rx) = channel_slot();
        let mut tracker = LivenessTracker::start(clock, INTERVAL, THRESHOLD, slot.clone());
        assert_eq!(old_rx.recv().await, Some(LinkEvent::Connected));

        let (tx, mut new_rx) = mpsc::unbounded_channel();
        slot.replace(Some(Arc::new(tx)));

        assert_eq!(new_rx.recv().await, Some(LinkEvent::Disconnected));
        assert!(old_rx.try_recv().is_err());

        tracker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_millisecond_gap_stays_inside_window() {
        let clock = LivenessClock::new();
        time::advance(Duration::from_micros(900)).await;
        clock.touch();

        time::advance(Duration::from_micros(1_999_600)).await;
        assert_eq!(clock.since_last_receive(), Duration::from_micros(1_999_600));
        assert_eq!(clock.status(THRESHOLD), LinkStatus::Connected);

        time::advance(Duration::from_micros(400)).await;
        assert_eq!(clock.status(THRESHOLD), LinkStatus::Disconnected);
    }

    /// Hands itself over to `next` from inside its first notification.
    struct HandOffListener {
        slot: Slot<dyn ConnectionListener>,
        next: Arc<dyn ConnectionListener>,
        events: mpsc::UnboundedSender<LinkEvent>,
    }

    impl ConnectionListener for HandOffListener {
        fn connected(&self) {
            let _ = self.events.send(LinkEvent::Connected);
            self.slot.replace(Some(Arc::clone(&self.next)));
        }

        fn disconnected(&self) {
            let _ = self.events.send(LinkEvent::Disconnected);
            self.slot.replace(Some(Arc::clone(&self.next)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_swap_during_check() {
        let clock = Arc::new(LivenessClock::new());
        let slot: Slot<dyn ConnectionListener> = Slot::empty();
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        slot.replace(Some(Arc::new(HandOffListener {
            slot: slot.clone(),
            next: Arc::new(new_tx),
            events: old_tx,
        })));

        let mut tracker = LivenessTracker::start(clock, INTERVAL, THRESHOLD, slot.clone());
        assert_eq!(old_rx.recv().await, Some(LinkEvent::Connected));

        // The replacement installed mid-check receives the next one.
        assert_eq!(new_rx.recv().await, Some(LinkEvent::Disconnected));
        assert!(old_rx.try_recv().is_err());

        tracker.stop().await;
        // Break the slot -> listener -> slot cycle.
        slot.replace(None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_fires_after_stop() {
        let clock = Arc::new(LivenessClock::new());
        let (slot, mut rx) = channel_slot();
        let mut tracker = LivenessTracker::start(clock, INTERVAL, THRESHOLD, slot);
        assert_eq!(rx.recv().await, Some(LinkEvent::Connected));

        tracker.stop().await;
        time::sleep(INTERVAL * 4).await;
        assert!(rx.try_recv().is_err());

        // Stopping twice is harmless.
        tracker.stop().await;
    }
}
