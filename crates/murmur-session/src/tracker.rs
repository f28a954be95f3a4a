use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use murmur_core::{metrics, EventId, VoiceError};
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Settlement value of a matched acknowledgment.
#[derive(Clone, Debug, PartialEq)]
pub struct AckReceipt {
    pub event_id: EventId,
    pub event_type: String,
}

pub type AckResult = Result<AckReceipt, VoiceError>;

struct Pending {
    event_type: String,
    submitted_at: tokio::time::Instant,
    timeout: Duration,
    /// Primary sink plus any duplicate-track sinks; all settle together.
    sinks: Vec<oneshot::Sender<AckResult>>,
    timer: tokio::task::AbortHandle,
}

impl Pending {
    /// Terminal settlement: clears the timer first so a racing expiry
    /// cannot settle a second time.
    fn settle(self, result: AckResult) {
        self.timer.abort();
        for sink in self.sinks {
            let _ = sink.send(result.clone());
        }
    }
}

struct Inner {
    /// Keyed by time-ordered id, so the first entry is always the oldest.
    pending: BTreeMap<EventId, Pending>,
    capacity: usize,
}

/// Tracks outstanding request ids awaiting acknowledgment. Bounded; each
/// entry carries its own timeout, with a periodic sweep as a backstop
/// against lost timer firings. Every entry settles exactly once.
pub struct RequestTracker {
    inner: Arc<Mutex<Inner>>,
    sweep: Mutex<Option<tokio::task::AbortHandle>>,
}

impl RequestTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                pending: BTreeMap::new(),
                capacity: capacity.max(1),
            })),
            sweep: Mutex::new(None),
        }
    }

    /// Register a request and receive its settlement. Tracking an
    /// already-tracked id does not drop the original entry; the new
    /// future settles alongside it.
    pub fn track(
        &self,
        event_id: EventId,
        event_type: &str,
        timeout: Duration,
    ) -> oneshot::Receiver<AckResult> {
        let (tx, rx) = oneshot::channel();
        let evicted = {
            let mut inner = self.inner.lock();
            if let Some(existing) = inner.pending.get_mut(&event_id) {
                existing.sinks.push(tx);
                return rx;
            }

            let evicted = if inner.pending.len() >= inner.capacity {
                inner.pending.pop_first()
            } else {
                None
            };

            let timer = {
                let inner = Arc::clone(&self.inner);
                let event_id = event_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    expire(&inner, &event_id);
                })
                .abort_handle()
            };
            inner.pending.insert(
                event_id,
                Pending {
                    event_type: event_type.to_string(),
                    submitted_at: tokio::time::Instant::now(),
                    timeout,
                    sinks: vec![tx],
                    timer,
                },
            );
            evicted
        };

        if let Some((evicted_id, pending)) = evicted {
            tracing::warn!(event_id = %evicted_id, "Pending request evicted at capacity");
            metrics::count("tracker_evictions");
            pending.settle(Err(VoiceError::TrackerLimit));
        }
        rx
    }

    /// Settle the entry matching `event_id`, if any. Returns whether a
    /// pending request was matched.
    pub fn match_ack(&self, event_id: &str) -> bool {
        let key = EventId::from_raw(event_id);
        let Some(pending) = self.inner.lock().pending.remove(&key) else {
            return false;
        };
        metrics::count("tracker_acks_matched");
        metrics::observe_ms(
            "ack_latency_ms",
            pending.submitted_at.elapsed().as_secs_f64() * 1000.0,
        );
        let receipt = AckReceipt {
            event_id: key,
            event_type: pending.event_type.clone(),
        };
        pending.settle(Ok(receipt));
        true
    }

    /// Reject a single entry. Returns whether it existed.
    pub fn cancel(&self, event_id: &str) -> bool {
        let key = EventId::from_raw(event_id);
        let Some(pending) = self.inner.lock().pending.remove(&key) else {
            return false;
        };
        pending.settle(Err(VoiceError::RequestCancelled));
        true
    }

    /// Reject every pending entry, e.g. on disconnect.
    pub fn clear(&self) {
        let drained: Vec<Pending> = {
            let mut inner = self.inner.lock();
            let map = std::mem::take(&mut inner.pending);
            map.into_values().collect()
        };
        for pending in drained {
            pending.settle(Err(VoiceError::TrackerCleared));
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start the periodic sweep rejecting entries older than twice their
    /// timeout. Idempotent.
    pub fn start_sweep(&self, interval: Duration) {
        let mut sweep = self.sweep.lock();
        if sweep.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await;
            loop {
                tick.tick().await;
                sweep_stale(&inner);
            }
        });
        *sweep = Some(handle.abort_handle());
    }

    /// Clear all entries and stop the sweep tick.
    pub fn destroy(&self) {
        self.clear();
        if let Some(handle) = self.sweep.lock().take() {
            handle.abort();
        }
    }

    #[cfg(test)]
    fn kill_timer(&self, event_id: &str) {
        let key = EventId::from_raw(event_id);
        if let Some(pending) = self.inner.lock().pending.get(&key) {
            pending.timer.abort();
        }
    }
}

impl Drop for RequestTracker {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn expire(inner: &Mutex<Inner>, event_id: &EventId) {
    let Some(pending) = inner.lock().pending.remove(event_id) else {
        return;
    };
    let timeout = pending.timeout;
    tracing::debug!(event_id = %event_id, timeout_ms = timeout.as_millis() as u64, "Request timed out");
    metrics::count("tracker_timeouts");
    pending.settle(Err(VoiceError::RequestTimeout(timeout)));
}

fn sweep_stale(inner: &Mutex<Inner>) {
    let stale: Vec<(EventId, Pending)> = {
        let mut guard = inner.lock();
        let now = tokio::time::Instant::now();
        let ids: Vec<EventId> = guard
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.submitted_at) > p.timeout * 2)
            .map(|(id, _)| id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| guard.pending.remove(&id).map(|p| (id, p)))
            .collect()
    };
    for (id, pending) in stale {
        tracing::warn!(event_id = %id, "Sweep rejected stale pending request");
        let timeout = pending.timeout;
        pending.settle(Err(VoiceError::RequestTimeout(timeout)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn matched_ack_settles_ok() {
        let tracker = RequestTracker::new(100);
        let id = EventId::new();
        let rx = tracker.track(id.clone(), "voicechat.audio.start", Duration::from_secs(30));

        assert!(tracker.match_ack(id.as_str()));
        let receipt = rx.await.unwrap().unwrap();
        assert_eq!(receipt.event_id, id);
        assert_eq!(receipt.event_type, "voicechat.audio.start");
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_ack_does_not_match() {
        let tracker = RequestTracker::new(100);
        assert!(!tracker.match_ack("evt_nobody"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_rejects_entry() {
        let tracker = RequestTracker::new(100);
        let id = EventId::new();
        let rx = tracker.track(id, "voicechat.audio.start", Duration::from_millis(100));

        let start = tokio::time::Instant::now();
        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err, VoiceError::RequestTimeout(Duration::from_millis(100)));
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(100) && elapsed < Duration::from_millis(200),
            "settled at {elapsed:?}"
        );
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn settlement_is_terminal() {
        let tracker = RequestTracker::new(100);
        let id = EventId::new();
        let rx = tracker.track(id.clone(), "voicechat.audio.end", Duration::from_millis(100));

        assert!(tracker.match_ack(id.as_str()));
        // The timer fires later into an already-settled entry: no effect.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_track_settles_both() {
        let tracker = RequestTracker::new(100);
        let id = EventId::new();
        let rx1 = tracker.track(id.clone(), "voicechat.audio.start", Duration::from_secs(30));
        let rx2 = tracker.track(id.clone(), "voicechat.audio.start", Duration::from_secs(30));
        assert_eq!(tracker.len(), 1, "duplicate must not add an entry");

        tracker.match_ack(id.as_str());
        assert!(rx1.await.unwrap().is_ok());
        assert!(rx2.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_evicts_oldest() {
        let tracker = RequestTracker::new(2);
        let first = EventId::new();
        let rx_first = tracker.track(first.clone(), "a", Duration::from_secs(30));
        let _rx2 = tracker.track(EventId::new(), "b", Duration::from_secs(30));
        let _rx3 = tracker.track(EventId::new(), "c", Duration::from_secs(30));

        assert_eq!(tracker.len(), 2, "size must never exceed capacity");
        let err = rx_first.await.unwrap().unwrap_err();
        assert_eq!(err, VoiceError::TrackerLimit);
        assert!(!tracker.match_ack(first.as_str()), "evicted entry is gone");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_rejects_single_entry() {
        let tracker = RequestTracker::new(100);
        let id = EventId::new();
        let rx = tracker.track(id.clone(), "voicechat.audio.start", Duration::from_secs(30));
        let keep = EventId::new();
        let _rx_keep = tracker.track(keep.clone(), "voicechat.audio.end", Duration::from_secs(30));

        assert!(tracker.cancel(id.as_str()));
        assert_eq!(rx.await.unwrap().unwrap_err(), VoiceError::RequestCancelled);
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_rejects_all() {
        let tracker = RequestTracker::new(100);
        let rx1 = tracker.track(EventId::new(), "a", Duration::from_secs(30));
        let rx2 = tracker.track(EventId::new(), "b", Duration::from_secs(30));

        tracker.clear();
        assert_eq!(rx1.await.unwrap().unwrap_err(), VoiceError::TrackerCleared);
        assert_eq!(rx2.await.unwrap().unwrap_err(), VoiceError::TrackerCleared);
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_rescues_lost_timer() {
        let tracker = RequestTracker::new(100);
        tracker.start_sweep(Duration::from_secs(60));

        let id = EventId::new();
        let rx = tracker.track(id.clone(), "voicechat.audio.start", Duration::from_secs(10));
        // Simulate a lost timer firing.
        tracker.kill_timer(id.as_str());

        // Older than 2x timeout by the time the sweep ticks.
        tokio::time::sleep(Duration::from_secs(61)).await;
        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err, VoiceError::RequestTimeout(Duration::from_secs(10)));
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_leaves_fresh_entries_alone() {
        let tracker = RequestTracker::new(100);
        tracker.start_sweep(Duration::from_secs(60));

        let id = EventId::new();
        let _rx = tracker.track(id.clone(), "voicechat.audio.start", Duration::from_secs(120));
        tracker.kill_timer(id.as_str());

        // One sweep tick at 60s: entry is only 60s old with a 120s
        // timeout, far short of the 240s sweep threshold.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(tracker.len(), 1);
    }
}
