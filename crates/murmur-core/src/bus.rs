use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::ids::{SessionId, UtteranceId};
use crate::state::ConnectionState;
use crate::VoiceError;

/// Events published across component boundaries.
#[derive(Clone, Debug)]
pub enum BusEvent {
    ConnectionState(ConnectionState),
    ConnectionAck { session_id: SessionId },
    ResponseStart { utterance_id: Option<UtteranceId> },
    ResponseChunk {
        utterance_id: Option<UtteranceId>,
        byte_len: usize,
        sample_rate: u32,
    },
    ResponseComplete { utterance_id: Option<UtteranceId> },
    ResponseInterrupt,
    ResponseStop,
    Error { code: Option<String>, message: String },
}

/// The typed channel an event is delivered on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    ConnectionState,
    ConnectionAck,
    ResponseStart,
    ResponseChunk,
    ResponseComplete,
    ResponseInterrupt,
    ResponseStop,
    Error,
}

impl BusEvent {
    pub fn channel(&self) -> Channel {
        match self {
            Self::ConnectionState(_) => Channel::ConnectionState,
            Self::ConnectionAck { .. } => Channel::ConnectionAck,
            Self::ResponseStart { .. } => Channel::ResponseStart,
            Self::ResponseChunk { .. } => Channel::ResponseChunk,
            Self::ResponseComplete { .. } => Channel::ResponseComplete,
            Self::ResponseInterrupt => Channel::ResponseInterrupt,
            Self::ResponseStop => Channel::ResponseStop,
            Self::Error { .. } => Channel::Error,
        }
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn Fn(&BusEvent) -> Result<(), VoiceError> + Send + Sync>;

/// Broadcast bus for internal events. Delivery is synchronous, in
/// subscribe order per channel; a failing subscriber is logged and the
/// fan-out continues.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<Channel, Vec<(SubscriptionId, Subscriber)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide instance. Components that are not handed an
    /// explicit bus publish here.
    pub fn global() -> std::sync::Arc<EventBus> {
        static GLOBAL: OnceLock<std::sync::Arc<EventBus>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| std::sync::Arc::new(EventBus::new()))
            .clone()
    }

    pub fn subscribe<F>(&self, channel: Channel, f: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) -> Result<(), VoiceError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .entry(channel)
            .or_default()
            .push((id, Box::new(f)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscribers.write();
        for list in subs.values_mut() {
            list.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// Deliver an event to every subscriber of its channel, in subscribe
    /// order.
    pub fn emit(&self, event: BusEvent) {
        let subs = self.subscribers.read();
        let Some(list) = subs.get(&event.channel()) else {
            return;
        };
        for (id, subscriber) in list {
            if let Err(e) = subscriber(&event) {
                tracing::warn!(
                    subscription = id.0,
                    channel = ?event.channel(),
                    error = %e,
                    "Bus subscriber failed"
                );
            }
        }
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.subscribers
            .read()
            .get(&channel)
            .map(|l| l.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn emit_reaches_all_subscribers_in_order() {
        let bus = EventBus::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            bus.subscribe(Channel::ResponseStop, move |_| {
                order.lock().push(tag);
                Ok(())
            });
        }

        bus.emit(BusEvent::ResponseStop);
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn failing_subscriber_does_not_stop_others() {
        let bus = EventBus::new();
        let reached = Arc::new(AtomicUsize::new(0));

        bus.subscribe(Channel::Error, |_| {
            Err(VoiceError::HandlerException {
                event_type: "error".into(),
                message: "subscriber broke".into(),
            })
        });
        let reached_clone = Arc::clone(&reached);
        bus.subscribe(Channel::Error, move |_| {
            reached_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(BusEvent::Error {
            code: None,
            message: "boom".into(),
        });
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn events_only_reach_their_channel() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = Arc::clone(&count);
        bus.subscribe(Channel::ResponseStart, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(BusEvent::ResponseStop);
        bus.emit(BusEvent::ResponseStart { utterance_id: None });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_subscriber() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = Arc::clone(&count);
        let id = bus.subscribe(Channel::ConnectionState, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(BusEvent::ConnectionState(ConnectionState::Connected));
        bus.unsubscribe(id);
        bus.emit(BusEvent::ConnectionState(ConnectionState::Disconnected));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(Channel::ConnectionState), 0);
    }

    #[test]
    fn connection_ack_carries_session() {
        let bus = EventBus::new();
        let seen = Arc::new(parking_lot::Mutex::new(None));

        let seen_clone = Arc::clone(&seen);
        bus.subscribe(Channel::ConnectionAck, move |event| {
            if let BusEvent::ConnectionAck { session_id } = event {
                *seen_clone.lock() = Some(session_id.clone());
            }
            Ok(())
        });

        let sid = SessionId::from_raw("S1");
        bus.emit(BusEvent::ConnectionAck {
            session_id: sid.clone(),
        });
        assert_eq!(seen.lock().as_ref(), Some(&sid));
    }

    #[test]
    fn global_instance_is_shared() {
        let a = EventBus::global();
        let b = EventBus::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
