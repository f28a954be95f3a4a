use std::sync::Arc;
use std::time::Duration;

use murmur_codec::{decode, encode, events, OutboundEvent, WireFrame};
use murmur_core::{BusEvent, ConnectionState, CoreConfig, EventBus, EventId, SessionId, VoiceError};
use murmur_transport::{Connector, NetworkMonitor, Transport, TransportConfig};
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};

use crate::registry::{EventHandler, HandlerContext, HandlerRegistry};
use crate::tracker::{AckReceipt, RequestTracker};

/// Composes the transport, codec, handler registry, and request tracker
/// into one session with a server-assigned id.
///
/// Inbound frames run through a fixed pipeline: reject frames without an
/// event type, latch the session id off `connection.ack`, settle matching
/// acknowledgments, then route everything else through the registry with
/// the raw bytes and the already-decoded frame.
pub struct SessionManager {
    config: CoreConfig,
    transport: Transport,
    registry: Arc<HandlerRegistry>,
    tracker: Arc<RequestTracker>,
    bus: Arc<EventBus>,
    session_id: RwLock<Option<SessionId>>,
}

impl SessionManager {
    pub fn new(
        config: CoreConfig,
        connector: Arc<dyn Connector>,
        monitor: Arc<NetworkMonitor>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let transport = Transport::new(
            TransportConfig::from_core(&config),
            connector,
            monitor,
        );
        // A freshly built transport always still holds its receiver.
        let data_rx = transport
            .take_data_rx()
            .expect("fresh transport owns its data receiver");

        let tracker = Arc::new(RequestTracker::new(config.max_pending_requests));
        tracker.start_sweep(config.tracker_sweep_interval);

        let manager = Arc::new(Self {
            config,
            transport,
            registry: Arc::new(HandlerRegistry::new()),
            tracker,
            bus,
            session_id: RwLock::new(None),
        });
        Self::spawn_rx_loop(&manager, data_rx);
        Self::spawn_state_loop(&manager);
        manager
    }

    /// Open the transport. The session id arrives later with the
    /// server's `connection.ack`.
    pub async fn connect(&self, url: &str) -> Result<(), VoiceError> {
        self.transport.connect(url).await
    }

    /// Tear down: close the transport, reject all pending requests, and
    /// drop the session id.
    pub async fn disconnect(&self, clear: bool) {
        self.transport.disconnect(clear).await;
        self.tracker.clear();
        *self.session_id.write() = None;
    }

    /// Fire-and-forget send. Mints a fresh time-ordered event id and
    /// returns it.
    pub async fn send(&self, event: OutboundEvent) -> Result<EventId, VoiceError> {
        let event_id = EventId::new();
        let bytes = self.encode_frame(&event, &event_id)?;
        self.transport.send(bytes).await?;
        Ok(event_id)
    }

    /// Send and await the matching acknowledgment, or a timeout.
    pub async fn send_with_ack(
        &self,
        event: OutboundEvent,
        timeout: Duration,
    ) -> Result<AckReceipt, VoiceError> {
        let event_id = EventId::new();
        // Register before encoding so a fast ack cannot race the entry.
        let rx = self
            .tracker
            .track(event_id.clone(), &event.event_type, timeout);

        let bytes = match self.encode_frame(&event, &event_id) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.tracker.cancel(event_id.as_str());
                return Err(e);
            }
        };
        if let Err(e) = self.transport.send(bytes).await {
            self.tracker.cancel(event_id.as_str());
            return Err(e);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(VoiceError::TrackerCleared),
        }
    }

    /// [`send_with_ack`](Self::send_with_ack) with the configured
    /// default request timeout.
    pub async fn request(&self, event: OutboundEvent) -> Result<AckReceipt, VoiceError> {
        self.send_with_ack(event, self.config.request_timeout).await
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id.read().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.transport.watch_state()
    }

    pub fn pending_requests(&self) -> usize {
        self.tracker.len()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Install a handler, replacing any existing one for the event type.
    pub fn register(&self, event_type: impl Into<String>, handler: EventHandler) {
        self.registry.register(event_type, handler);
    }

    pub fn register_error(&self, base_event_type: impl Into<String>, handler: EventHandler) {
        self.registry.register_error(base_event_type, handler);
    }

    pub fn unregister(&self, event_type: &str) {
        self.registry.unregister(event_type);
    }

    fn encode_frame(
        &self,
        event: &OutboundEvent,
        event_id: &EventId,
    ) -> Result<Vec<u8>, VoiceError> {
        let session_id = self.session_id.read().clone();
        let frame = WireFrame {
            event_type: &event.event_type,
            event_id: event_id.as_str(),
            session_id: session_id.as_ref().map(|s| s.as_str()),
            payload: event.payload.as_wire(),
        };
        encode(&frame)
    }

    fn spawn_rx_loop(this: &Arc<Self>, mut data_rx: mpsc::Receiver<Vec<u8>>) {
        let weak = Arc::downgrade(this);
        tokio::spawn(async move {
            while let Some(raw) = data_rx.recv().await {
                let Some(manager) = weak.upgrade() else { break };
                manager.process_incoming(&raw);
            }
        });
    }

    fn spawn_state_loop(this: &Arc<Self>) {
        let mut state_rx = this.transport.watch_state();
        let weak = Arc::downgrade(this);
        tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                let state = *state_rx.borrow();
                let Some(manager) = weak.upgrade() else { break };
                if matches!(state, ConnectionState::Disconnected | ConnectionState::Error) {
                    if manager.session_id.write().take().is_some() {
                        tracing::debug!("Session dropped with connection");
                    }
                }
                manager.bus.emit(BusEvent::ConnectionState(state));
            }
        });
    }

    fn process_incoming(&self, raw: &[u8]) {
        let frame = match decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, len = raw.len(), "Dropping undecodable frame");
                return;
            }
        };
        if frame.event_type.is_empty() {
            tracing::warn!("Dropping frame without event type");
            return;
        }

        if frame.event_type == events::CONNECTION_ACK {
            if let Some(sid) = frame.payload.session_id {
                let session_id = SessionId::from_raw(sid);
                *self.session_id.write() = Some(session_id.clone());
                tracing::info!(session_id = %session_id, "Session established");
                self.bus.emit(BusEvent::ConnectionAck { session_id });
            }
        }

        if frame.is_ack() {
            if self.tracker.match_ack(frame.event_id) {
                return;
            }
            // A successful ack with no pending entry is treated as an
            // unsolicited notification and routed normally.
            tracing::debug!(
                event_id = frame.event_id,
                event_type = frame.event_type,
                "Unmatched ack, falling through to handlers"
            );
        }

        self.registry.route(&HandlerContext { raw, frame: &frame });
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.tracker.destroy();
    }
}
