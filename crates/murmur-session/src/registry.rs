use std::collections::HashMap;
use std::sync::Arc;

use murmur_codec::{events, WireFrame};
use murmur_core::VoiceError;
use parking_lot::RwLock;

/// What a handler sees for one inbound message: the raw frame bytes and
/// the already-decoded structure, so handlers never decode twice.
///
/// Byte-slice fields of `frame` alias `raw`; a handler that keeps audio
/// past its own return must copy it.
pub struct HandlerContext<'a> {
    pub raw: &'a [u8],
    pub frame: &'a WireFrame<'a>,
}

pub type EventHandler =
    Arc<dyn for<'a> Fn(&HandlerContext<'a>) -> Result<(), VoiceError> + Send + Sync>;

/// Routes decoded messages to handlers by event type.
///
/// Two maps: a primary map keyed by full event type and an error map
/// keyed by base event type. For `"X.error"` the lookup order is primary
/// `"X.error"`, error-map `"X"`, then the primary `"error"` wildcard.
/// Registering over an existing event type replaces the handler.
#[derive(Default)]
pub struct HandlerRegistry {
    primary: RwLock<HashMap<String, EventHandler>>,
    error: RwLock<HashMap<String, EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, event_type: impl Into<String>, handler: EventHandler) {
        let event_type = event_type.into();
        if self.primary.write().insert(event_type.clone(), handler).is_some() {
            tracing::debug!(event_type, "Handler replaced");
        }
    }

    pub fn register_error(&self, base_event_type: impl Into<String>, handler: EventHandler) {
        self.error.write().insert(base_event_type.into(), handler);
    }

    pub fn unregister(&self, event_type: &str) {
        self.primary.write().remove(event_type);
    }

    pub fn unregister_error(&self, base_event_type: &str) {
        self.error.write().remove(base_event_type);
    }

    pub fn registered(&self, event_type: &str) -> bool {
        self.primary.read().contains_key(event_type)
    }

    /// Route one message. Returns whether it was handled. A handler
    /// error is caught and logged, and the message still counts as
    /// handled so nothing routes it a second time. Unhandled messages
    /// are warned about, not fatal.
    pub fn route(&self, ctx: &HandlerContext<'_>) -> bool {
        let event_type = ctx.frame.event_type;
        let Some(handler) = self.resolve(event_type) else {
            tracing::warn!(event_type, "No handler for event");
            return false;
        };
        if let Err(e) = handler(ctx) {
            tracing::error!(event_type, error = %e, "Handler failed");
        }
        true
    }

    fn resolve(&self, event_type: &str) -> Option<EventHandler> {
        let primary = self.primary.read();
        if let Some(handler) = primary.get(event_type) {
            return Some(Arc::clone(handler));
        }
        if events::is_error_event(event_type) {
            if let Some(base) = events::error_base(event_type) {
                if let Some(handler) = self.error.read().get(base) {
                    return Some(Arc::clone(handler));
                }
            }
            if let Some(handler) = primary.get(events::ERROR_WILDCARD) {
                return Some(Arc::clone(handler));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_codec::Payload;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn frame(event_type: &'static str) -> WireFrame<'static> {
        WireFrame {
            event_type,
            event_id: "evt_test",
            session_id: None,
            payload: Payload::default(),
        }
    }

    fn counting_handler(count: Arc<AtomicUsize>) -> EventHandler {
        Arc::new(move |_ctx| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn routes_to_primary_handler() {
        let registry = HandlerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        registry.register("voicechat.response.chunk", counting_handler(count.clone()));

        let f = frame("voicechat.response.chunk");
        let handled = registry.route(&HandlerContext { raw: &[], frame: &f });
        assert!(handled);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unhandled_returns_false() {
        let registry = HandlerRegistry::new();
        let f = frame("voicechat.response.chunk");
        assert!(!registry.route(&HandlerContext { raw: &[], frame: &f }));
    }

    #[test]
    fn error_event_prefers_exact_primary() {
        let registry = HandlerRegistry::new();
        let exact = Arc::new(AtomicUsize::new(0));
        let by_base = Arc::new(AtomicUsize::new(0));
        registry.register("voicechat.audio.start.error", counting_handler(exact.clone()));
        registry.register_error("voicechat.audio.start", counting_handler(by_base.clone()));

        let f = frame("voicechat.audio.start.error");
        assert!(registry.route(&HandlerContext { raw: &[], frame: &f }));
        assert_eq!(exact.load(Ordering::SeqCst), 1);
        assert_eq!(by_base.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn error_event_falls_back_to_error_map() {
        let registry = HandlerRegistry::new();
        let by_base = Arc::new(AtomicUsize::new(0));
        registry.register_error("voicechat.audio.start", counting_handler(by_base.clone()));

        let f = frame("voicechat.audio.start.error");
        assert!(registry.route(&HandlerContext { raw: &[], frame: &f }));
        assert_eq!(by_base.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn error_event_falls_back_to_wildcard() {
        let registry = HandlerRegistry::new();
        let wildcard = Arc::new(AtomicUsize::new(0));
        registry.register("error", counting_handler(wildcard.clone()));

        let f = frame("voicechat.audio.end.error");
        assert!(registry.route(&HandlerContext { raw: &[], frame: &f }));
        assert_eq!(wildcard.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn non_error_event_never_hits_error_map_or_wildcard() {
        let registry = HandlerRegistry::new();
        let by_base = Arc::new(AtomicUsize::new(0));
        let wildcard = Arc::new(AtomicUsize::new(0));
        registry.register_error("voicechat.response.chunk", counting_handler(by_base.clone()));
        registry.register("error", counting_handler(wildcard.clone()));

        let f = frame("voicechat.response.chunk");
        assert!(!registry.route(&HandlerContext { raw: &[], frame: &f }));
        assert_eq!(by_base.load(Ordering::SeqCst), 0);
        assert_eq!(wildcard.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn registration_replaces_previous_handler() {
        let registry = HandlerRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        registry.register("voicechat.response.chunk", counting_handler(first.clone()));
        registry.register("voicechat.response.chunk", counting_handler(second.clone()));

        let f = frame("voicechat.response.chunk");
        registry.route(&HandlerContext { raw: &[], frame: &f });
        assert_eq!(first.load(Ordering::SeqCst), 0, "replaced handler must not run");
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_handler_still_counts_as_handled() {
        let registry = HandlerRegistry::new();
        registry.register(
            "voicechat.response.chunk",
            Arc::new(|_ctx: &HandlerContext<'_>| {
                Err(VoiceError::InvalidAudioPayload("empty".into()))
            }),
        );

        let f = frame("voicechat.response.chunk");
        assert!(registry.route(&HandlerContext { raw: &[], frame: &f }));
    }

    #[test]
    fn unregister_removes_handler() {
        let registry = HandlerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        registry.register("voicechat.response.stop", counting_handler(count.clone()));
        assert!(registry.registered("voicechat.response.stop"));

        registry.unregister("voicechat.response.stop");
        assert!(!registry.registered("voicechat.response.stop"));

        let f = frame("voicechat.response.stop");
        assert!(!registry.route(&HandlerContext { raw: &[], frame: &f }));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_sees_raw_and_decoded() {
        let registry = HandlerRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        registry.register(
            "voicechat.response.chunk",
            Arc::new(move |ctx: &HandlerContext<'_>| {
                assert_eq!(ctx.raw, &[1u8, 2, 3][..]);
                assert_eq!(ctx.frame.event_type, "voicechat.response.chunk");
                seen_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let f = frame("voicechat.response.chunk");
        registry.route(&HandlerContext {
            raw: &[1, 2, 3],
            frame: &f,
        });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
