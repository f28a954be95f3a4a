//! Event-type names recognized on the wire.

/// Application namespace prefixing client-initiated and response events.
pub const NAMESPACE: &str = "voicechat";

/// First server frame after transport open; carries the session id.
pub const CONNECTION_ACK: &str = "connection.ack";

pub const AUDIO_START: &str = "voicechat.audio.start";
pub const AUDIO_CHUNK: &str = "voicechat.audio.chunk";
pub const AUDIO_END: &str = "voicechat.audio.end";

pub const RESPONSE_START: &str = "voicechat.response.start";
pub const RESPONSE_CHUNK: &str = "voicechat.response.chunk";
pub const RESPONSE_COMPLETE: &str = "voicechat.response.complete";
pub const RESPONSE_INTERRUPT: &str = "voicechat.response.interrupt";
pub const RESPONSE_STOP: &str = "voicechat.response.stop";

/// Suffix marking error events, e.g. `voicechat.audio.start.error`.
pub const ERROR_SUFFIX: &str = ".error";

/// Wildcard primary-registry key catching any otherwise-unhandled error
/// event.
pub const ERROR_WILDCARD: &str = "error";

pub fn is_error_event(event_type: &str) -> bool {
    event_type.ends_with(ERROR_SUFFIX)
}

/// Base event type of an error event (`"x.y.error"` → `"x.y"`).
pub fn error_base(event_type: &str) -> Option<&str> {
    event_type.strip_suffix(ERROR_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_suffix_detection() {
        assert!(is_error_event("voicechat.audio.start.error"));
        assert!(!is_error_event("voicechat.audio.start"));
        assert!(!is_error_event("error-ish"));
    }

    #[test]
    fn error_base_strips_suffix() {
        assert_eq!(
            error_base("voicechat.audio.start.error"),
            Some("voicechat.audio.start")
        );
        assert_eq!(error_base("voicechat.audio.start"), None);
    }

    #[test]
    fn outbound_names_are_namespaced() {
        for name in [AUDIO_START, AUDIO_CHUNK, AUDIO_END] {
            assert!(name.starts_with(NAMESPACE));
        }
    }
}
