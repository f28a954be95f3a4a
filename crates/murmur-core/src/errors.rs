use std::time::Duration;

/// Typed error hierarchy for the voice-chat client core.
/// Kinds match the wire-level error vocabulary surfaced to callers and
/// the event bus.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum VoiceError {
    // Transport
    #[error("network unavailable")]
    NetworkUnavailable,
    #[error("not connected")]
    NotConnected,
    #[error("connection timed out after {0:?}")]
    ConnectionTimeout(Duration),
    #[error("reconnect attempts exhausted after {attempts}")]
    ReconnectExhausted { attempts: u32 },
    #[error("send failed: {0}")]
    SendFailed(String),

    // Codec / routing
    #[error("decode error: {0}")]
    Decode(String),
    #[error("handler for {event_type} failed: {message}")]
    HandlerException { event_type: String, message: String },
    #[error("no handler registered for {0}")]
    UnhandledEvent(String),

    // Request tracking
    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),
    #[error("pending request limit reached")]
    TrackerLimit,
    #[error("request tracker cleared")]
    TrackerCleared,
    #[error("request cancelled")]
    RequestCancelled,

    // Audio
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("no capture device available")]
    NoDevice,
    #[error("capture already running")]
    AlreadyCapturing,
    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),
    #[error("invalid audio payload: {0}")]
    InvalidAudioPayload(String),
    #[error("output context suspended")]
    AudioContextSuspended,

    // Orchestration
    #[error("client not ready: {0}")]
    NotReady(&'static str),
}

impl VoiceError {
    /// Short classification string for logging and user-facing messages.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NetworkUnavailable => "network-unavailable",
            Self::NotConnected => "not-connected",
            Self::ConnectionTimeout(_) => "connection-timeout",
            Self::ReconnectExhausted { .. } => "reconnect-exhausted",
            Self::SendFailed(_) => "send-failed",
            Self::Decode(_) => "decode-error",
            Self::HandlerException { .. } => "handler-exception",
            Self::UnhandledEvent(_) => "unhandled-event",
            Self::RequestTimeout(_) => "request-timeout",
            Self::TrackerLimit => "tracker-limit",
            Self::TrackerCleared => "tracker-cleared",
            Self::RequestCancelled => "request-cancelled",
            Self::PermissionDenied => "permission-denied",
            Self::NoDevice => "no-device",
            Self::AlreadyCapturing => "already-capturing",
            Self::InvalidSampleRate(_) => "invalid-sample-rate",
            Self::InvalidAudioPayload(_) => "invalid-audio-payload",
            Self::AudioContextSuspended => "audio-context-suspended",
            Self::NotReady(_) => "not-ready",
        }
    }

    /// Errors recovered locally by dropping the offending item and moving
    /// on: a bad frame, a failing handler, a bad chunk.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Decode(_)
                | Self::HandlerException { .. }
                | Self::UnhandledEvent(_)
                | Self::InvalidSampleRate(_)
                | Self::InvalidAudioPayload(_)
        )
    }

    /// Errors that leave the transport unusable until an explicit
    /// `connect`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ReconnectExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(VoiceError::NetworkUnavailable.error_kind(), "network-unavailable");
        assert_eq!(VoiceError::TrackerLimit.error_kind(), "tracker-limit");
        assert_eq!(
            VoiceError::RequestTimeout(Duration::from_millis(100)).error_kind(),
            "request-timeout"
        );
        assert_eq!(VoiceError::AudioContextSuspended.error_kind(), "audio-context-suspended");
        assert_eq!(VoiceError::NotReady("no session").error_kind(), "not-ready");
    }

    #[test]
    fn recoverable_classification() {
        assert!(VoiceError::Decode("truncated".into()).is_recoverable());
        assert!(VoiceError::HandlerException {
            event_type: "voicechat.response.chunk".into(),
            message: "boom".into(),
        }
        .is_recoverable());
        assert!(!VoiceError::NotConnected.is_recoverable());
    }

    #[test]
    fn terminal_classification() {
        assert!(VoiceError::ReconnectExhausted { attempts: 6 }.is_terminal());
        assert!(!VoiceError::NotConnected.is_terminal());
        assert!(!VoiceError::TrackerCleared.is_terminal());
    }

    #[test]
    fn display_includes_context() {
        let err = VoiceError::SendFailed("broken pipe".into());
        assert!(err.to_string().contains("broken pipe"));

        let err = VoiceError::ReconnectExhausted { attempts: 6 };
        assert!(err.to_string().contains('6'));
    }
}
