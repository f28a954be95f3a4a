use murmur_core::VoiceError;
use serde::{Deserialize, Serialize};

/// Component-specific frame payload. A flat record of optional fields;
/// each event type populates the fields it defines and leaves the rest
/// absent.
///
/// Decoded `&str` and `&[u8]` fields borrow the buffer passed to
/// [`decode`]. Anything retained past the decode scope must be copied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload<'a> {
    /// `true` marks the frame as an acknowledgment of the request whose
    /// `event_id` it echoes.
    pub success: Option<bool>,
    #[serde(borrow)]
    pub message: Option<&'a str>,
    #[serde(borrow)]
    pub code: Option<&'a str>,
    #[serde(borrow)]
    pub request_type: Option<&'a str>,
    #[serde(borrow)]
    pub session_id: Option<&'a str>,
    pub sampling_rate: Option<u32>,
    #[serde(borrow)]
    pub language: Option<&'a str>,
    /// PCM16LE bytes. Aliases the receive buffer after decode.
    #[serde(borrow)]
    pub audio: Option<&'a [u8]>,
    pub is_muted: Option<bool>,
    #[serde(borrow)]
    pub utterance_id: Option<&'a str>,
    pub sequence: Option<u32>,
}

/// One application message on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireFrame<'a> {
    #[serde(borrow)]
    pub event_type: &'a str,
    #[serde(borrow)]
    pub event_id: &'a str,
    #[serde(borrow)]
    pub session_id: Option<&'a str>,
    #[serde(borrow)]
    pub payload: Payload<'a>,
}

impl<'a> WireFrame<'a> {
    /// Whether this frame acknowledges a prior request: it echoes an
    /// `event_id` and its payload carries `success: true`.
    pub fn is_ack(&self) -> bool {
        !self.event_id.is_empty() && self.payload.success == Some(true)
    }
}

/// Encode a frame. Deterministic for a given input.
pub fn encode(frame: &WireFrame<'_>) -> Result<Vec<u8>, VoiceError> {
    postcard::to_allocvec(frame).map_err(|e| VoiceError::Decode(e.to_string()))
}

/// Decode a frame. Byte-slice and string fields of the result borrow
/// `bytes`.
pub fn decode(bytes: &[u8]) -> Result<WireFrame<'_>, VoiceError> {
    postcard::from_bytes(bytes).map_err(|e| VoiceError::Decode(e.to_string()))
}

/// Owned payload used to build outbound events before encoding.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OwnedPayload {
    pub success: Option<bool>,
    pub message: Option<String>,
    pub code: Option<String>,
    pub request_type: Option<String>,
    pub session_id: Option<String>,
    pub sampling_rate: Option<u32>,
    pub language: Option<String>,
    pub audio: Option<Vec<u8>>,
    pub is_muted: Option<bool>,
    pub utterance_id: Option<String>,
    pub sequence: Option<u32>,
}

impl OwnedPayload {
    /// Borrowed view suitable for encoding.
    pub fn as_wire(&self) -> Payload<'_> {
        Payload {
            success: self.success,
            message: self.message.as_deref(),
            code: self.code.as_deref(),
            request_type: self.request_type.as_deref(),
            session_id: self.session_id.as_deref(),
            sampling_rate: self.sampling_rate,
            language: self.language.as_deref(),
            audio: self.audio.as_deref(),
            is_muted: self.is_muted,
            utterance_id: self.utterance_id.as_deref(),
            sequence: self.sequence,
        }
    }
}

/// An outbound application event, prior to id assignment and encoding.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundEvent {
    pub event_type: String,
    pub payload: OwnedPayload,
}

impl OutboundEvent {
    pub fn new(event_type: impl Into<String>, payload: OwnedPayload) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// `audio.start` carrying the negotiated capture rate.
    pub fn audio_start(sampling_rate: u32, language: impl Into<String>) -> Self {
        Self::new(
            crate::events::AUDIO_START,
            OwnedPayload {
                sampling_rate: Some(sampling_rate),
                language: Some(language.into()),
                ..Default::default()
            },
        )
    }

    /// One capture frame.
    pub fn audio_chunk(audio: Vec<u8>, is_muted: bool) -> Self {
        Self::new(
            crate::events::AUDIO_CHUNK,
            OwnedPayload {
                audio: Some(audio),
                is_muted: Some(is_muted),
                ..Default::default()
            },
        )
    }

    /// End-of-recording marker. Empty payload.
    pub fn audio_end() -> Self {
        Self::new(crate::events::AUDIO_END, OwnedPayload::default())
    }
}
