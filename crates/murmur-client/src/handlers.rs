use std::collections::HashSet;
use std::sync::Arc;

use murmur_audio::sequencer::MAX_SAMPLE_RATE;
use murmur_audio::PlaybackSequencer;
use murmur_codec::events;
use murmur_core::{BusEvent, EventBus, UtteranceId, VoiceError};
use murmur_session::{EventHandler, HandlerContext, SessionManager};
use parking_lot::Mutex;

/// Installs the response-handling set on a session manager and forwards
/// server audio to the playback sequencer.
///
/// The router keeps a shadow set of what it believes is installed.
/// `install` clears that set and re-registers everything; since
/// registration overwrites, calling it after the session manager is
/// rebuilt (or calling it twice) always converges on the same handler
/// set, whatever the host environment did in between.
pub struct ResponseRouter {
    sequencer: Arc<PlaybackSequencer>,
    bus: Arc<EventBus>,
    default_sample_rate: u32,
    installed: Mutex<HashSet<String>>,
}

impl ResponseRouter {
    pub fn new(
        sequencer: Arc<PlaybackSequencer>,
        bus: Arc<EventBus>,
        default_sample_rate: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            sequencer,
            bus,
            default_sample_rate,
            installed: Mutex::new(HashSet::new()),
        })
    }

    /// Register the full desired handler set. Idempotent.
    pub fn install(&self, session: &SessionManager) {
        let mut installed = self.installed.lock();
        installed.clear();

        let entries: [(&str, EventHandler); 5] = [
            (events::RESPONSE_START, self.on_start()),
            (events::RESPONSE_CHUNK, self.on_chunk()),
            (events::RESPONSE_COMPLETE, self.on_complete()),
            (events::RESPONSE_INTERRUPT, self.on_interrupt()),
            (events::RESPONSE_STOP, self.on_stop()),
        ];
        for (event_type, handler) in entries {
            session.register(event_type, handler);
            installed.insert(event_type.to_string());
        }

        for base in [events::AUDIO_START, events::AUDIO_CHUNK, events::AUDIO_END] {
            session.register_error(base, self.on_error());
        }
        session.register(events::ERROR_WILDCARD, self.on_error());
        installed.insert(events::ERROR_WILDCARD.to_string());

        tracing::debug!(handlers = installed.len(), "Response handlers installed");
    }

    pub fn installed_count(&self) -> usize {
        self.installed.lock().len()
    }

    fn on_start(&self) -> EventHandler {
        let sequencer = Arc::clone(&self.sequencer);
        let bus = Arc::clone(&self.bus);
        Arc::new(move |ctx: &HandlerContext<'_>| {
            // A new response preempts whatever is still playing.
            sequencer.stop();
            bus.emit(BusEvent::ResponseStart {
                utterance_id: ctx.frame.payload.utterance_id.map(UtteranceId::from_raw),
            });
            Ok(())
        })
    }

    fn on_chunk(&self) -> EventHandler {
        let sequencer = Arc::clone(&self.sequencer);
        let bus = Arc::clone(&self.bus);
        let default_sample_rate = self.default_sample_rate;
        Arc::new(move |ctx: &HandlerContext<'_>| {
            let payload = &ctx.frame.payload;
            let audio = payload
                .audio
                .ok_or_else(|| VoiceError::InvalidAudioPayload("missing audio field".into()))?;
            let utterance_id = payload
                .utterance_id
                .map(UtteranceId::from_raw)
                .ok_or_else(|| VoiceError::InvalidAudioPayload("missing utterance id".into()))?;

            let sample_rate = match payload.sampling_rate {
                Some(rate) if rate > 0 && rate <= MAX_SAMPLE_RATE => rate,
                Some(rate) => {
                    tracing::warn!(rate, "Out-of-range sample rate, using default");
                    default_sample_rate
                }
                None => default_sample_rate,
            };

            // `audio` aliases the transport receive buffer; play_chunk
            // copies it before this handler returns.
            sequencer.play_chunk(audio, sample_rate, &utterance_id)?;
            bus.emit(BusEvent::ResponseChunk {
                utterance_id: Some(utterance_id),
                byte_len: audio.len(),
                sample_rate,
            });
            Ok(())
        })
    }

    fn on_complete(&self) -> EventHandler {
        let bus = Arc::clone(&self.bus);
        Arc::new(move |ctx: &HandlerContext<'_>| {
            bus.emit(BusEvent::ResponseComplete {
                utterance_id: ctx.frame.payload.utterance_id.map(UtteranceId::from_raw),
            });
            Ok(())
        })
    }

    fn on_interrupt(&self) -> EventHandler {
        let sequencer = Arc::clone(&self.sequencer);
        let bus = Arc::clone(&self.bus);
        Arc::new(move |_ctx: &HandlerContext<'_>| {
            sequencer.stop();
            bus.emit(BusEvent::ResponseInterrupt);
            Ok(())
        })
    }

    fn on_stop(&self) -> EventHandler {
        let sequencer = Arc::clone(&self.sequencer);
        let bus = Arc::clone(&self.bus);
        Arc::new(move |_ctx: &HandlerContext<'_>| {
            sequencer.stop();
            bus.emit(BusEvent::ResponseStop);
            Ok(())
        })
    }

    fn on_error(&self) -> EventHandler {
        let bus = Arc::clone(&self.bus);
        Arc::new(move |ctx: &HandlerContext<'_>| {
            let payload = &ctx.frame.payload;
            let message = payload.message.unwrap_or("unknown server error").to_string();
            let code = payload
                .code
                .or(payload.request_type)
                .map(|c| c.to_string());
            tracing::warn!(
                event_type = ctx.frame.event_type,
                code = code.as_deref().unwrap_or("-"),
                message,
                "Server error event"
            );
            bus.emit(BusEvent::Error { code, message });
            Ok(())
        })
    }
}
