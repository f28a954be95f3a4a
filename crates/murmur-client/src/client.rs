use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use murmur_audio::{
    CaptureBackend, CapturePipeline, CpalCapture, OutputBackend, PlaybackSequencer, RodioOutput,
};
use murmur_codec::OutboundEvent;
use murmur_core::{ConnectionState, CoreConfig, EventBus, SessionId, VoiceError};
use murmur_session::SessionManager;
use murmur_transport::{Connector, NetworkMonitor, WsConnector};
use tokio::sync::mpsc;

use crate::handlers::ResponseRouter;

struct RecordingSession {
    pump: tokio::task::JoinHandle<()>,
    watchdog: tokio::task::JoinHandle<()>,
}

/// The duplex voice-chat client: one session manager, one capture
/// pipeline, one playback sequencer, wired end to end.
///
/// Command surface: `connect`, `disconnect`, `start_recording`,
/// `stop_recording` (plus a mute toggle). Everything else is published
/// on the event bus.
pub struct VoiceChatClient {
    config: CoreConfig,
    session: Arc<SessionManager>,
    capture: Arc<CapturePipeline>,
    sequencer: Arc<PlaybackSequencer>,
    router: Arc<ResponseRouter>,
    bus: Arc<EventBus>,
    muted: Arc<AtomicBool>,
    recording: tokio::sync::Mutex<Option<RecordingSession>>,
}

impl VoiceChatClient {
    pub fn new(
        config: CoreConfig,
        connector: Arc<dyn Connector>,
        capture_backend: Arc<dyn CaptureBackend>,
        output_backend: Arc<dyn OutputBackend>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let monitor = Arc::new(NetworkMonitor::new(config.network_debounce));
        let session = SessionManager::new(config.clone(), connector, monitor, bus.clone());
        let sequencer = PlaybackSequencer::new(output_backend);
        let capture = Arc::new(CapturePipeline::new(
            capture_backend,
            config.capture_frame_samples,
        ));
        let router = ResponseRouter::new(sequencer.clone(), bus.clone(), config.default_sample_rate);
        router.install(&session);

        Arc::new(Self {
            config,
            session,
            capture,
            sequencer,
            router,
            bus,
            muted: Arc::new(AtomicBool::new(false)),
            recording: tokio::sync::Mutex::new(None),
        })
    }

    /// Production wiring: WebSocket transport, cpal microphone, rodio
    /// speakers, the global bus.
    pub fn with_defaults(config: CoreConfig) -> Arc<Self> {
        Self::new(
            config,
            Arc::new(WsConnector),
            Arc::new(CpalCapture::new()),
            Arc::new(RodioOutput::new()),
            EventBus::global(),
        )
    }

    pub async fn connect(&self, url: &str) -> Result<(), VoiceError> {
        self.session.connect(url).await
    }

    /// Full teardown: recording stops, playback stops, the transport
    /// closes and forgets its URL.
    pub async fn disconnect(&self) {
        if let Some(recording) = self.recording.lock().await.take() {
            self.capture.stop();
            recording.watchdog.abort();
            recording.pump.abort();
        }
        self.sequencer.stop();
        self.session.disconnect(true).await;
    }

    /// Begin streaming microphone audio. Returns the actual capture
    /// sample rate after the server acknowledges `audio.start`.
    pub async fn start_recording(&self) -> Result<u32, VoiceError> {
        if self.session.connection_state() != ConnectionState::Connected {
            return Err(VoiceError::NotReady("transport not connected"));
        }
        if self.session.session_id().is_none() {
            return Err(VoiceError::NotReady("no session established"));
        }

        let mut slot = self.recording.lock().await;
        if slot.is_some() {
            return Err(VoiceError::AlreadyCapturing);
        }

        // Frames cross from the audio thread over a bounded channel; a
        // full channel rejects the frame rather than block capture.
        let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<u8>>(32);
        let actual_rate = self.capture.start(
            self.config.default_sample_rate,
            Box::new(move |frame| frame_tx.try_send(frame).is_ok()),
        )?;

        let start = OutboundEvent::audio_start(actual_rate, self.config.default_language.clone());
        if let Err(e) = self
            .session
            .send_with_ack(start, self.config.recording_ack_timeout)
            .await
        {
            self.capture.stop();
            return Err(e);
        }

        // Chunk sends are fire-and-forget, in program order; a failed
        // send is logged and capture continues.
        let pump = {
            let session = self.session.clone();
            let muted = self.muted.clone();
            tokio::spawn(async move {
                while let Some(frame) = frame_rx.recv().await {
                    let is_muted = muted.load(Ordering::Relaxed);
                    if let Err(e) = session
                        .send(OutboundEvent::audio_chunk(frame, is_muted))
                        .await
                    {
                        tracing::warn!(error = %e, "Audio chunk send failed");
                    }
                }
            })
        };

        let watchdog = {
            let mut states = self.session.watch_connection_state();
            let capture = self.capture.clone();
            tokio::spawn(async move {
                while states.changed().await.is_ok() {
                    if *states.borrow() != ConnectionState::Connected {
                        tracing::warn!("Transport lost while recording, stopping capture");
                        capture.stop();
                        break;
                    }
                }
            })
        };

        *slot = Some(RecordingSession { pump, watchdog });
        tracing::info!(actual_rate, "Recording started");
        Ok(actual_rate)
    }

    /// Stop streaming and close the utterance with `audio.end`. The
    /// local stop holds even if the acknowledgment fails.
    pub async fn stop_recording(&self) -> Result<(), VoiceError> {
        let Some(recording) = self.recording.lock().await.take() else {
            return Ok(());
        };
        self.capture.stop();
        recording.watchdog.abort();
        // Capture stop drops the frame sender; the pump drains what is
        // queued, keeping chunk/end ordering intact.
        let _ = recording.pump.await;

        tracing::info!("Recording stopped");
        self.session
            .send_with_ack(
                OutboundEvent::audio_end(),
                self.config.recording_ack_timeout,
            )
            .await
            .map(|_| ())
    }

    /// While muted, frames keep streaming but are flagged so the server
    /// ignores their content.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn is_recording(&self) -> bool {
        self.capture.is_running()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.connection_state()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.session_id()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn sequencer(&self) -> &Arc<PlaybackSequencer> {
        &self.sequencer
    }

    /// Re-install the response handler set, e.g. after the host
    /// environment rebuilt its view of the session.
    pub fn reinstall_handlers(&self) {
        self.router.install(&self.session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_audio::mock::{MockCapture, MockOutput};
    use murmur_transport::mock::MockConnector;

    fn test_client() -> (Arc<VoiceChatClient>, Arc<MockConnector>, Arc<MockCapture>) {
        let connector = Arc::new(MockConnector::new());
        let capture = Arc::new(MockCapture::new(48_000));
        let output = Arc::new(MockOutput::auto());
        let client = VoiceChatClient::new(
            CoreConfig::default(),
            connector.clone() as Arc<dyn Connector>,
            capture.clone() as Arc<dyn CaptureBackend>,
            output as Arc<dyn OutputBackend>,
            Arc::new(EventBus::new()),
        );
        (client, connector, capture)
    }

    #[tokio::test(start_paused = true)]
    async fn start_recording_requires_connection() {
        let (client, _, _) = test_client();
        let err = client.start_recording().await.unwrap_err();
        assert_eq!(err.error_kind(), "not-ready");
    }

    #[tokio::test(start_paused = true)]
    async fn start_recording_requires_session() {
        let (client, connector, _) = test_client();
        client.connect("ws://voice").await.unwrap();
        let _peer = connector.accept().await;

        let err = client.start_recording().await.unwrap_err();
        assert_eq!(err, VoiceError::NotReady("no session established"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_recording_without_start_is_a_no_op() {
        let (client, _, _) = test_client();
        assert!(client.stop_recording().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn mute_flag_toggles() {
        let (client, _, _) = test_client();
        assert!(!client.is_muted());
        client.set_muted(true);
        assert!(client.is_muted());
        client.set_muted(false);
        assert!(!client.is_muted());
    }

    #[tokio::test(start_paused = true)]
    async fn handlers_installed_on_construction() {
        let (client, _, _) = test_client();
        assert!(client.router.installed_count() >= 6);
        // Reinstall converges on the same set.
        client.reinstall_handlers();
        assert!(client.router.installed_count() >= 6);
    }
}
