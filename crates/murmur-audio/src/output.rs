use murmur_core::VoiceError;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Speaker-side seam for the playback sequencer.
///
/// The sequencer decodes chunks to f32 samples, schedules them here one
/// at a time, and awaits each completion before scheduling the next.
/// Cancelling the token must end the source promptly and still resolve
/// the completion channel (or drop it; both read as "over").
pub trait OutputBackend: Send + Sync {
    /// Create the output context lazily, resume it if the platform
    /// suspended it, or recreate it if it was closed. Reports
    /// `audio-context-suspended` when none of that works.
    fn ensure_ready(&self) -> Result<(), VoiceError>;

    /// Schedule one decoded chunk at its own sample rate. The returned
    /// receiver resolves when playback of this source ends.
    fn schedule(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
        cancel: CancellationToken,
    ) -> Result<oneshot::Receiver<()>, VoiceError>;

    /// Release audio resources. Further scheduling is undefined.
    fn shutdown(&self) {}
}
