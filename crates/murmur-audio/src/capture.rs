use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use murmur_core::{metrics, VoiceError};

use crate::pcm;

/// Receives raw f32 sample runs from a capture backend, usually on a
/// real-time audio thread.
pub type SampleSink = Box<dyn FnMut(&[f32]) + Send>;

/// Receives one fixed-size PCM16LE frame. Returning `false` rejects the
/// frame; the pipeline drops it with a log rather than block the audio
/// thread.
pub type FrameSink = Box<dyn FnMut(Vec<u8>) -> bool + Send>;

/// Microphone access seam. The production implementation opens a cpal
/// input stream; tests inject samples directly.
pub trait CaptureBackend: Send + Sync {
    /// Open the device at or near `requested_rate`, mono, with echo
    /// cancellation, noise suppression, and auto-gain left to the device
    /// configuration. Returns the actual rate the device provides.
    fn open(&self, requested_rate: u32, sink: SampleSink) -> Result<u32, VoiceError>;

    /// Stop the stream. Idempotent.
    fn close(&self);
}

/// Turns the backend's arbitrary-size sample runs into fixed-count
/// PCM16LE frames and hands them to the consumer without blocking.
pub struct CapturePipeline {
    backend: Arc<dyn CaptureBackend>,
    frame_samples: usize,
    running: AtomicBool,
}

impl CapturePipeline {
    pub fn new(backend: Arc<dyn CaptureBackend>, frame_samples: usize) -> Self {
        Self {
            backend,
            frame_samples: frame_samples.max(1),
            running: AtomicBool::new(false),
        }
    }

    /// Start capturing. Returns the actual sample rate. Frame size stays
    /// constant for the lifetime of the capture session.
    pub fn start(&self, requested_rate: u32, mut on_frame: FrameSink) -> Result<u32, VoiceError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(VoiceError::AlreadyCapturing);
        }

        let frame_samples = self.frame_samples;
        let mut buffer: Vec<f32> = Vec::with_capacity(frame_samples);
        let mut first_frame = true;
        let mut dropped: u64 = 0;

        let sink: SampleSink = Box::new(move |samples: &[f32]| {
            for &sample in samples {
                buffer.push(sample);
                if buffer.len() == frame_samples {
                    if first_frame {
                        first_frame = false;
                        let rms = pcm::rms(&buffer);
                        tracing::info!(
                            rms,
                            silent = pcm::is_near_silence(rms),
                            frame_samples,
                            "First capture frame"
                        );
                    }
                    let mut frame = Vec::with_capacity(frame_samples * 2);
                    pcm::f32_to_pcm16le(&buffer, &mut frame);
                    buffer.clear();
                    metrics::count("capture_frames");
                    if !on_frame(frame) {
                        dropped += 1;
                        metrics::count("capture_frames_dropped");
                        tracing::warn!(dropped, "Capture frame dropped by slow consumer");
                    }
                }
            }
        });

        match self.backend.open(requested_rate, sink) {
            Ok(actual_rate) => {
                tracing::info!(requested_rate, actual_rate, "Capture started");
                Ok(actual_rate)
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Stop capturing. Synchronous and idempotent.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.backend.close();
            tracing::info!("Capture stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
