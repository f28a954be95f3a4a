//! In-memory capture and output backends for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use murmur_core::VoiceError;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureBackend, SampleSink};
use crate::output::OutputBackend;

/// Capture backend driven by the test: `emit` pushes samples through the
/// pipeline's framing exactly as a device callback would.
pub struct MockCapture {
    actual_rate: u32,
    sink: Mutex<Option<SampleSink>>,
    fail_next: Mutex<Option<VoiceError>>,
    closes: AtomicUsize,
}

impl MockCapture {
    pub fn new(actual_rate: u32) -> Self {
        Self {
            actual_rate,
            sink: Mutex::new(None),
            fail_next: Mutex::new(None),
            closes: AtomicUsize::new(0),
        }
    }

    /// Make the next `open` fail with `error`.
    pub fn fail_next(&self, error: VoiceError) {
        *self.fail_next.lock() = Some(error);
    }

    /// Push samples as the device callback would.
    pub fn emit(&self, samples: &[f32]) {
        if let Some(sink) = self.sink.lock().as_mut() {
            sink(samples);
        }
    }

    pub fn is_open(&self) -> bool {
        self.sink.lock().is_some()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for MockCapture {
    fn open(&self, _requested_rate: u32, sink: SampleSink) -> Result<u32, VoiceError> {
        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }
        *self.sink.lock() = Some(sink);
        Ok(self.actual_rate)
    }

    fn close(&self) {
        if self.sink.lock().take().is_some() {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// One chunk recorded by [`MockOutput`].
#[derive(Clone, Debug)]
pub struct ScheduledChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Output backend that records scheduling order. In auto mode each
/// source completes after its real duration (virtual time friendly); in
/// manual mode the test drives completion with `complete_one`.
pub struct MockOutput {
    auto_complete: bool,
    scheduled: Mutex<Vec<ScheduledChunk>>,
    tokens: Mutex<Vec<CancellationToken>>,
    pending: Mutex<VecDeque<oneshot::Sender<()>>>,
    suspended: AtomicBool,
    shutdowns: AtomicUsize,
}

impl MockOutput {
    /// Sources complete on their own after the chunk's play time.
    pub fn auto() -> Self {
        Self::new(true)
    }

    /// Sources complete only via [`MockOutput::complete_one`] (or
    /// cancellation).
    pub fn manual() -> Self {
        Self::new(false)
    }

    fn new(auto_complete: bool) -> Self {
        Self {
            auto_complete,
            scheduled: Mutex::new(Vec::new()),
            tokens: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            suspended: AtomicBool::new(false),
            shutdowns: AtomicUsize::new(0),
        }
    }

    /// Simulate a platform-suspended context that refuses to resume.
    pub fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::SeqCst);
    }

    /// Finish the oldest in-flight source (manual mode).
    pub fn complete_one(&self) -> bool {
        match self.pending.lock().pop_front() {
            Some(trigger) => {
                let _ = trigger.send(());
                true
            }
            None => false,
        }
    }

    pub fn scheduled(&self) -> Vec<ScheduledChunk> {
        self.scheduled.lock().clone()
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled.lock().len()
    }

    pub fn cancelled_count(&self) -> usize {
        self.tokens.lock().iter().filter(|t| t.is_cancelled()).count()
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl OutputBackend for MockOutput {
    fn ensure_ready(&self) -> Result<(), VoiceError> {
        if self.suspended.load(Ordering::SeqCst) {
            return Err(VoiceError::AudioContextSuspended);
        }
        Ok(())
    }

    fn schedule(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
        cancel: CancellationToken,
    ) -> Result<oneshot::Receiver<()>, VoiceError> {
        let play_time = std::time::Duration::from_secs_f64(
            samples.len() as f64 / sample_rate.max(1) as f64,
        );
        self.scheduled.lock().push(ScheduledChunk {
            samples,
            sample_rate,
        });
        self.tokens.lock().push(cancel.clone());

        let (done_tx, done_rx) = oneshot::channel();
        if self.auto_complete {
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(play_time) => {}
                }
                let _ = done_tx.send(());
            });
        } else {
            let (trigger_tx, trigger_rx) = oneshot::channel();
            self.pending.lock().push_back(trigger_tx);
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = trigger_rx => {}
                }
                let _ = done_tx.send(());
            });
        }
        Ok(done_rx)
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}
