use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use murmur_core::{metrics, UtteranceId, VoiceError};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::output::OutputBackend;
use crate::pcm;

/// Sample rates outside (0, 192000] are rejected.
pub const MAX_SAMPLE_RATE: u32 = 192_000;

struct QueuedChunk {
    utterance: UtteranceId,
    seq: u64,
    pcm: Vec<u8>,
    sample_rate: u32,
}

impl PartialEq for QueuedChunk {
    fn eq(&self, other: &Self) -> bool {
        self.utterance == other.utterance && self.seq == other.seq
    }
}

impl Eq for QueuedChunk {}

impl PartialOrd for QueuedChunk {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedChunk {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.utterance, self.seq).cmp(&(&other.utterance, other.seq))
    }
}

struct SeqInner {
    queue: BinaryHeap<Reverse<QueuedChunk>>,
    active: Option<UtteranceId>,
    next_seq: u64,
    task_running: bool,
    current: Option<CancellationToken>,
    destroyed: bool,
}

/// Plays PCM16LE chunks gap-free, one utterance at a time.
///
/// Chunks queue in `(utterance_id, arrival_sequence)` order. A chunk for
/// a different utterance than the active one preempts: playback stops,
/// the queue drains, and the new utterance takes over. Every enqueued
/// buffer is an independent copy, so decoded frames that alias the
/// transport receive buffer are safe to hand in.
pub struct PlaybackSequencer {
    backend: Arc<dyn OutputBackend>,
    inner: Arc<Mutex<SeqInner>>,
}

impl PlaybackSequencer {
    pub fn new(backend: Arc<dyn OutputBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            inner: Arc::new(Mutex::new(SeqInner {
                queue: BinaryHeap::new(),
                active: None,
                next_seq: 0,
                task_running: false,
                current: None,
                destroyed: false,
            })),
        })
    }

    /// Enqueue one chunk. Copies `audio` before taking ownership.
    pub fn play_chunk(
        &self,
        audio: &[u8],
        sample_rate: u32,
        utterance_id: &UtteranceId,
    ) -> Result<(), VoiceError> {
        if audio.is_empty() {
            return Err(VoiceError::InvalidAudioPayload("empty audio".into()));
        }
        if sample_rate == 0 || sample_rate > MAX_SAMPLE_RATE {
            return Err(VoiceError::InvalidSampleRate(sample_rate));
        }

        // Materialise an owned, contiguous buffer starting at offset 0;
        // the caller's slice may alias a transport receive buffer.
        let mut pcm = audio.to_vec();
        if pcm.len() % 2 != 0 {
            tracing::warn!(len = pcm.len(), "Odd PCM16 length, dropping trailing byte");
            pcm.pop();
            if pcm.is_empty() {
                return Err(VoiceError::InvalidAudioPayload("single stray byte".into()));
            }
        }

        let spawn = {
            let mut inner = self.inner.lock();
            if inner.destroyed {
                return Err(VoiceError::AudioContextSuspended);
            }
            if inner.active.as_ref() != Some(utterance_id) {
                // A fresh utterance supersedes whatever is in progress.
                stop_locked(&mut inner);
                inner.active = Some(utterance_id.clone());
                tracing::debug!(utterance_id = %utterance_id, "Adopting new utterance");
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.queue.push(Reverse(QueuedChunk {
                utterance: utterance_id.clone(),
                seq,
                pcm,
                sample_rate,
            }));
            if inner.task_running {
                false
            } else {
                inner.task_running = true;
                true
            }
        };

        if spawn {
            tokio::spawn(playback_loop(
                Arc::clone(&self.backend),
                Arc::clone(&self.inner),
            ));
        }
        Ok(())
    }

    /// Cancel the in-flight source, drain the queue, and go idle. A
    /// later `play_chunk` begins a fresh utterance. Idempotent.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        stop_locked(&mut inner);
        inner.active = None;
    }

    /// Stop and release audio resources.
    pub fn destroy(&self) {
        {
            let mut inner = self.inner.lock();
            stop_locked(&mut inner);
            inner.active = None;
            inner.destroyed = true;
        }
        self.backend.shutdown();
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().task_running
    }

    pub fn active_utterance(&self) -> Option<UtteranceId> {
        self.inner.lock().active.clone()
    }
}

fn stop_locked(inner: &mut SeqInner) {
    if let Some(token) = inner.current.take() {
        // Cancelling an already-finished source is harmless.
        token.cancel();
    }
    inner.queue.clear();
}

enum Next {
    Play(QueuedChunk),
    Skip,
    Done,
}

async fn playback_loop(backend: Arc<dyn OutputBackend>, shared: Arc<Mutex<SeqInner>>) {
    loop {
        let next = {
            let mut inner = shared.lock();
            match inner.queue.pop() {
                None => {
                    inner.task_running = false;
                    Next::Done
                }
                Some(Reverse(chunk)) => {
                    if inner.active.as_ref() == Some(&chunk.utterance) {
                        Next::Play(chunk)
                    } else {
                        Next::Skip
                    }
                }
            }
        };

        let chunk = match next {
            Next::Done => return,
            Next::Skip => {
                tracing::debug!("Discarding chunk from superseded utterance");
                metrics::count("playback_chunks_discarded");
                continue;
            }
            Next::Play(chunk) => chunk,
        };

        if let Err(e) = backend.ensure_ready() {
            tracing::warn!(error = %e, "Output context unavailable, dropping chunk");
            continue;
        }

        let samples = pcm::pcm16le_to_f32(&chunk.pcm);
        if samples.iter().any(|s| !s.is_finite()) {
            tracing::warn!("Rejecting chunk with non-finite samples");
            continue;
        }

        let cancel = CancellationToken::new();
        {
            let mut inner = shared.lock();
            // A stop between pop and here already cancelled; honor it.
            if inner.active.as_ref() != Some(&chunk.utterance) {
                continue;
            }
            inner.current = Some(cancel.clone());
        }

        let completed = match backend.schedule(samples, chunk.sample_rate, cancel) {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to schedule chunk");
                shared.lock().current = None;
                continue;
            }
        };

        metrics::count("playback_chunks_scheduled");
        // Sequential playback: wait for this source before the next pop.
        let _ = completed.await;
        shared.lock().current = None;
    }
}
