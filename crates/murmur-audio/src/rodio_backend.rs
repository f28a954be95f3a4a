//! Speaker output backend on rodio.
//!
//! The output stream is created lazily on first use and lives on a
//! dedicated thread (it is not `Send`). If that thread dies — the
//! platform closed the device — the next schedule builds a fresh
//! context, mirroring the recreate-if-closed contract.

use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use murmur_core::VoiceError;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::output::OutputBackend;

enum Cmd {
    Play {
        samples: Vec<f32>,
        sample_rate: u32,
        cancel: CancellationToken,
        done: oneshot::Sender<()>,
    },
    Shutdown,
}

pub struct RodioOutput {
    cmd: Mutex<Option<std_mpsc::Sender<Cmd>>>,
}

impl RodioOutput {
    pub fn new() -> Self {
        Self {
            cmd: Mutex::new(None),
        }
    }

    fn spawn_context(&self) -> Result<std_mpsc::Sender<Cmd>, VoiceError> {
        let (cmd_tx, cmd_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();
        std::thread::Builder::new()
            .name("murmur-playback".into())
            .spawn(move || run_output_thread(cmd_rx, ready_tx))
            .map_err(|_| VoiceError::AudioContextSuspended)?;
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(cmd_tx),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(VoiceError::AudioContextSuspended),
        }
    }
}

impl Default for RodioOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBackend for RodioOutput {
    fn ensure_ready(&self) -> Result<(), VoiceError> {
        let mut cmd = self.cmd.lock();
        if cmd.is_none() {
            *cmd = Some(self.spawn_context()?);
        }
        Ok(())
    }

    fn schedule(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
        cancel: CancellationToken,
    ) -> Result<oneshot::Receiver<()>, VoiceError> {
        let (done_tx, done_rx) = oneshot::channel();
        let mut cmd_slot = self.cmd.lock();
        let tx = match cmd_slot.as_ref() {
            Some(tx) => tx.clone(),
            None => {
                let tx = self.spawn_context()?;
                *cmd_slot = Some(tx.clone());
                tx
            }
        };
        let cmd = Cmd::Play {
            samples,
            sample_rate,
            cancel,
            done: done_tx,
        };
        match tx.send(cmd) {
            Ok(()) => Ok(done_rx),
            Err(std_mpsc::SendError(cmd)) => {
                // The context thread is gone; build a fresh one.
                tracing::info!("Output context closed, recreating");
                let tx = self.spawn_context()?;
                *cmd_slot = Some(tx.clone());
                tx.send(cmd).map_err(|_| VoiceError::AudioContextSuspended)?;
                Ok(done_rx)
            }
        }
    }

    fn shutdown(&self) {
        if let Some(tx) = self.cmd.lock().take() {
            let _ = tx.send(Cmd::Shutdown);
        }
    }
}

fn run_output_thread(
    cmd_rx: std_mpsc::Receiver<Cmd>,
    ready_tx: std_mpsc::Sender<Result<(), VoiceError>>,
) {
    let (stream, handle) = match rodio::OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(error = %e, "No output device available");
            let _ = ready_tx.send(Err(VoiceError::AudioContextSuspended));
            return;
        }
    };
    let _stream = stream; // keeps the device open
    let _ = ready_tx.send(Ok(()));

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            Cmd::Shutdown => break,
            Cmd::Play {
                samples,
                sample_rate,
                cancel,
                done,
            } => {
                let sink = match rodio::Sink::try_new(&handle) {
                    Ok(sink) => sink,
                    Err(e) => {
                        tracing::warn!(error = %e, "Sink creation failed, dropping chunk");
                        drop(done); // reads as completed on the other side
                        continue;
                    }
                };
                sink.append(rodio::buffer::SamplesBuffer::new(1, sample_rate, samples));
                while !sink.empty() {
                    if cancel.is_cancelled() {
                        sink.stop();
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                let _ = done.send(());
            }
        }
    }
}
