//! Microphone capture backend on cpal.
//!
//! The cpal stream is not `Send` on every platform, so each capture
//! session runs on a dedicated thread that owns the stream and parks
//! until `close` drops the stop handle.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use murmur_core::VoiceError;
use parking_lot::Mutex;

use crate::capture::{CaptureBackend, SampleSink};

pub struct CpalCapture {
    stop: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl CpalCapture {
    pub fn new() -> Self {
        Self {
            stop: Mutex::new(None),
        }
    }

    /// Names of the available input devices.
    pub fn list_input_devices() -> Vec<String> {
        let host = cpal::default_host();
        match host.input_devices() {
            Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl Default for CpalCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for CpalCapture {
    fn open(&self, requested_rate: u32, sink: SampleSink) -> Result<u32, VoiceError> {
        let mut stop_slot = self.stop.lock();
        if stop_slot.is_some() {
            return Err(VoiceError::AlreadyCapturing);
        }

        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("murmur-capture".into())
            .spawn(move || run_capture_thread(requested_rate, sink, ready_tx, stop_rx))
            .map_err(|_| VoiceError::NoDevice)?;

        match ready_rx.recv() {
            Ok(Ok(actual_rate)) => {
                *stop_slot = Some(stop_tx);
                Ok(actual_rate)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(VoiceError::NoDevice),
        }
    }

    fn close(&self) {
        // Dropping the sender unparks the capture thread, which drops
        // the stream.
        self.stop.lock().take();
    }
}

fn run_capture_thread(
    requested_rate: u32,
    sink: SampleSink,
    ready_tx: std_mpsc::Sender<Result<u32, VoiceError>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = ready_tx.send(Err(VoiceError::NoDevice));
        return;
    };
    let supported = match device.default_input_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready_tx.send(Err(map_error_text(&e.to_string())));
            return;
        }
    };
    tracing::debug!(
        device = device.name().unwrap_or_else(|_| "unknown".into()),
        default_rate = supported.sample_rate().0,
        "Opening capture device"
    );

    let sink = Arc::new(Mutex::new(sink));

    // Prefer mono at the requested rate; fall back to the device's own
    // rate, then to its native channel layout with a downmix.
    let candidates = [
        (1u16, requested_rate),
        (1u16, supported.sample_rate().0),
        (supported.channels(), supported.sample_rate().0),
    ];

    let mut opened = None;
    let mut last_error: Option<cpal::BuildStreamError> = None;
    for (channels, rate) in candidates {
        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let sink_cb = Arc::clone(&sink);
        let width = channels as usize;
        let data_cb = move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let mut sink = sink_cb.lock();
            if width <= 1 {
                (*sink)(data);
            } else {
                let mono: Vec<f32> = data
                    .chunks_exact(width)
                    .map(|frame| frame.iter().sum::<f32>() / width as f32)
                    .collect();
                (*sink)(&mono);
            }
        };
        let err_cb = |err: cpal::StreamError| {
            tracing::warn!(error = %err, "Capture stream error");
        };
        match device.build_input_stream(&config, data_cb, err_cb, None) {
            Ok(stream) => {
                opened = Some((stream, rate));
                break;
            }
            Err(e) => {
                last_error = Some(e);
            }
        }
    }

    let Some((stream, actual_rate)) = opened else {
        let _ = ready_tx.send(Err(map_build_error(last_error)));
        return;
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(map_error_text(&e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(actual_rate));

    // Park until close() drops the stop sender; the stream must stay on
    // this thread.
    let _ = stop_rx.recv();
    drop(stream);
}

fn map_build_error(error: Option<cpal::BuildStreamError>) -> VoiceError {
    match error {
        Some(cpal::BuildStreamError::DeviceNotAvailable) => VoiceError::NoDevice,
        Some(other) => map_error_text(&other.to_string()),
        None => VoiceError::NoDevice,
    }
}

fn map_error_text(text: &str) -> VoiceError {
    let lower = text.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("access") {
        VoiceError::PermissionDenied
    } else {
        tracing::debug!(error = text, "Capture device error");
        VoiceError::NoDevice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_text_mapping() {
        assert_eq!(
            map_error_text("Permission denied by the OS"),
            VoiceError::PermissionDenied
        );
        assert_eq!(map_error_text("no such device"), VoiceError::NoDevice);
        assert_eq!(map_build_error(None), VoiceError::NoDevice);
    }

    #[test]
    fn device_listing_does_not_panic() {
        // Environments without audio hardware return an empty list.
        let _ = CpalCapture::list_input_devices();
    }
}
