pub mod capture;
pub mod cpal_backend;
pub mod mock;
pub mod output;
pub mod pcm;
pub mod rodio_backend;
pub mod sequencer;

pub use capture::{CaptureBackend, CapturePipeline, FrameSink, SampleSink};
pub use cpal_backend::CpalCapture;
pub use output::OutputBackend;
pub use rodio_backend::RodioOutput;
pub use sequencer::PlaybackSequencer;
