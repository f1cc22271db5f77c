//! Decoding: stream selection, the pull pipeline and its configuration.

pub mod config;
pub mod pipeline;
pub mod reader;
pub mod worker;

pub use config::{DecoderConfig, OutputAudioParams, OutputVideoParams, DEFAULT_AUDIO_SAMPLE_RATE};
pub use pipeline::DecoderPipeline;
pub use reader::{SelectedStream, StreamReader};
pub use worker::FrameWorker;
