//! Demux, decode and convert media into fixed output formats.
//!
//! A [`DecoderPipeline`] opens a container through a [`MediaSource`] backend,
//! selects the first audio and video streams, and hands out audio in
//! fixed-size chunks and video frames at a fixed size and pixel format.
//!
//! ```no_run
//! use aves_media::{DecoderConfig, DecoderPipeline, MemorySource};
//!
//! let mut pipeline = DecoderPipeline::new(MemorySource::new(), DecoderConfig::default());
//! pipeline.start("clip.mkv")?;
//! while let Ok(chunk) = pipeline.get_audio_frame() {
//!     println!("{} samples at {:?}us", chunk.nb_samples, chunk.pts);
//! }
//! # Ok::<(), aves_media::AdapterError>(())
//! ```

pub mod convert;
pub mod core;
pub mod decode;
pub mod media;

pub use crate::convert::{ConvertBackend, FrameConverter, ScaleAlgorithm, SoftwareConvert};
pub use crate::core::time::{Rational, Time};
pub use crate::decode::{DecoderConfig, DecoderPipeline, FrameWorker, OutputAudioParams, OutputVideoParams};
pub use crate::media::{
    AdapterError, AudioFrame, MediaSource, MemoryMedia, MemorySource, PixelFormat, SampleFormat,
    VideoFrame,
};
#[cfg(feature = "ffmpeg")]
pub use crate::convert::FfmpegConvert;
#[cfg(feature = "ffmpeg")]
pub use crate::media::FfmpegSource;
