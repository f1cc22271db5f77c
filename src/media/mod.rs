pub mod backend;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod format;
pub mod frame;
pub mod memory;

pub use backend::{
    AudioParameters, CodecParameters, Container, MediaSource, Packet, StreamDecoder, StreamInfo,
    VideoParameters,
};
pub use error::{AdapterError, Result};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegSource;
pub use format::{MediaKind, PixelFormat, SampleFormat};
pub use frame::{AudioFrame, DecodedFrame, VideoFrame};
pub use memory::{MemoryMedia, MemorySource};
