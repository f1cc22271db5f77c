//! Capability interface to the external demux/decode library.
//!
//! The pipeline never talks to a codec library directly. A backend implements
//! `MediaSource` (open a container), `Container` (enumerate streams, read
//! packets, seek) and `StreamDecoder` (packet in, frames out). See
//! `media::memory` for an in-process backend and `media::ffmpeg` for the
//! FFmpeg one.

use std::path::Path;

use crate::convert::backend::ConvertBackend;
use crate::core::time::Rational;
use crate::media::error::Result;
use crate::media::format::{MediaKind, PixelFormat, SampleFormat};
use crate::media::frame::DecodedFrame;

/// One compressed, container-framed unit of data.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    /// Index of the stream this packet belongs to
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub is_key: bool,
    pub data: Vec<u8>,
}

/// Native parameters of an audio stream
#[derive(Debug, Clone, PartialEq)]
pub struct AudioParameters {
    pub sample_rate: u32,
    pub channels: u16,
    pub channel_layout: u64,
    pub format: SampleFormat,
    /// Codec frame size in samples, 0 when variable
    pub frame_size: u32,
}

/// Native parameters of a video stream
#[derive(Debug, Clone, PartialEq)]
pub struct VideoParameters {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Codec parameters by stream kind
#[derive(Debug, Clone, PartialEq)]
pub enum CodecParameters {
    Audio(AudioParameters),
    Video(VideoParameters),
    Other,
}

/// Stream information
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    pub codec_name: String,
    pub time_base: Rational,
    /// Duration in time-base ticks, 0 when unknown
    pub duration: i64,
    pub bit_rate: i64,
    pub parameters: CodecParameters,
}

impl StreamInfo {
    pub fn kind(&self) -> MediaKind {
        match self.parameters {
            CodecParameters::Audio(_) => MediaKind::Audio,
            CodecParameters::Video(_) => MediaKind::Video,
            CodecParameters::Other => MediaKind::Other,
        }
    }

    pub fn audio(&self) -> Option<&AudioParameters> {
        match &self.parameters {
            CodecParameters::Audio(params) => Some(params),
            _ => None,
        }
    }

    pub fn video(&self) -> Option<&VideoParameters> {
        match &self.parameters {
            CodecParameters::Video(params) => Some(params),
            _ => None,
        }
    }
}

/// Opens containers. Implemented once per backend.
pub trait MediaSource: Send {
    /// Open and probe a container.
    /// Fails with `OpenFailed` when the file cannot be parsed.
    fn open(&self, path: &Path) -> Result<Box<dyn Container>>;

    /// Resampler/scaler engine for frames produced by this backend's decoders
    fn convert_backend(&self) -> Box<dyn ConvertBackend>;
}

/// An open media container.
pub trait Container: Send {
    /// Streams in container order
    fn streams(&self) -> &[StreamInfo];

    /// Container start offset in microseconds, if the container declares one
    fn start_time(&self) -> Option<i64>;

    /// Read the next packet of any stream. `EndOfStream` when exhausted.
    fn read_packet(&mut self) -> Result<Packet>;

    /// Seek to the nearest seek point at or before `timestamp` (microseconds).
    fn seek(&mut self, timestamp: i64) -> Result<()>;

    /// Find and open a decoder for stream `index`.
    /// `NoDecoderFound` if the codec is unsupported.
    fn open_decoder(&mut self, index: usize) -> Result<Box<dyn StreamDecoder>>;
}

/// Decoder for one stream (send packets, receive frames).
pub trait StreamDecoder: Send {
    fn send_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Signal end of input so delayed frames can be drained.
    fn send_eof(&mut self) -> Result<()>;

    /// Next decoded frame, `None` when more input is needed.
    /// Decoded frames carry their best-effort timestamp in the stream time-base.
    fn receive_frame(&mut self) -> Result<Option<DecodedFrame>>;

    /// Drop buffered state, e.g. after a seek.
    fn flush(&mut self);
}
