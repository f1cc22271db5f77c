//! Conversion engines behind the `FrameConverter`.
//!
//! Every `MediaSource` hands out the `ConvertBackend` matching its decoders:
//! the FFmpeg source converts with libswresample/libswscale, the in-memory
//! source with the pure Rust `Resampler` and `Scaler`.

use crate::convert::resample::{AudioSpec, Resampler};
use crate::convert::scale::{ScaleAlgorithm, Scaler, VideoSpec};
use crate::media::error::Result;
use crate::media::frame::{AudioFrame, VideoFrame};

/// Stateful sample format, channel and rate conversion.
pub trait AudioResample: Send {
    /// Input description the resampler was built for
    fn src(&self) -> AudioSpec;

    /// Convert one frame into interleaved bytes of the packed target format.
    /// Output may lag the input by the filter delay.
    fn convert(&mut self, frame: &AudioFrame) -> Result<Vec<u8>>;

    /// Samples still held back by the filter once the input has ended.
    fn flush(&mut self) -> Result<Vec<u8>>;

    /// Drop filter history, e.g. after a seek.
    fn reset(&mut self);
}

/// Image scaling and pixel format conversion.
pub trait VideoScale: Send {
    /// Input description the scaler was built for
    fn src(&self) -> VideoSpec;

    /// Convert one frame. Timestamps are copied from the input.
    fn scale(&mut self, frame: &VideoFrame) -> Result<VideoFrame>;
}

/// Builds resamplers and scalers. Both fail with `AllocFailed` when a side is
/// incomplete or cannot be produced.
pub trait ConvertBackend: Send {
    fn resampler(&self, src: AudioSpec, dst: AudioSpec) -> Result<Box<dyn AudioResample>>;

    fn scaler(
        &self,
        src: VideoSpec,
        dst: VideoSpec,
        algorithm: ScaleAlgorithm,
    ) -> Result<Box<dyn VideoScale>>;
}

/// Pure Rust conversion. Linear interpolation without an anti-alias filter,
/// so it is only suited to the in-memory backend's test material.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareConvert;

impl ConvertBackend for SoftwareConvert {
    fn resampler(&self, src: AudioSpec, dst: AudioSpec) -> Result<Box<dyn AudioResample>> {
        Ok(Box::new(Resampler::new(src, dst)?))
    }

    fn scaler(
        &self,
        src: VideoSpec,
        dst: VideoSpec,
        algorithm: ScaleAlgorithm,
    ) -> Result<Box<dyn VideoScale>> {
        Ok(Box::new(Scaler::new(src, dst, algorithm)?))
    }
}

impl AudioResample for Resampler {
    fn src(&self) -> AudioSpec {
        Resampler::src(self)
    }

    fn convert(&mut self, frame: &AudioFrame) -> Result<Vec<u8>> {
        Resampler::convert(self, frame)
    }

    fn flush(&mut self) -> Result<Vec<u8>> {
        // Linear interpolation holds nothing back
        Ok(Vec::new())
    }

    fn reset(&mut self) {
        Resampler::reset(self)
    }
}

impl VideoScale for Scaler {
    fn src(&self) -> VideoSpec {
        Scaler::src(self)
    }

    fn scale(&mut self, frame: &VideoFrame) -> Result<VideoFrame> {
        Scaler::scale(self, frame)
    }
}
