//! Decoded and converted frame types.
//!
//! Decoded frames carry timestamps in their stream's time-base; frames handed
//! back by the pipeline use `Rational::MICROSECONDS`.

use crate::core::time::{self, Rational, Time};
use crate::media::format::{PixelFormat, SampleFormat};

/// Audio frame.
/// Packed formats have a single plane of interleaved samples (L, R, L, R, ...);
/// planar formats have one plane per channel.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub planes: Vec<Vec<u8>>,
    pub format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
    /// Samples per channel
    pub nb_samples: usize,
    /// Best-effort presentation timestamp
    pub pts: Option<i64>,
    pub time_base: Rational,
}

impl AudioFrame {
    /// Frame over a single interleaved plane.
    pub fn packed(
        data: Vec<u8>,
        format: SampleFormat,
        channels: u16,
        sample_rate: u32,
        pts: Option<i64>,
        time_base: Rational,
    ) -> Self {
        let frame_bytes = format.bytes_per_sample() * channels as usize;
        let nb_samples = if frame_bytes == 0 { 0 } else { data.len() / frame_bytes };
        Self {
            planes: vec![data],
            format,
            channels,
            sample_rate,
            nb_samples,
            pts,
            time_base,
        }
    }

    /// Presentation time in microseconds, if the frame has a timestamp.
    pub fn timestamp(&self) -> Option<Time> {
        self.pts.map(|pts| time::ticks_to_micros(pts, self.time_base))
    }

    /// Duration based on sample count and rate, in microseconds.
    pub fn duration(&self) -> Time {
        time::samples_to_micros(self.nb_samples as i64, self.sample_rate as i64)
    }

    /// Total payload size in bytes across all planes.
    pub fn byte_len(&self) -> usize {
        self.planes.iter().map(Vec::len).sum()
    }
}

/// Video frame. Plane layout follows `format` (see `PixelFormat::plane_count`).
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub planes: Vec<Vec<u8>>,
    /// Bytes per row, one entry per plane
    pub linesize: Vec<usize>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Best-effort presentation timestamp
    pub pts: Option<i64>,
    pub time_base: Rational,
}

impl VideoFrame {
    /// Allocate a zeroed, tightly packed frame.
    pub fn alloc(width: u32, height: u32, format: PixelFormat) -> Self {
        let mut planes = Vec::with_capacity(format.plane_count());
        let mut linesize = Vec::with_capacity(format.plane_count());
        for plane in 0..format.plane_count() {
            let (_, rows) = format.plane_size(plane, width, height);
            let stride = format.linesize(plane, width);
            planes.push(vec![0u8; stride * rows]);
            linesize.push(stride);
        }
        Self {
            planes,
            linesize,
            width,
            height,
            format,
            pts: None,
            time_base: Rational::MICROSECONDS,
        }
    }

    /// Presentation time in microseconds, if the frame has a timestamp.
    pub fn timestamp(&self) -> Option<Time> {
        self.pts.map(|pts| time::ticks_to_micros(pts, self.time_base))
    }
}

/// A frame produced by a stream decoder.
#[derive(Debug, Clone)]
pub enum DecodedFrame {
    Audio(AudioFrame),
    Video(VideoFrame),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_audio_frame() {
        let frame = AudioFrame::packed(
            vec![0u8; 1024 * 2 * 2],
            SampleFormat::S16,
            2,
            48_000,
            Some(48_000),
            Rational::new(1, 48_000),
        );
        assert_eq!(frame.nb_samples, 1024);
        assert_eq!(frame.timestamp(), Some(1_000_000));
        assert_eq!(frame.duration(), 21_333);
        assert_eq!(frame.byte_len(), 4096);
    }

    #[test]
    fn test_video_alloc() {
        let frame = VideoFrame::alloc(32, 18, PixelFormat::Yuv420p);
        assert_eq!(frame.planes.len(), 3);
        assert_eq!(frame.linesize, vec![32, 16, 16]);
        assert_eq!(frame.planes[0].len(), 32 * 18);
        assert_eq!(frame.planes[1].len(), 16 * 9);
        assert_eq!(frame.timestamp(), None);
    }
}
