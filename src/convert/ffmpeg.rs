//! FFmpeg conversion engine (feature `ffmpeg`): libswresample for audio,
//! libswscale for video.

use std::mem;
use std::ptr;

use ffmpeg_next as ffmpeg;
use ffmpeg::ffi::{self, AVChannelLayout, AVSampleFormat, SwrContext};
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling;
use log::{debug, error};

use crate::convert::backend::{AudioResample, ConvertBackend, VideoScale};
use crate::convert::resample::AudioSpec;
use crate::convert::scale::{ScaleAlgorithm, VideoSpec};
use crate::media::error::{AdapterError, Result};
use crate::media::ffmpeg::{copy_video_frame, to_av_sample_format, to_ffmpeg_pixel};
use crate::media::frame::{AudioFrame, VideoFrame};

/// Conversion through libswresample/libswscale
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegConvert;

impl ConvertBackend for FfmpegConvert {
    fn resampler(&self, src: AudioSpec, dst: AudioSpec) -> Result<Box<dyn AudioResample>> {
        Ok(Box::new(SwrResampler::new(src, dst)?))
    }

    fn scaler(
        &self,
        src: VideoSpec,
        dst: VideoSpec,
        algorithm: ScaleAlgorithm,
    ) -> Result<Box<dyn VideoScale>> {
        Ok(Box::new(SwsScaler::new(src, dst, algorithm)?))
    }
}

fn sample_format(spec: AudioSpec) -> Result<AVSampleFormat> {
    to_av_sample_format(spec.format)
        .ok_or_else(|| AdapterError::AllocFailed(format!("no FFmpeg sample format for {:?}", spec)))
}

/// Resampler over a raw `SwrContext`. Channel layouts are FFmpeg's defaults
/// for the channel counts.
pub struct SwrResampler {
    context: *mut SwrContext,
    src: AudioSpec,
    dst: AudioSpec,
}

// SAFETY: the context is exclusively owned and only used through `&mut self`.
unsafe impl Send for SwrResampler {}

impl SwrResampler {
    pub fn new(src: AudioSpec, dst: AudioSpec) -> Result<Self> {
        if !src.is_complete() || !dst.is_complete() {
            return Err(AdapterError::AllocFailed(format!(
                "cannot resample {:?} to {:?}",
                src, dst
            )));
        }
        let src_format = sample_format(src)?;
        let dst_format = sample_format(dst)?;

        // SAFETY: swr_alloc returns an owned context or null
        let mut context = unsafe { ffi::swr_alloc() };
        if context.is_null() {
            return Err(AdapterError::AllocFailed("swr_alloc failed".to_string()));
        }

        // SAFETY: `context` is a valid, not yet initialized SwrContext. The
        // layouts are zero-initialized (empty) before av_channel_layout_default
        // fills them and are released after swr_init copied them.
        let ret = unsafe {
            let mut in_layout: AVChannelLayout = mem::zeroed();
            let mut out_layout: AVChannelLayout = mem::zeroed();
            ffi::av_channel_layout_default(&mut in_layout, src.channels as i32);
            ffi::av_channel_layout_default(&mut out_layout, dst.channels as i32);

            let options = context.cast();
            ffi::av_opt_set_chlayout(options, c"in_chlayout".as_ptr(), &in_layout, 0);
            ffi::av_opt_set_int(options, c"in_sample_rate".as_ptr(), src.sample_rate as i64, 0);
            ffi::av_opt_set_sample_fmt(options, c"in_sample_fmt".as_ptr(), src_format, 0);
            ffi::av_opt_set_chlayout(options, c"out_chlayout".as_ptr(), &out_layout, 0);
            ffi::av_opt_set_int(options, c"out_sample_rate".as_ptr(), dst.sample_rate as i64, 0);
            ffi::av_opt_set_sample_fmt(options, c"out_sample_fmt".as_ptr(), dst_format, 0);

            let ret = ffi::swr_init(context);
            ffi::av_channel_layout_uninit(&mut in_layout);
            ffi::av_channel_layout_uninit(&mut out_layout);
            ret
        };
        if ret < 0 {
            // SAFETY: frees the context allocated above and nulls the pointer
            unsafe { ffi::swr_free(&mut context) };
            return Err(AdapterError::AllocFailed(format!(
                "swr_init {:?} -> {:?} failed: {}",
                src,
                dst,
                ffmpeg::Error::from(ret)
            )));
        }

        debug!("swresample {:?} -> {:?}", src, dst);
        Ok(Self { context, src, dst })
    }

    /// Run swr_convert over `input` (null flushes) into a packed buffer sized
    /// for everything the context can emit.
    fn run(&mut self, input: *const *const u8, in_count: i32) -> Result<Vec<u8>> {
        // SAFETY: the context is initialized for the object's lifetime
        let capacity = unsafe { ffi::swr_get_out_samples(self.context, in_count) };
        if capacity < 0 {
            return Err(AdapterError::conversion(ffmpeg::Error::from(capacity).to_string()));
        }
        if capacity == 0 {
            return Ok(Vec::new());
        }

        let frame_bytes = self.dst.format.bytes_per_sample() * self.dst.channels as usize;
        let mut output = vec![0u8; capacity as usize * frame_bytes];
        let mut out_plane = output.as_mut_ptr();
        // SAFETY: the output is one packed plane of `capacity` sample frames;
        // `input` holds one pointer per source plane with `in_count` samples.
        let converted = unsafe {
            ffi::swr_convert(
                self.context,
                ptr::addr_of_mut!(out_plane).cast(),
                capacity,
                input.cast(),
                in_count,
            )
        };
        if converted < 0 {
            return Err(AdapterError::conversion(ffmpeg::Error::from(converted).to_string()));
        }
        output.truncate(converted as usize * frame_bytes);
        Ok(output)
    }
}

impl AudioResample for SwrResampler {
    fn src(&self) -> AudioSpec {
        self.src
    }

    fn convert(&mut self, frame: &AudioFrame) -> Result<Vec<u8>> {
        if AudioSpec::of(frame) != self.src {
            return Err(AdapterError::conversion(format!(
                "frame is {:?}, resampler expects {:?}",
                AudioSpec::of(frame),
                self.src
            )));
        }
        if frame.nb_samples == 0 {
            return Ok(Vec::new());
        }

        let format = self.src.format;
        let (plane_count, plane_bytes) = if format.is_planar() {
            (self.src.channels as usize, frame.nb_samples * format.bytes_per_sample())
        } else {
            (1, frame.nb_samples * format.bytes_per_sample() * self.src.channels as usize)
        };
        let planes = frame
            .planes
            .get(..plane_count)
            .filter(|planes| planes.iter().all(|p| p.len() >= plane_bytes))
            .ok_or_else(|| AdapterError::conversion("audio frame planes are truncated"))?;

        let inputs: Vec<*const u8> = planes.iter().map(|p| p.as_ptr()).collect();
        self.run(inputs.as_ptr(), frame.nb_samples as i32)
    }

    fn flush(&mut self) -> Result<Vec<u8>> {
        self.run(ptr::null(), 0)
    }

    fn reset(&mut self) {
        // swr_init on a configured context drops its buffered state
        // SAFETY: the context is valid and configured
        let ret = unsafe { ffi::swr_init(self.context) };
        if ret < 0 {
            error!("swresample reset failed: {}", ffmpeg::Error::from(ret));
        }
    }
}

impl Drop for SwrResampler {
    fn drop(&mut self) {
        // SAFETY: frees the owned context; swr_free nulls the pointer
        unsafe { ffi::swr_free(&mut self.context) };
    }
}

/// Scaler over a `ffmpeg::software::scaling::Context`
pub struct SwsScaler {
    context: scaling::Context,
    src: VideoSpec,
    src_pixel: Pixel,
    dst: VideoSpec,
}

// SAFETY: the scaling context is exclusively owned and only used through
// `&mut self`.
unsafe impl Send for SwsScaler {}

impl SwsScaler {
    pub fn new(src: VideoSpec, dst: VideoSpec, algorithm: ScaleAlgorithm) -> Result<Self> {
        let pixels = (to_ffmpeg_pixel(src.format), to_ffmpeg_pixel(dst.format));
        let (Some(src_pixel), Some(dst_pixel)) = pixels else {
            return Err(AdapterError::AllocFailed(format!("cannot scale {:?} to {:?}", src, dst)));
        };
        if !src.is_complete() || !dst.is_complete() {
            return Err(AdapterError::AllocFailed(format!("cannot scale {:?} to {:?}", src, dst)));
        }

        let flags = match algorithm {
            ScaleAlgorithm::Nearest => scaling::Flags::POINT,
            ScaleAlgorithm::Bilinear => scaling::Flags::BILINEAR,
        };
        let context = scaling::Context::get(
            src_pixel,
            src.width,
            src.height,
            dst_pixel,
            dst.width,
            dst.height,
            flags,
        )
        .map_err(|e| AdapterError::AllocFailed(format!("swscale {:?} -> {:?}: {}", src, dst, e)))?;

        debug!("swscale {:?} -> {:?} ({:?})", src, dst, algorithm);
        Ok(Self {
            context,
            src,
            src_pixel,
            dst,
        })
    }
}

impl VideoScale for SwsScaler {
    fn src(&self) -> VideoSpec {
        self.src
    }

    fn scale(&mut self, frame: &VideoFrame) -> Result<VideoFrame> {
        if VideoSpec::of(frame) != self.src {
            return Err(AdapterError::conversion(format!(
                "frame is {:?}, scaler expects {:?}",
                VideoSpec::of(frame),
                self.src
            )));
        }

        let (width, height) = (frame.width, frame.height);
        let mut input = ffmpeg::frame::Video::new(self.src_pixel, width, height);
        for plane in 0..frame.format.plane_count() {
            let row = frame.linesize[plane];
            let (_, rows) = frame.format.plane_size(plane, width, height);
            let stride = input.stride(plane);
            let data = input.data_mut(plane);
            for y in 0..rows {
                let src = frame.planes[plane]
                    .get(y * row..(y + 1) * row)
                    .ok_or_else(|| AdapterError::conversion(format!("video plane {plane} is truncated")))?;
                data[y * stride..y * stride + row].copy_from_slice(src);
            }
        }

        let mut scaled = ffmpeg::frame::Video::empty();
        self.context
            .run(&input, &mut scaled)
            .map_err(|e| AdapterError::conversion(e.to_string()))?;

        let mut output = copy_video_frame(&scaled, self.dst.format)
            .map_err(|e| AdapterError::conversion(e.to_string()))?;
        output.pts = frame.pts;
        output.time_base = frame.time_base;
        Ok(output)
    }
}
