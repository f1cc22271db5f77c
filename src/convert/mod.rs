//! Frame converter: turns decoded frames into the caller's output format.
//!
//! Audio is resampled into an internal FIFO and handed out in fixed-size
//! chunks; video is scaled synchronously, one frame in, one frame out.
//!
//! Both stages initialize lazily. `init_audio`/`init_video` may be called
//! before the source format is known, in which case only the target is stored
//! and the resampler/scaler is built from the first frame. If a frame arrives
//! whose format differs from the configured source, the stage is rebuilt for
//! it.
//!
//! The actual resampling and scaling is done by the `ConvertBackend` the
//! converter is built with.

pub mod backend;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod fifo;
pub mod resample;
pub mod scale;

use log::{debug, warn};

use crate::core::time::Rational;
use crate::media::error::{AdapterError, Result};
use crate::media::format::PixelFormat;
use crate::media::frame::{AudioFrame, VideoFrame};

pub use backend::{AudioResample, ConvertBackend, SoftwareConvert, VideoScale};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegConvert;
pub use fifo::AudioFifo;
pub use resample::{AudioSpec, Resampler};
pub use scale::{ScaleAlgorithm, Scaler, VideoSpec};

/// Result of asking the converter for an audio chunk.
#[derive(Debug)]
pub enum AudioOutput {
    Ready(AudioFrame),
    /// Less than one chunk buffered; decode and feed more input.
    NeedMoreData,
}

struct AudioStage {
    src: AudioSpec,
    dst: AudioSpec,
    frame_size: usize,
    resampler: Option<Box<dyn AudioResample>>,
    fifo: AudioFifo,
}

struct VideoStage {
    src: VideoSpec,
    dst: VideoSpec,
    scaler: Option<Box<dyn VideoScale>>,
}

/// Stateful resampling/rescaling engine
pub struct FrameConverter {
    backend: Box<dyn ConvertBackend>,
    audio: Option<AudioStage>,
    video: Option<VideoStage>,
    algorithm: ScaleAlgorithm,
}

impl FrameConverter {
    pub fn new(backend: Box<dyn ConvertBackend>, algorithm: ScaleAlgorithm) -> Self {
        Self {
            backend,
            audio: None,
            video: None,
            algorithm,
        }
    }

    /// (Re)configure the audio stage.
    ///
    /// Buffered samples survive when the target format, channel count and rate
    /// are unchanged (e.g. only `frame_size` changed); otherwise they are
    /// dropped. Fails with `AllocFailed` if the target cannot be produced.
    pub fn init_audio(&mut self, src: AudioSpec, dst: AudioSpec, frame_size: usize) -> Result<()> {
        if !dst.is_complete() || frame_size == 0 {
            return Err(AdapterError::AllocFailed(format!(
                "cannot build audio stage for {:?} with frame size {}",
                dst, frame_size
            )));
        }
        let dst = AudioSpec::new(dst.sample_rate, dst.channels, dst.format);

        let mut previous = self.audio.take();

        // Same target: keep the resampler (and its history) if it still fits
        let reusable = previous
            .as_mut()
            .filter(|stage| stage.dst == dst)
            .and_then(|stage| stage.resampler.take())
            .filter(|resampler| !src.is_complete() || resampler.src() == src);
        let resampler = match reusable {
            Some(resampler) => Some(resampler),
            None if src.is_complete() => Some(self.backend.resampler(src, packed(dst))?),
            None => None,
        };
        let src = match &resampler {
            Some(resampler) => resampler.src(),
            None => src,
        };

        let fifo = match previous {
            Some(stage) if stage.dst == dst => stage.fifo,
            Some(stage) => {
                if !stage.fifo.is_empty() {
                    warn!(
                        "audio target changed, dropping {} buffered samples",
                        stage.fifo.size()
                    );
                }
                AudioFifo::new(dst.format, dst.channels)
            }
            None => AudioFifo::new(dst.format, dst.channels),
        };

        debug!("init_audio {:?} -> {:?}, frame_size={}", src, dst, frame_size);
        self.audio = Some(AudioStage {
            src,
            dst,
            frame_size,
            resampler,
            fifo,
        });
        Ok(())
    }

    /// (Re)configure the video stage.
    pub fn init_video(
        &mut self,
        src_width: u32,
        src_height: u32,
        src_format: PixelFormat,
        dst_width: u32,
        dst_height: u32,
        dst_format: PixelFormat,
    ) -> Result<()> {
        let src = VideoSpec::new(src_width, src_height, src_format);
        let dst = VideoSpec::new(dst_width, dst_height, dst_format);
        if !dst.is_complete() {
            return Err(AdapterError::AllocFailed(format!(
                "cannot build video stage for {:?}",
                dst
            )));
        }

        let scaler = if src.is_complete() {
            Some(self.backend.scaler(src, dst, self.algorithm)?)
        } else {
            None
        };

        debug!("init_video {:?} -> {:?}", src, dst);
        self.video = Some(VideoStage { src, dst, scaler });
        Ok(())
    }

    /// Resample `frame` into the target format and append it to the FIFO.
    pub fn input_audio(&mut self, frame: &AudioFrame) -> Result<()> {
        let stage = self.audio.as_mut().ok_or(AdapterError::NoContext)?;

        let spec = AudioSpec::of(frame);
        let rebuild = match &stage.resampler {
            Some(resampler) => resampler.src() != spec,
            None => true,
        };
        if rebuild {
            if stage.src != spec {
                debug!("audio input is {:?}, configured for {:?}; rebuilding", spec, stage.src);
            }
            let resampler = self
                .backend
                .resampler(spec, packed(stage.dst))
                .map_err(|e| AdapterError::conversion(e.to_string()))?;
            stage.src = spec;
            stage.resampler = Some(resampler);
        }

        let resampler = stage
            .resampler
            .as_mut()
            .ok_or(AdapterError::NoContext)?;
        let data = resampler.convert(frame)?;
        stage.fifo.write(&data);
        Ok(())
    }

    /// Move samples the resampler still holds into the FIFO. Call once the
    /// input has ended.
    pub fn flush_audio(&mut self) -> Result<()> {
        let stage = self.audio.as_mut().ok_or(AdapterError::NoContext)?;
        if let Some(resampler) = stage.resampler.as_mut() {
            let data = resampler.flush()?;
            stage.fifo.write(&data);
        }
        Ok(())
    }

    /// Pop one chunk of `frame_size` samples.
    ///
    /// With less than a chunk buffered: `eof` returns the remainder as a final
    /// short chunk, otherwise `NeedMoreData`. `eof` with an empty FIFO is
    /// `EndOfStream`.
    pub fn output_audio(&mut self, eof: bool) -> Result<AudioOutput> {
        let stage = self.audio.as_mut().ok_or(AdapterError::NoContext)?;

        let buffered = stage.fifo.size();
        let nb_samples = if buffered >= stage.frame_size {
            stage.frame_size
        } else if !eof {
            return Ok(AudioOutput::NeedMoreData);
        } else if buffered == 0 {
            return Err(AdapterError::EndOfStream);
        } else {
            buffered
        };

        let data = stage.fifo.read(nb_samples);
        let dst = stage.dst;
        let planes = if dst.format.is_planar() {
            deinterleave(&data, dst.format.bytes_per_sample(), dst.channels as usize)
        } else {
            vec![data]
        };

        Ok(AudioOutput::Ready(AudioFrame {
            planes,
            format: dst.format,
            channels: dst.channels,
            sample_rate: dst.sample_rate,
            nb_samples,
            pts: None,
            time_base: Rational::MICROSECONDS,
        }))
    }

    /// Scale/convert one frame. Never buffers.
    pub fn convert_video(&mut self, frame: &VideoFrame) -> Result<VideoFrame> {
        let algorithm = self.algorithm;
        let stage = self.video.as_mut().ok_or(AdapterError::NoContext)?;

        let spec = VideoSpec::of(frame);
        let rebuild = match &stage.scaler {
            Some(scaler) => scaler.src() != spec,
            None => true,
        };
        if rebuild {
            if stage.src != spec {
                debug!("video input is {:?}, configured for {:?}; rebuilding", spec, stage.src);
            }
            let scaler = self
                .backend
                .scaler(spec, stage.dst, algorithm)
                .map_err(|e| AdapterError::conversion(e.to_string()))?;
            stage.src = spec;
            stage.scaler = Some(scaler);
        }

        let scaler = stage.scaler.as_mut().ok_or(AdapterError::NoContext)?;
        scaler.scale(frame)
    }

    /// Buffered samples per channel
    pub fn audio_fifo_size(&self) -> usize {
        self.audio.as_ref().map_or(0, |stage| stage.fifo.size())
    }

    /// Size in bytes of one full output chunk
    pub fn output_audio_buffer_size(&self) -> usize {
        self.audio.as_ref().map_or(0, |stage| {
            stage.frame_size * stage.dst.channels as usize * stage.dst.format.bytes_per_sample()
        })
    }

    /// Drop buffered audio and resampler history (after a seek).
    pub fn reset_audio(&mut self) {
        if let Some(stage) = self.audio.as_mut() {
            stage.fifo.clear();
            if let Some(resampler) = stage.resampler.as_mut() {
                resampler.reset();
            }
        }
    }
}

fn packed(spec: AudioSpec) -> AudioSpec {
    AudioSpec::new(spec.sample_rate, spec.channels, spec.format.packed())
}

fn deinterleave(data: &[u8], bps: usize, channels: usize) -> Vec<Vec<u8>> {
    let mut planes = vec![Vec::with_capacity(data.len() / channels.max(1)); channels];
    for frame in data.chunks_exact(bps * channels) {
        for (ch, plane) in planes.iter_mut().enumerate() {
            plane.extend_from_slice(&frame[ch * bps..(ch + 1) * bps]);
        }
    }
    planes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::format::SampleFormat;

    fn s16_frame(samples: usize, channels: u16, sample_rate: u32) -> AudioFrame {
        let data: Vec<u8> = (0..samples * channels as usize)
            .flat_map(|i| (i as i16).to_le_bytes())
            .collect();
        AudioFrame::packed(data, SampleFormat::S16, channels, sample_rate, Some(0), Rational::new(1, sample_rate as i32))
    }

    fn converter(algorithm: ScaleAlgorithm) -> FrameConverter {
        FrameConverter::new(Box::new(SoftwareConvert), algorithm)
    }

    fn mono_s16(sample_rate: u32) -> AudioSpec {
        AudioSpec::new(sample_rate, 1, SampleFormat::S16)
    }

    #[test]
    fn test_chunking_and_drain() {
        let mut converter = converter(ScaleAlgorithm::Bilinear);
        converter.init_audio(mono_s16(8000), mono_s16(8000), 100).unwrap();
        assert_eq!(converter.output_audio_buffer_size(), 200);

        converter.input_audio(&s16_frame(250, 1, 8000)).unwrap();
        assert_eq!(converter.audio_fifo_size(), 250);

        for _ in 0..2 {
            match converter.output_audio(false).unwrap() {
                AudioOutput::Ready(chunk) => assert_eq!(chunk.nb_samples, 100),
                AudioOutput::NeedMoreData => panic!("expected a chunk"),
            }
        }
        assert!(matches!(converter.output_audio(false).unwrap(), AudioOutput::NeedMoreData));

        match converter.output_audio(true).unwrap() {
            AudioOutput::Ready(chunk) => {
                assert_eq!(chunk.nb_samples, 50);
                assert_eq!(chunk.planes[0].len(), 100);
            }
            AudioOutput::NeedMoreData => panic!("expected the final short chunk"),
        }
        assert!(converter.output_audio(true).unwrap_err().is_eof());
    }

    #[test]
    fn test_fifo_preserves_order() {
        let mut converter = converter(ScaleAlgorithm::Bilinear);
        converter.init_audio(mono_s16(8000), mono_s16(8000), 3).unwrap();
        converter.input_audio(&s16_frame(2, 1, 8000)).unwrap();
        converter.input_audio(&s16_frame(2, 1, 8000)).unwrap();
        match converter.output_audio(false).unwrap() {
            AudioOutput::Ready(chunk) => assert_eq!(chunk.planes[0], vec![0, 0, 1, 0, 0, 0]),
            AudioOutput::NeedMoreData => panic!("expected a chunk"),
        }
    }

    #[test]
    fn test_lazy_init_from_first_frame() {
        let mut converter = converter(ScaleAlgorithm::Bilinear);
        let unknown = AudioSpec::new(0, 0, SampleFormat::None);
        converter.init_audio(unknown, mono_s16(16_000), 1024).unwrap();

        converter.input_audio(&s16_frame(4800, 2, 48_000)).unwrap();
        assert_eq!(converter.audio_fifo_size(), 1600);
    }

    #[test]
    fn test_invalid_target_fails() {
        let mut converter = converter(ScaleAlgorithm::Bilinear);
        let result = converter.init_audio(mono_s16(8000), AudioSpec::new(8000, 0, SampleFormat::S16), 1024);
        assert!(matches!(result, Err(AdapterError::AllocFailed(_))));
        let result = converter.init_audio(mono_s16(8000), mono_s16(8000), 0);
        assert!(matches!(result, Err(AdapterError::AllocFailed(_))));
    }

    #[test]
    fn test_uninitialized_stage_has_no_context() {
        let mut converter = converter(ScaleAlgorithm::Bilinear);
        assert!(matches!(converter.output_audio(true), Err(AdapterError::NoContext)));
        assert!(matches!(
            converter.convert_video(&VideoFrame::alloc(16, 16, PixelFormat::Gray8)),
            Err(AdapterError::NoContext)
        ));
        assert_eq!(converter.audio_fifo_size(), 0);
    }

    #[test]
    fn test_reinit_keeps_fifo_when_target_unchanged() {
        let mut converter = converter(ScaleAlgorithm::Bilinear);
        converter.init_audio(mono_s16(8000), mono_s16(8000), 100).unwrap();
        converter.input_audio(&s16_frame(50, 1, 8000)).unwrap();

        converter.init_audio(mono_s16(8000), mono_s16(8000), 25).unwrap();
        assert_eq!(converter.audio_fifo_size(), 50);

        converter.init_audio(mono_s16(8000), AudioSpec::new(8000, 2, SampleFormat::S16), 25).unwrap();
        assert_eq!(converter.audio_fifo_size(), 0);
    }

    #[test]
    fn test_planar_output() {
        let mut converter = converter(ScaleAlgorithm::Bilinear);
        let dst = AudioSpec::new(8000, 2, SampleFormat::S16p);
        converter.init_audio(AudioSpec::new(8000, 2, SampleFormat::S16), dst, 2).unwrap();
        converter.input_audio(&s16_frame(2, 2, 8000)).unwrap();

        match converter.output_audio(false).unwrap() {
            AudioOutput::Ready(chunk) => {
                assert_eq!(chunk.format, SampleFormat::S16p);
                assert_eq!(chunk.planes.len(), 2);
                // Interleaved input 0,1,2,3 -> left 0,2 / right 1,3
                assert_eq!(chunk.planes[0], vec![0, 0, 2, 0]);
                assert_eq!(chunk.planes[1], vec![1, 0, 3, 0]);
            }
            AudioOutput::NeedMoreData => panic!("expected a chunk"),
        }
    }

    /// Holds back the last `delay` bytes of every conversion until flushed.
    struct DelayedResample {
        src: AudioSpec,
        delay: usize,
        held: Vec<u8>,
    }

    impl AudioResample for DelayedResample {
        fn src(&self) -> AudioSpec {
            self.src
        }

        fn convert(&mut self, frame: &AudioFrame) -> Result<Vec<u8>> {
            self.held.extend_from_slice(&frame.planes[0]);
            let ready = self.held.len().saturating_sub(self.delay);
            Ok(self.held.drain(..ready).collect())
        }

        fn flush(&mut self) -> Result<Vec<u8>> {
            Ok(std::mem::take(&mut self.held))
        }

        fn reset(&mut self) {
            self.held.clear();
        }
    }

    struct DelayedBackend;

    impl ConvertBackend for DelayedBackend {
        fn resampler(&self, src: AudioSpec, _dst: AudioSpec) -> Result<Box<dyn AudioResample>> {
            Ok(Box::new(DelayedResample {
                src,
                delay: 20,
                held: Vec::new(),
            }))
        }

        fn scaler(
            &self,
            src: VideoSpec,
            dst: VideoSpec,
            algorithm: ScaleAlgorithm,
        ) -> Result<Box<dyn VideoScale>> {
            SoftwareConvert.scaler(src, dst, algorithm)
        }
    }

    #[test]
    fn test_flush_audio_moves_resampler_tail() {
        let mut converter = FrameConverter::new(Box::new(DelayedBackend), ScaleAlgorithm::Bilinear);
        converter.init_audio(mono_s16(8000), mono_s16(8000), 64).unwrap();
        converter.input_audio(&s16_frame(100, 1, 8000)).unwrap();
        assert_eq!(converter.audio_fifo_size(), 90);

        converter.flush_audio().unwrap();
        assert_eq!(converter.audio_fifo_size(), 100);

        let mut total = 0;
        while let Ok(AudioOutput::Ready(chunk)) = converter.output_audio(true) {
            total += chunk.nb_samples;
        }
        assert_eq!(total, 100);
    }

    #[test]
    fn test_flush_without_audio_stage() {
        let mut converter = converter(ScaleAlgorithm::Bilinear);
        assert!(matches!(converter.flush_audio(), Err(AdapterError::NoContext)));
    }

    #[test]
    fn test_reset_audio_clears_fifo() {
        let mut converter = converter(ScaleAlgorithm::Bilinear);
        converter.init_audio(mono_s16(8000), mono_s16(8000), 100).unwrap();
        converter.input_audio(&s16_frame(50, 1, 8000)).unwrap();
        converter.reset_audio();
        assert_eq!(converter.audio_fifo_size(), 0);
    }

    #[test]
    fn test_convert_video_rebuilds_on_geometry_change() {
        let mut converter = converter(ScaleAlgorithm::Nearest);
        converter
            .init_video(32, 32, PixelFormat::Gray8, 16, 16, PixelFormat::Rgb24)
            .unwrap();

        let out = converter.convert_video(&VideoFrame::alloc(32, 32, PixelFormat::Gray8)).unwrap();
        assert_eq!((out.width, out.height, out.format), (16, 16, PixelFormat::Rgb24));

        let out = converter.convert_video(&VideoFrame::alloc(64, 48, PixelFormat::Gray8)).unwrap();
        assert_eq!((out.width, out.height), (16, 16));
    }
}
