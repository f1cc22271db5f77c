//! Decoder pipeline: pull-based audio/video decoding into the caller's output
//! format.
//!
//! ```text
//! get_audio_frame ─► FIFO has a chunk? ─yes─► chunk
//!                          │ no
//!                          ▼
//!                    StreamReader::next_frame ─► FrameConverter::input_audio ─┐
//!                          ▲                                                  │
//!                          └──────────────────────────────────────────────────┘
//!
//! get_video_frame ─► StreamReader::next_frame ─► FrameConverter::convert_video ─► frame
//! ```
//!
//! The pipeline is `Closed` until `start()` succeeds and `Closed` again after
//! `end()`. While running it tracks end of container separately from the audio
//! FIFO, so the audio tail still drains after the container is exhausted.

use std::path::Path;

use log::{debug, error, info, warn};

use crate::convert::{AudioOutput, AudioSpec, FrameConverter};
use crate::core::time::{self, Rational, Time};
use crate::decode::config::{DecoderConfig, OutputAudioParams, OutputVideoParams};
use crate::decode::reader::StreamReader;
use crate::media::backend::{MediaSource, StreamInfo};
use crate::media::error::{AdapterError, Result};
use crate::media::format::{MediaKind, PixelFormat, SampleFormat};
use crate::media::frame::{AudioFrame, DecodedFrame, VideoFrame};

/// Pull-based decoder for one container at a time
pub struct DecoderPipeline {
    source: Box<dyn MediaSource>,
    config: DecoderConfig,
    reader: Option<StreamReader>,
    converter: Option<FrameConverter>,
    started: bool,
    /// Container exhausted (or a video pull failed)
    file_eof: bool,
    audio_timestamp: Time,
    audio_seeded: bool,
    video_timestamp: Time,
}

impl DecoderPipeline {
    pub fn new<S: MediaSource + 'static>(source: S, config: DecoderConfig) -> Self {
        Self {
            source: Box::new(source),
            config,
            reader: None,
            converter: None,
            started: false,
            file_eof: true,
            audio_timestamp: 0,
            audio_seeded: false,
            video_timestamp: 0,
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Open `path` and get ready to decode.
    ///
    /// Output parameters are validated before anything is opened. Any failure
    /// afterwards tears the pipeline down again before returning.
    pub fn start<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        debug!("start {}", path.display());

        if self.reader.is_some() || self.started {
            self.end();
        }

        self.config.validate()?;

        if let Err(e) = self.open(path) {
            error!("failed to start {}: {}", path.display(), e);
            self.end();
            return Err(e);
        }

        self.file_eof = false;
        self.started = true;
        self.audio_timestamp = 0;
        self.audio_seeded = false;
        self.video_timestamp = 0;
        info!("started {}", path.display());
        Ok(())
    }

    fn open(&mut self, path: &Path) -> Result<()> {
        let mut reader = StreamReader::open(self.source.as_ref(), path)?;
        reader.open_decoders()?;
        let has_audio = reader.audio_stream().is_some();
        // Checked even when the video decoder failed to open
        let has_video = reader.video_stream().is_some();
        self.reader = Some(reader);
        self.converter = Some(FrameConverter::new(
            self.source.convert_backend(),
            self.config.scale_algorithm,
        ));

        if has_audio {
            self.apply_audio()?;
        }
        if has_video {
            self.apply_video()?;
        }
        Ok(())
    }

    /// Close the container and release the converter. Safe to call repeatedly.
    pub fn end(&mut self) {
        if let Some(reader) = self.reader.take() {
            debug!("end {}", reader.path().display());
        }
        self.converter = None;
        self.file_eof = true;
        self.started = false;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// True once the container is exhausted and no buffered audio remains.
    pub fn is_eof(&self) -> bool {
        self.file_eof && self.converter.as_ref().map_or(0, FrameConverter::audio_fifo_size) == 0
    }

    /// Next audio chunk of `frame_size` samples in the output format.
    ///
    /// The last chunk before `EndOfStream` may be shorter. The chunk's pts is
    /// the audio timestamp in microseconds.
    pub fn get_audio_frame(&mut self) -> Result<AudioFrame> {
        let can_decode = self
            .reader
            .as_ref()
            .is_some_and(|reader| reader.can_decode(MediaKind::Audio));
        if !can_decode || self.converter.is_none() {
            return Err(AdapterError::NoContext);
        }
        if self.is_eof() {
            return Err(AdapterError::EndOfStream);
        }

        let params = self.config.audio;
        let (Some(reader), Some(converter)) = (self.reader.as_mut(), self.converter.as_mut()) else {
            return Err(AdapterError::NoContext);
        };
        let time_base = reader
            .audio_stream()
            .map(|stream| stream.time_base())
            .unwrap_or_default();

        loop {
            match converter.output_audio(self.file_eof)? {
                AudioOutput::Ready(mut chunk) => {
                    chunk.pts = Some(self.audio_timestamp);
                    chunk.time_base = Rational::MICROSECONDS;
                    self.audio_timestamp +=
                        time::samples_to_micros(params.frame_size as i64, params.sample_rate as i64);
                    return Ok(chunk);
                }
                AudioOutput::NeedMoreData => {}
            }

            match reader.next_frame(MediaKind::Audio) {
                Ok(DecodedFrame::Audio(frame)) => {
                    converter.input_audio(&frame)?;
                    if !self.audio_seeded {
                        self.audio_timestamp = frame
                            .pts
                            .map_or(0, |pts| time::ticks_to_micros(pts, time_base));
                        self.audio_seeded = true;
                        debug!("audio timestamp starts at {}us", self.audio_timestamp);
                    }
                }
                Ok(DecodedFrame::Video(_)) => {}
                Err(e) if e.is_eof() => {
                    debug!("audio: container exhausted, draining");
                    if let Err(e) = converter.flush_audio() {
                        warn!("audio: dropping resampler tail: {}", e);
                    }
                    self.file_eof = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Next video frame in the output format.
    ///
    /// Unset (non-positive) output sizes and an unset pixel format default to
    /// the stream's own. Any failure, including the end of the stream, marks
    /// the pipeline as at end of file.
    pub fn get_video_frame(&mut self) -> Result<VideoFrame> {
        if self.is_eof() {
            return Err(AdapterError::EndOfStream);
        }
        let native = match self.reader.as_ref().and_then(|reader| reader.video_stream()) {
            Some(stream) if stream.has_decoder() && self.converter.is_some() => {
                stream.info.video().cloned()
            }
            _ => return Err(AdapterError::NoContext),
        };

        if let Some(native) = native {
            let mut params = self.config.video;
            if params.width <= 0 || params.height <= 0 {
                params.width = native.width as i32;
                params.height = native.height as i32;
            }
            if !params.format.is_valid() {
                params.format = native.format;
            }
            if params != self.config.video {
                debug!("video output defaults to {:?}", params);
                self.config.video = params;
                self.init_video_stage()?;
            }
        }

        match self.next_video_frame() {
            Ok(frame) => Ok(frame),
            Err(e) => {
                self.file_eof = true;
                Err(e)
            }
        }
    }

    fn next_video_frame(&mut self) -> Result<VideoFrame> {
        let (Some(reader), Some(converter)) = (self.reader.as_mut(), self.converter.as_mut()) else {
            return Err(AdapterError::NoContext);
        };
        let time_base = reader
            .video_stream()
            .map(|stream| stream.time_base())
            .unwrap_or_default();

        loop {
            let frame = match reader.next_frame(MediaKind::Video)? {
                DecodedFrame::Video(frame) => frame,
                DecodedFrame::Audio(_) => continue,
            };
            if frame.width == 0 || frame.height == 0 {
                debug!("video: skipping empty frame");
                continue;
            }

            let mut output = converter.convert_video(&frame)?;
            if let Some(pts) = frame.pts {
                self.video_timestamp = time::ticks_to_micros(pts, time_base);
            }
            output.pts = Some(self.video_timestamp);
            output.time_base = Rational::MICROSECONDS;
            return Ok(output);
        }
    }

    /// Seek to `timestamp` microseconds.
    ///
    /// Resets the audio timestamp and drops buffered audio. The video timestamp
    /// keeps its value until the next video frame.
    pub fn seek_to(&mut self, timestamp: Time) -> Result<()> {
        let reader = self.reader.as_mut().ok_or(AdapterError::NoContext)?;
        if let Err(e) = reader.seek(timestamp) {
            error!("seek to {}us failed: {}", timestamp, e);
            return Err(e);
        }

        if let Some(converter) = self.converter.as_mut() {
            converter.reset_audio();
        }
        self.audio_timestamp = 0;
        self.audio_seeded = false;
        self.file_eof = false;
        Ok(())
    }

    // Setters. The lenient mode stores the new values even if they turn out
    // to be invalid; strict mode rejects them untouched.

    pub fn set_output_video_resolution(&mut self, width: i32, height: i32) -> Result<()> {
        let params = OutputVideoParams {
            width,
            height,
            ..self.config.video
        };
        self.update_video(params)
    }

    pub fn set_output_video_format(&mut self, format: PixelFormat) -> Result<()> {
        let params = OutputVideoParams {
            format,
            ..self.config.video
        };
        self.update_video(params)
    }

    pub fn set_output_video_parameters(
        &mut self,
        width: i32,
        height: i32,
        format: PixelFormat,
    ) -> Result<()> {
        self.update_video(OutputVideoParams {
            width,
            height,
            format,
        })
    }

    pub fn set_output_audio_channels(&mut self, channels: i32) -> Result<()> {
        let params = OutputAudioParams {
            channels,
            ..self.config.audio
        };
        self.update_audio(params)
    }

    pub fn set_output_audio_frame_size(&mut self, frame_size: i32) -> Result<()> {
        let params = OutputAudioParams {
            frame_size,
            ..self.config.audio
        };
        self.update_audio(params)
    }

    pub fn set_output_audio_sample_rate(&mut self, sample_rate: i32) -> Result<()> {
        let params = OutputAudioParams {
            sample_rate,
            ..self.config.audio
        };
        self.update_audio(params)
    }

    pub fn set_output_audio_format(&mut self, format: SampleFormat) -> Result<()> {
        let params = OutputAudioParams {
            format,
            ..self.config.audio
        };
        self.update_audio(params)
    }

    pub fn set_output_audio_parameters(
        &mut self,
        channels: i32,
        frame_size: i32,
        sample_rate: i32,
        format: SampleFormat,
    ) -> Result<()> {
        self.update_audio(OutputAudioParams {
            channels,
            frame_size,
            sample_rate,
            format,
        })
    }

    fn update_audio(&mut self, params: OutputAudioParams) -> Result<()> {
        if self.config.strict_setters {
            params.validate().inspect_err(|e| error!("rejected audio output {:?}: {}", params, e))?;
        }
        self.config.audio = params;
        self.apply_audio()
            .inspect_err(|e| error!("audio output {:?}: {}", params, e))
    }

    fn update_video(&mut self, params: OutputVideoParams) -> Result<()> {
        if self.config.strict_setters {
            params.validate().inspect_err(|e| error!("rejected video output {:?}: {}", params, e))?;
        }
        self.config.video = params;
        self.apply_video()
            .inspect_err(|e| error!("video output {:?}: {}", params, e))
    }

    /// Validate the stored audio output and re-init the converter's audio
    /// stage if there is a decodable audio stream.
    fn apply_audio(&mut self) -> Result<()> {
        let params = self.config.audio;
        params.validate()?;

        let (Some(reader), Some(converter)) = (self.reader.as_ref(), self.converter.as_mut()) else {
            return Ok(());
        };
        let Some(stream) = reader.audio_stream().filter(|s| s.has_decoder()) else {
            return Ok(());
        };

        let src = stream
            .info
            .audio()
            .map(|a| AudioSpec::new(a.sample_rate, a.channels, a.format))
            .unwrap_or_else(|| AudioSpec::new(0, 0, SampleFormat::None));
        let dst = AudioSpec::new(params.sample_rate as u32, params.channels as u16, params.format);
        converter.init_audio(src, dst, params.frame_size as usize)
    }

    /// Validate the stored video output and re-init the converter's video
    /// stage if there is a decodable video stream.
    fn apply_video(&mut self) -> Result<()> {
        self.config.video.validate()?;
        self.init_video_stage()
    }

    fn init_video_stage(&mut self) -> Result<()> {
        let params = self.config.video;
        let (Some(reader), Some(converter)) = (self.reader.as_ref(), self.converter.as_mut()) else {
            return Ok(());
        };
        let Some(stream) = reader.video_stream().filter(|s| s.has_decoder()) else {
            return Ok(());
        };

        let (src_width, src_height, src_format) = stream
            .info
            .video()
            .map_or((0, 0, PixelFormat::None), |v| (v.width, v.height, v.format));
        converter.init_video(
            src_width,
            src_height,
            src_format,
            params.width.max(0) as u32,
            params.height.max(0) as u32,
            params.format,
        )
    }

    // Queries

    pub fn audio_stream_info(&self) -> Option<&StreamInfo> {
        self.reader
            .as_ref()
            .and_then(|reader| reader.audio_stream())
            .map(|stream| &stream.info)
    }

    pub fn video_stream_info(&self) -> Option<&StreamInfo> {
        self.reader
            .as_ref()
            .and_then(|reader| reader.video_stream())
            .map(|stream| &stream.info)
    }

    pub fn audio_channels(&self) -> Option<u16> {
        self.audio_stream_info()?.audio().map(|a| a.channels)
    }

    pub fn audio_channel_layout(&self) -> Option<u64> {
        self.audio_stream_info()?.audio().map(|a| a.channel_layout)
    }

    pub fn audio_sample_format(&self) -> Option<SampleFormat> {
        self.audio_stream_info()?.audio().map(|a| a.format)
    }

    pub fn audio_sample_rate(&self) -> Option<u32> {
        self.audio_stream_info()?.audio().map(|a| a.sample_rate)
    }

    pub fn audio_bit_rate(&self) -> Option<i64> {
        self.audio_stream_info().map(|info| info.bit_rate)
    }

    /// Native codec frame size in samples
    pub fn audio_frame_size(&self) -> Option<u32> {
        self.audio_stream_info()?.audio().map(|a| a.frame_size)
    }

    /// Audio stream duration in seconds
    pub fn audio_duration(&self) -> Option<f64> {
        let info = self.audio_stream_info()?;
        if !info.time_base.is_valid() {
            return Some(0.0);
        }
        Some(info.duration as f64 * info.time_base.num as f64 / info.time_base.den as f64)
    }

    /// Video stream duration in time-base ticks
    pub fn video_duration(&self) -> Option<i64> {
        self.video_stream_info().map(|info| info.duration)
    }

    pub fn video_width(&self) -> Option<u32> {
        self.video_stream_info()?.video().map(|v| v.width)
    }

    pub fn video_height(&self) -> Option<u32> {
        self.video_stream_info()?.video().map(|v| v.height)
    }

    pub fn video_pixel_format(&self) -> Option<PixelFormat> {
        self.video_stream_info()?.video().map(|v| v.format)
    }

    /// Bytes in one full output audio chunk, 0 without an audio stage
    pub fn output_audio_buffer_size(&self) -> usize {
        self.converter
            .as_ref()
            .map_or(0, FrameConverter::output_audio_buffer_size)
    }

    /// Start of the next audio chunk, in microseconds
    pub fn audio_timestamp(&self) -> Time {
        self.audio_timestamp
    }

    /// Timestamp of the last video frame, in microseconds
    pub fn video_timestamp(&self) -> Time {
        self.video_timestamp
    }

    pub fn output_audio_params(&self) -> OutputAudioParams {
        self.config.audio
    }

    pub fn output_video_params(&self) -> OutputVideoParams {
        self.config.video
    }
}

impl Drop for DecoderPipeline {
    fn drop(&mut self) {
        self.end();
    }
}
