//! Output parameters and pipeline configuration.
//!
//! Values are kept as raw signed integers so that whatever the host hands in
//! (including zero or negative values) can be stored and reported back, and
//! rejected only when validated.

use serde::{Deserialize, Serialize};

use crate::convert::ScaleAlgorithm;
use crate::media::error::{AdapterError, Result};
use crate::media::format::{PixelFormat, SampleFormat};

pub const DEFAULT_AUDIO_SAMPLE_RATE: i32 = 44_100;
pub const DEFAULT_AUDIO_CHANNELS: i32 = 2;
pub const DEFAULT_AUDIO_FRAME_SIZE: i32 = 1024;
pub const DEFAULT_VIDEO_WIDTH: i32 = 480;
pub const DEFAULT_VIDEO_HEIGHT: i32 = 480;

/// Output widths must be a multiple of this
pub const VIDEO_WIDTH_ALIGN: i32 = 16;

/// Target audio format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputAudioParams {
    pub channels: i32,
    /// Samples per channel in each output chunk
    pub frame_size: i32,
    pub sample_rate: i32,
    pub format: SampleFormat,
}

impl Default for OutputAudioParams {
    fn default() -> Self {
        Self {
            channels: DEFAULT_AUDIO_CHANNELS,
            frame_size: DEFAULT_AUDIO_FRAME_SIZE,
            sample_rate: DEFAULT_AUDIO_SAMPLE_RATE,
            format: SampleFormat::S16,
        }
    }
}

impl OutputAudioParams {
    pub fn validate(&self) -> Result<()> {
        if !(1..=2).contains(&self.channels) {
            return Err(AdapterError::invalid_argument(format!(
                "audio channels must be 1 or 2, got {}",
                self.channels
            )));
        }
        if self.frame_size <= 0 {
            return Err(AdapterError::invalid_argument(format!(
                "audio frame size must be positive, got {}",
                self.frame_size
            )));
        }
        if self.sample_rate <= 0 {
            return Err(AdapterError::invalid_argument(format!(
                "audio sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if !self.format.is_valid() {
            return Err(AdapterError::invalid_argument("audio sample format is not set"));
        }
        Ok(())
    }
}

/// Target video format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputVideoParams {
    pub width: i32,
    pub height: i32,
    pub format: PixelFormat,
}

impl Default for OutputVideoParams {
    fn default() -> Self {
        Self {
            width: DEFAULT_VIDEO_WIDTH,
            height: DEFAULT_VIDEO_HEIGHT,
            format: PixelFormat::Yuv420p,
        }
    }
}

impl OutputVideoParams {
    /// Full check applied by the setters: positive size, width aligned to 16,
    /// known pixel format.
    pub fn validate(&self) -> Result<()> {
        self.validate_dimensions()?;
        if self.width % VIDEO_WIDTH_ALIGN != 0 {
            return Err(AdapterError::invalid_argument(format!(
                "video width {} is not a multiple of {}",
                self.width, VIDEO_WIDTH_ALIGN
            )));
        }
        Ok(())
    }

    /// Check applied before opening a container: positive size and a known
    /// pixel format.
    pub fn validate_dimensions(&self) -> Result<()> {
        if self.width <= 0 || self.height <= 0 {
            return Err(AdapterError::invalid_argument(format!(
                "video size must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if !self.format.is_valid() {
            return Err(AdapterError::invalid_argument("video pixel format is not set"));
        }
        Ok(())
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub audio: OutputAudioParams,
    pub video: OutputVideoParams,
    pub scale_algorithm: ScaleAlgorithm,
    /// Validate setter arguments before storing them. When false, setters
    /// store first and report invalid values afterwards.
    pub strict_setters: bool,
}

impl DecoderConfig {
    /// Validation run by `start()`.
    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.video.validate_dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DecoderConfig::default();
        assert_eq!(config.audio.format, SampleFormat::S16);
        assert_eq!(config.audio.channels, 2);
        assert_eq!(config.audio.frame_size, 1024);
        assert_eq!(config.audio.sample_rate, DEFAULT_AUDIO_SAMPLE_RATE);
        assert_eq!((config.video.width, config.video.height), (480, 480));
        assert_eq!(config.video.format, PixelFormat::Yuv420p);
        assert_eq!(config.scale_algorithm, ScaleAlgorithm::Bilinear);
        assert!(!config.strict_setters);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_audio_validation() {
        let mut params = OutputAudioParams::default();
        params.channels = 3;
        assert!(matches!(params.validate(), Err(AdapterError::InvalidArgument(_))));

        params.channels = 1;
        params.sample_rate = 0;
        assert!(params.validate().is_err());

        params.sample_rate = 16_000;
        params.format = SampleFormat::from_index(42);
        assert!(params.validate().is_err());

        params.format = SampleFormat::F32;
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_video_validation() {
        let params = OutputVideoParams {
            width: 500,
            height: 480,
            format: PixelFormat::Rgba,
        };
        assert!(params.validate_dimensions().is_ok());
        assert!(matches!(params.validate(), Err(AdapterError::InvalidArgument(_))));

        let params = OutputVideoParams {
            width: 0,
            ..params
        };
        assert!(params.validate_dimensions().is_err());
    }

    #[test]
    fn test_config_json() {
        let config = DecoderConfig {
            strict_setters: true,
            scale_algorithm: ScaleAlgorithm::Nearest,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: DecoderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);

        // Missing fields fall back to defaults
        let partial: DecoderConfig =
            serde_json::from_str(r#"{"audio": {"sample_rate": 16000, "channels": 1}}"#).unwrap();
        assert_eq!(partial.audio.sample_rate, 16_000);
        assert_eq!(partial.audio.channels, 1);
        assert_eq!(partial.audio.frame_size, 1024);
        assert_eq!(partial.video, OutputVideoParams::default());
    }
}
