//! Audio resampling: sample format conversion, channel mixing and
//! sample-rate conversion.
//!
//! Conversion runs in three steps over normalized f64 samples:
//! 1. decode the source format (packed or planar) to interleaved f64
//! 2. mix channels to the target count
//! 3. convert the sample rate by linear interpolation
//!
//! The rate converter is stateful. Positions are tracked exactly in units of
//! 1/dst_rate source samples and the last input sample frame is kept as
//! history, so splitting the input into frames never changes the output:
//! N input samples always produce floor((N - 1) * dst / src) + 1 samples.

use crate::media::error::{AdapterError, Result};
use crate::media::format::SampleFormat;
use crate::media::frame::AudioFrame;

/// Format, rate and channel count of one side of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

impl AudioSpec {
    pub fn new(sample_rate: u32, channels: u16, format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            format,
        }
    }

    /// Spec describing `frame`.
    pub fn of(frame: &AudioFrame) -> Self {
        Self::new(frame.sample_rate, frame.channels, frame.format)
    }

    /// True when every field is known.
    pub fn is_complete(&self) -> bool {
        self.sample_rate > 0 && self.channels > 0 && self.format.is_valid()
    }
}

/// Stateful resampler from `src` to packed `dst`.
#[derive(Debug)]
pub struct Resampler {
    src: AudioSpec,
    dst: AudioSpec,
    /// Next output position relative to the start of the next input, in 1/dst_rate samples
    position: i64,
    /// Last sample frame of the previous input (after channel mixing)
    history: Option<Vec<f64>>,
}

impl Resampler {
    /// Build a resampler. Fails with `AllocFailed` if either side is incomplete.
    pub fn new(src: AudioSpec, dst: AudioSpec) -> Result<Self> {
        if !src.is_complete() || !dst.is_complete() {
            return Err(AdapterError::AllocFailed(format!(
                "cannot resample {:?} to {:?}",
                src, dst
            )));
        }
        Ok(Self {
            src,
            dst,
            position: 0,
            history: None,
        })
    }

    pub fn src(&self) -> AudioSpec {
        self.src
    }

    pub fn dst(&self) -> AudioSpec {
        self.dst
    }

    pub fn reset(&mut self) {
        self.position = 0;
        self.history = None;
    }

    /// Convert one frame, returning interleaved bytes in the packed target format.
    pub fn convert(&mut self, frame: &AudioFrame) -> Result<Vec<u8>> {
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

        let src_channels = self.src.channels as usize;
        let dst_channels = self.dst.channels as usize;

        let samples = decode_frame(frame)?;
        let mixed = mix_channels(&samples, frame.nb_samples, src_channels, dst_channels);
        let output = if self.src.sample_rate == self.dst.sample_rate {
            mixed
        } else {
            self.resample_linear(&mixed, frame.nb_samples, dst_channels)
        };

        encode_samples(&output, self.dst.format)
    }

    fn resample_linear(&mut self, input: &[f64], nb_samples: usize, channels: usize) -> Vec<f64> {
        let den = self.dst.sample_rate as i64;
        let step = self.src.sample_rate as i64;
        let n = nb_samples as i64;
        let limit = (n - 1) * den;

        let estimate = ((n * den) / step.max(1) + 1) as usize;
        let mut output = Vec::with_capacity(estimate * channels);

        let sample = |index: i64, ch: usize| -> f64 {
            if index < 0 {
                self.history.as_ref().map_or(0.0, |h| h[ch])
            } else {
                input[index as usize * channels + ch]
            }
        };

        let mut position = self.position;
        while position <= limit {
            let idx0 = position.div_euclid(den);
            let rem = position.rem_euclid(den);
            let frac = rem as f64 / den as f64;
            for ch in 0..channels {
                let s0 = sample(idx0, ch);
                let value = if rem == 0 {
                    s0
                } else {
                    let s1 = sample(idx0 + 1, ch);
                    s0 + (s1 - s0) * frac
                };
                output.push(value);
            }
            position += step;
        }

        self.position = position - n * den;
        let last = (nb_samples - 1) * channels;
        self.history = Some(input[last..last + channels].to_vec());
        output
    }
}

/// Decode a frame to interleaved normalized f64 samples.
fn decode_frame(frame: &AudioFrame) -> Result<Vec<f64>> {
    let format = frame.format;
    let bps = format.bytes_per_sample();
    let channels = frame.channels as usize;
    let total = frame.nb_samples * channels;
    let mut output = Vec::with_capacity(total);

    if format.is_planar() {
        if frame.planes.len() < channels {
            return Err(AdapterError::conversion(format!(
                "planar frame has {} planes for {} channels",
                frame.planes.len(),
                channels
            )));
        }
        for plane in &frame.planes[..channels] {
            check_len(plane, frame.nb_samples * bps)?;
        }
        for s in 0..frame.nb_samples {
            for plane in &frame.planes[..channels] {
                let offset = s * bps;
                output.push(decode_sample(&plane[offset..offset + bps], format)?);
            }
        }
    } else {
        let plane = frame
            .planes
            .first()
            .ok_or_else(|| AdapterError::conversion("audio frame has no data"))?;
        check_len(plane, total * bps)?;
        for i in 0..total {
            let offset = i * bps;
            output.push(decode_sample(&plane[offset..offset + bps], format)?);
        }
    }

    Ok(output)
}

fn check_len(data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        return Err(AdapterError::conversion(format!(
            "not enough data: expected {expected} bytes, got {}",
            data.len()
        )));
    }
    Ok(())
}

/// Mix interleaved samples between channel counts.
///
/// - mono to many: copy to every channel
/// - many to mono: average
/// - otherwise: map matching channels, silence the rest
fn mix_channels(input: &[f64], nb_samples: usize, src_channels: usize, dst_channels: usize) -> Vec<f64> {
    if src_channels == dst_channels {
        return input.to_vec();
    }

    let mut output = Vec::with_capacity(nb_samples * dst_channels);
    for frame in input.chunks_exact(src_channels).take(nb_samples) {
        for dst_ch in 0..dst_channels {
            let value = if src_channels == 1 {
                frame[0]
            } else if dst_channels == 1 {
                frame.iter().sum::<f64>() / src_channels as f64
            } else if dst_ch < src_channels {
                frame[dst_ch]
            } else {
                0.0
            };
            output.push(value);
        }
    }
    output
}

/// Decode one sample to a normalized f64 (-1.0 ~ 1.0)
fn decode_sample(data: &[u8], format: SampleFormat) -> Result<f64> {
    match format.packed() {
        SampleFormat::U8 => Ok((data[0] as f64 - 128.0) / 128.0),
        SampleFormat::S16 => {
            let v = i16::from_le_bytes([data[0], data[1]]);
            Ok(v as f64 / 32768.0)
        }
        SampleFormat::S32 => {
            let v = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            Ok(v as f64 / 2_147_483_648.0)
        }
        SampleFormat::F32 => {
            let v = f32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            Ok(v as f64)
        }
        SampleFormat::F64 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[..8]);
            Ok(f64::from_le_bytes(bytes))
        }
        _ => Err(AdapterError::conversion(format!(
            "unsupported sample format {:?}",
            format
        ))),
    }
}

/// Encode normalized samples to packed bytes
fn encode_samples(samples: &[f64], format: SampleFormat) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(samples.len() * format.bytes_per_sample());
    for &value in samples {
        match format.packed() {
            SampleFormat::U8 => {
                output.push(((value * 128.0) + 128.0).round().clamp(0.0, 255.0) as u8);
            }
            SampleFormat::S16 => {
                let v = (value * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
                output.extend_from_slice(&v.to_le_bytes());
            }
            SampleFormat::S32 => {
                let v = (value * 2_147_483_648.0)
                    .round()
                    .clamp(-2_147_483_648.0, 2_147_483_647.0) as i32;
                output.extend_from_slice(&v.to_le_bytes());
            }
            SampleFormat::F32 => output.extend_from_slice(&(value as f32).to_le_bytes()),
            SampleFormat::F64 => output.extend_from_slice(&value.to_le_bytes()),
            _ => {
                return Err(AdapterError::conversion(format!(
                    "unsupported sample format {:?}",
                    format
                )))
            }
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::Rational;

    fn s16_frame(samples: &[i16], channels: u16, sample_rate: u32) -> AudioFrame {
        let data = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        AudioFrame::packed(data, SampleFormat::S16, channels, sample_rate, None, Rational::new(1, sample_rate as i32))
    }

    fn s16_values(data: &[u8]) -> Vec<i16> {
        data.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect()
    }

    #[test]
    fn test_incomplete_spec_fails() {
        let dst = AudioSpec::new(16_000, 1, SampleFormat::S16);
        let src = AudioSpec::new(0, 2, SampleFormat::S16);
        assert!(matches!(Resampler::new(src, dst), Err(AdapterError::AllocFailed(_))));
        let src = AudioSpec::new(48_000, 2, SampleFormat::S16);
        let dst = AudioSpec::new(16_000, 1, SampleFormat::None);
        assert!(matches!(Resampler::new(src, dst), Err(AdapterError::AllocFailed(_))));
    }

    #[test]
    fn test_format_convert_s16_to_f32() {
        let src = AudioSpec::new(8000, 1, SampleFormat::S16);
        let dst = AudioSpec::new(8000, 1, SampleFormat::F32);
        let mut resampler = Resampler::new(src, dst).unwrap();

        let out = resampler.convert(&s16_frame(&[16384], 1, 8000)).unwrap();
        assert_eq!(out.len(), 4);
        let value = f32::from_le_bytes([out[0], out[1], out[2], out[3]]);
        assert!((value - 0.5).abs() < 0.0001);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let src = AudioSpec::new(8000, 2, SampleFormat::S16);
        let dst = AudioSpec::new(8000, 1, SampleFormat::S16);
        let mut resampler = Resampler::new(src, dst).unwrap();

        let out = resampler.convert(&s16_frame(&[1000, 3000, -2000, -4000], 2, 8000)).unwrap();
        assert_eq!(s16_values(&out), vec![2000, -3000]);
    }

    #[test]
    fn test_mono_to_stereo_copies() {
        let src = AudioSpec::new(8000, 1, SampleFormat::S16);
        let dst = AudioSpec::new(8000, 2, SampleFormat::S16);
        let mut resampler = Resampler::new(src, dst).unwrap();

        let out = resampler.convert(&s16_frame(&[1000, -2000], 1, 8000)).unwrap();
        assert_eq!(s16_values(&out), vec![1000, 1000, -2000, -2000]);
    }

    #[test]
    fn test_planar_input() {
        let src = AudioSpec::new(8000, 2, SampleFormat::S16p);
        let dst = AudioSpec::new(8000, 2, SampleFormat::S16);
        let mut resampler = Resampler::new(src, dst).unwrap();

        let left: Vec<u8> = [1i16, 2].iter().flat_map(|s| s.to_le_bytes()).collect();
        let right: Vec<u8> = [-1i16, -2].iter().flat_map(|s| s.to_le_bytes()).collect();
        let frame = AudioFrame {
            planes: vec![left, right],
            format: SampleFormat::S16p,
            channels: 2,
            sample_rate: 8000,
            nb_samples: 2,
            pts: None,
            time_base: Rational::new(1, 8000),
        };
        let out = resampler.convert(&frame).unwrap();
        assert_eq!(s16_values(&out), vec![1, -1, 2, -2]);
    }

    #[test]
    fn test_downsample_count_is_split_independent() {
        let src = AudioSpec::new(48_000, 1, SampleFormat::S16);
        let dst = AudioSpec::new(16_000, 1, SampleFormat::S16);

        let input: Vec<i16> = (0..4800).map(|i| (i % 1000) as i16).collect();

        let mut whole = Resampler::new(src, dst).unwrap();
        let expected = s16_values(&whole.convert(&s16_frame(&input, 1, 48_000)).unwrap());
        // floor((4800 - 1) / 3) + 1
        assert_eq!(expected.len(), 1600);

        let mut split = Resampler::new(src, dst).unwrap();
        let mut got = Vec::new();
        for chunk in input.chunks(1024) {
            got.extend(s16_values(&split.convert(&s16_frame(chunk, 1, 48_000)).unwrap()));
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn test_upsample_interpolates_across_frames() {
        let src = AudioSpec::new(1000, 1, SampleFormat::S16);
        let dst = AudioSpec::new(2000, 1, SampleFormat::S16);
        let mut resampler = Resampler::new(src, dst).unwrap();

        let first = s16_values(&resampler.convert(&s16_frame(&[0, 100], 1, 1000)).unwrap());
        assert_eq!(first, vec![0, 50, 100]);
        // The midpoint between 100 and 200 uses the previous frame's last sample
        let second = s16_values(&resampler.convert(&s16_frame(&[200, 300], 1, 1000)).unwrap());
        assert_eq!(second, vec![150, 200, 250, 300]);
    }

    #[test]
    fn test_mismatched_frame_rejected() {
        let src = AudioSpec::new(8000, 1, SampleFormat::S16);
        let dst = AudioSpec::new(8000, 1, SampleFormat::S16);
        let mut resampler = Resampler::new(src, dst).unwrap();
        let result = resampler.convert(&s16_frame(&[0, 0], 2, 8000));
        assert!(matches!(result, Err(AdapterError::ConversionFailed(_))));
    }
}
