//! In-memory backend.
//!
//! Containers are built from packet lists and registered under a path in a
//! `MemorySource`. Supported codecs are uncompressed PCM (`pcm_u8`,
//! `pcm_s16le`, `pcm_s32le`, `pcm_f32le`, `pcm_f64le`) and `rawvideo`; any
//! other codec name reports `NoDecoderFound`, which makes this backend handy for
//! exercising the pipeline's error paths as well as its data paths.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::convert::backend::{ConvertBackend, SoftwareConvert};
use crate::core::time::{self, Rational};
use crate::media::backend::{
    AudioParameters, CodecParameters, Container, MediaSource, Packet, StreamDecoder, StreamInfo,
    VideoParameters,
};
use crate::media::error::{AdapterError, Result};
use crate::media::format::{default_channel_layout, PixelFormat, SampleFormat};
use crate::media::frame::{AudioFrame, DecodedFrame, VideoFrame};

/// Codec name for a packed PCM sample format.
pub fn pcm_codec_name(format: SampleFormat) -> Option<&'static str> {
    match format.packed() {
        SampleFormat::U8 => Some("pcm_u8"),
        SampleFormat::S16 => Some("pcm_s16le"),
        SampleFormat::S32 => Some("pcm_s32le"),
        SampleFormat::F32 => Some("pcm_f32le"),
        SampleFormat::F64 => Some("pcm_f64le"),
        _ => None,
    }
}

/// Contents of one in-memory container.
#[derive(Debug, Clone, Default)]
pub struct MemoryMedia {
    streams: Vec<StreamInfo>,
    packets: Vec<Packet>,
    start_time: Option<i64>,
}

impl MemoryMedia {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a container start offset (microseconds).
    pub fn with_start_time(mut self, start_time: i64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Add a stream and return its index.
    pub fn add_stream(
        &mut self,
        codec_name: &str,
        time_base: Rational,
        parameters: CodecParameters,
    ) -> usize {
        let index = self.streams.len();
        self.streams.push(StreamInfo {
            index,
            codec_name: codec_name.to_string(),
            time_base,
            duration: 0,
            bit_rate: 0,
            parameters,
        });
        index
    }

    pub fn stream_mut(&mut self, index: usize) -> Option<&mut StreamInfo> {
        self.streams.get_mut(index)
    }

    pub fn push_packet(&mut self, packet: Packet) {
        self.packets.push(packet);
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    /// Add a PCM audio stream holding `data` (interleaved, `format` packed),
    /// split into packets of `samples_per_packet` samples.
    pub fn add_pcm_audio(
        &mut self,
        format: SampleFormat,
        sample_rate: u32,
        channels: u16,
        data: &[u8],
        samples_per_packet: usize,
    ) -> usize {
        let format = format.packed();
        let codec = pcm_codec_name(format).unwrap_or("pcm_unknown");
        let frame_bytes = format.bytes_per_sample() * channels as usize;
        let total_samples = if frame_bytes == 0 { 0 } else { data.len() / frame_bytes };

        let index = self.add_stream(
            codec,
            Rational::new(1, sample_rate as i32),
            CodecParameters::Audio(AudioParameters {
                sample_rate,
                channels,
                channel_layout: default_channel_layout(channels),
                format,
                frame_size: samples_per_packet as u32,
            }),
        );
        self.streams[index].duration = total_samples as i64;
        self.streams[index].bit_rate = sample_rate as i64 * frame_bytes as i64 * 8;

        let chunk = samples_per_packet.max(1) * frame_bytes.max(1);
        for (n, payload) in data.chunks(chunk).enumerate() {
            let pts = (n * samples_per_packet) as i64;
            self.packets.push(Packet {
                stream_index: index,
                pts: Some(pts),
                dts: Some(pts),
                duration: (payload.len() / frame_bytes.max(1)) as i64,
                is_key: true,
                data: payload.to_vec(),
            });
        }
        index
    }

    /// Add a `rawvideo` stream, one packet per frame. Frame `n` gets pts `n`.
    pub fn add_raw_video(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
        time_base: Rational,
        frames: &[VideoFrame],
    ) -> usize {
        let index = self.add_stream(
            "rawvideo",
            time_base,
            CodecParameters::Video(VideoParameters {
                width,
                height,
                format,
            }),
        );
        self.streams[index].duration = frames.len() as i64;

        for (n, frame) in frames.iter().enumerate() {
            self.packets.push(Packet {
                stream_index: index,
                pts: Some(n as i64),
                dts: Some(n as i64),
                duration: 1,
                is_key: true,
                data: frame.planes.concat(),
            });
        }
        index
    }

    /// Interleave packets of all streams by presentation time.
    pub fn sort_by_time(&mut self) {
        let streams = &self.streams;
        self.packets.sort_by_key(|packet| packet_time(streams, packet));
    }
}

fn packet_time(streams: &[StreamInfo], packet: &Packet) -> i64 {
    let time_base = streams
        .get(packet.stream_index)
        .map(|s| s.time_base)
        .unwrap_or_default();
    time::ticks_to_micros(packet.pts.unwrap_or(0), time_base)
}

/// Registry of in-memory containers keyed by path.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    media: HashMap<PathBuf, MemoryMedia>,
    opens: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<P: AsRef<Path>>(&mut self, path: P, media: MemoryMedia) {
        self.media.insert(path.as_ref().to_path_buf(), media);
    }

    /// Number of `open` calls so far, successful or not.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl MediaSource for MemorySource {
    fn open(&self, path: &Path) -> Result<Box<dyn Container>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let media = self
            .media
            .get(path)
            .ok_or_else(|| AdapterError::OpenFailed(format!("{}: no such container", path.display())))?;
        Ok(Box::new(MemoryContainer {
            media: media.clone(),
            position: 0,
        }))
    }

    fn convert_backend(&self) -> Box<dyn ConvertBackend> {
        Box::new(SoftwareConvert)
    }
}

struct MemoryContainer {
    media: MemoryMedia,
    position: usize,
}

impl Container for MemoryContainer {
    fn streams(&self) -> &[StreamInfo] {
        &self.media.streams
    }

    fn start_time(&self) -> Option<i64> {
        self.media.start_time
    }

    fn read_packet(&mut self) -> Result<Packet> {
        let packet = self
            .media
            .packets
            .get(self.position)
            .cloned()
            .ok_or(AdapterError::EndOfStream)?;
        self.position += 1;
        Ok(packet)
    }

    fn seek(&mut self, timestamp: i64) -> Result<()> {
        if self.media.packets.is_empty() {
            return Err(AdapterError::SeekFailed("container has no seek points".to_string()));
        }

        // Last keyframe at or before the target, else the first packet
        let streams = &self.media.streams;
        self.position = self
            .media
            .packets
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_key && packet_time(streams, p) <= timestamp)
            .map(|(i, _)| i)
            .last()
            .unwrap_or(0);
        Ok(())
    }

    fn open_decoder(&mut self, index: usize) -> Result<Box<dyn StreamDecoder>> {
        let stream = self
            .media
            .streams
            .get(index)
            .ok_or_else(|| AdapterError::invalid_argument(format!("no stream {index}")))?;

        match &stream.parameters {
            CodecParameters::Audio(params) if stream.codec_name.starts_with("pcm_") => {
                let expected = pcm_codec_name(params.format);
                if expected != Some(stream.codec_name.as_str()) {
                    return Err(AdapterError::NoDecoderFound(stream.codec_name.clone()));
                }
                Ok(Box::new(PcmDecoder {
                    params: params.clone(),
                    time_base: stream.time_base,
                    pending: VecDeque::new(),
                }))
            }
            CodecParameters::Video(params) if stream.codec_name == "rawvideo" => {
                if !params.format.is_valid() {
                    return Err(AdapterError::DecoderOpen(
                        "rawvideo needs a known pixel format".to_string(),
                    ));
                }
                Ok(Box::new(RawVideoDecoder {
                    params: params.clone(),
                    time_base: stream.time_base,
                    pending: VecDeque::new(),
                }))
            }
            _ => Err(AdapterError::NoDecoderFound(stream.codec_name.clone())),
        }
    }
}

struct PcmDecoder {
    params: AudioParameters,
    time_base: Rational,
    pending: VecDeque<DecodedFrame>,
}

impl StreamDecoder for PcmDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let frame_bytes = self.params.format.bytes_per_sample() * self.params.channels as usize;
        if packet.data.is_empty() || frame_bytes == 0 || packet.data.len() % frame_bytes != 0 {
            return Err(AdapterError::Decode(format!(
                "pcm packet of {} bytes is not a whole number of {}-byte sample frames",
                packet.data.len(),
                frame_bytes
            )));
        }
        self.pending.push_back(DecodedFrame::Audio(AudioFrame::packed(
            packet.data.clone(),
            self.params.format,
            self.params.channels,
            self.params.sample_rate,
            packet.pts,
            self.time_base,
        )));
        Ok(())
    }

    fn send_eof(&mut self) -> Result<()> {
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<DecodedFrame>> {
        Ok(self.pending.pop_front())
    }

    fn flush(&mut self) {
        self.pending.clear();
    }
}

struct RawVideoDecoder {
    params: VideoParameters,
    time_base: Rational,
    pending: VecDeque<DecodedFrame>,
}

impl StreamDecoder for RawVideoDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let VideoParameters {
            width,
            height,
            format,
        } = self.params;
        let mut frame = VideoFrame::alloc(width, height, format);
        let expected: usize = frame.planes.iter().map(Vec::len).sum();
        if packet.data.len() != expected {
            return Err(AdapterError::Decode(format!(
                "rawvideo packet of {} bytes, expected {}",
                packet.data.len(),
                expected
            )));
        }

        let mut offset = 0;
        for plane in frame.planes.iter_mut() {
            let len = plane.len();
            plane.copy_from_slice(&packet.data[offset..offset + len]);
            offset += len;
        }
        frame.pts = packet.pts;
        frame.time_base = self.time_base;
        self.pending.push_back(DecodedFrame::Video(frame));
        Ok(())
    }

    fn send_eof(&mut self) -> Result<()> {
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<DecodedFrame>> {
        Ok(self.pending.pop_front())
    }

    fn flush(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence(samples: usize, channels: u16) -> Vec<u8> {
        vec![0u8; samples * channels as usize * 2]
    }

    #[test]
    fn test_pcm_packets() {
        let mut media = MemoryMedia::new();
        let index = media.add_pcm_audio(SampleFormat::S16, 8000, 2, &silence(2500, 2), 1000);
        assert_eq!(index, 0);
        assert_eq!(media.packets().len(), 3);
        assert_eq!(media.packets()[2].pts, Some(2000));
        assert_eq!(media.packets()[2].duration, 500);
        assert_eq!(media.streams[0].duration, 2500);
        assert_eq!(media.streams[0].codec_name, "pcm_s16le");
    }

    #[test]
    fn test_open_unknown_path() {
        let source = MemorySource::new();
        let result = source.open(Path::new("missing.mkv"));
        assert!(matches!(result, Err(AdapterError::OpenFailed(_))));
        assert_eq!(source.open_count(), 1);
    }

    #[test]
    fn test_read_until_eof() {
        let mut media = MemoryMedia::new();
        media.add_pcm_audio(SampleFormat::S16, 8000, 1, &silence(300, 1), 100);
        let mut source = MemorySource::new();
        source.insert("a.wav", media);

        let mut container = source.open(Path::new("a.wav")).unwrap();
        for _ in 0..3 {
            assert!(container.read_packet().is_ok());
        }
        assert!(container.read_packet().unwrap_err().is_eof());
    }

    #[test]
    fn test_seek_backward_biased() {
        let mut media = MemoryMedia::new();
        // 100 samples per packet at 1kHz = 100ms per packet
        media.add_pcm_audio(SampleFormat::S16, 1000, 1, &silence(1000, 1), 100);
        let mut source = MemorySource::new();
        source.insert("a.wav", media);

        let mut container = source.open(Path::new("a.wav")).unwrap();
        container.seek(350_000).unwrap();
        assert_eq!(container.read_packet().unwrap().pts, Some(300));
        container.seek(-5).unwrap();
        assert_eq!(container.read_packet().unwrap().pts, Some(0));
    }

    #[test]
    fn test_pcm_decoder_rejects_partial_frames() {
        let mut media = MemoryMedia::new();
        media.add_pcm_audio(SampleFormat::S16, 8000, 2, &silence(10, 2), 10);
        let mut source = MemorySource::new();
        source.insert("a.wav", media);

        let mut container = source.open(Path::new("a.wav")).unwrap();
        let mut decoder = container.open_decoder(0).unwrap();
        let bad = Packet {
            data: vec![0u8; 3],
            ..Default::default()
        };
        assert!(matches!(decoder.send_packet(&bad), Err(AdapterError::Decode(_))));

        let good = container.read_packet().unwrap();
        decoder.send_packet(&good).unwrap();
        match decoder.receive_frame().unwrap() {
            Some(DecodedFrame::Audio(frame)) => assert_eq!(frame.nb_samples, 10),
            other => panic!("expected audio frame, got {:?}", other),
        }
        assert!(decoder.receive_frame().unwrap().is_none());
    }

    #[test]
    fn test_unsupported_codec() {
        let mut media = MemoryMedia::new();
        media.add_stream(
            "hevc",
            Rational::new(1, 90_000),
            CodecParameters::Video(VideoParameters {
                width: 64,
                height: 64,
                format: PixelFormat::Yuv420p,
            }),
        );
        let mut source = MemorySource::new();
        source.insert("v.mp4", media);

        let mut container = source.open(Path::new("v.mp4")).unwrap();
        assert!(matches!(
            container.open_decoder(0),
            Err(AdapterError::NoDecoderFound(name)) if name == "hevc"
        ));
    }

    #[test]
    fn test_raw_video_roundtrip() {
        let mut frame = VideoFrame::alloc(16, 16, PixelFormat::Gray8);
        frame.planes[0].iter_mut().enumerate().for_each(|(i, p)| *p = i as u8);
        let mut media = MemoryMedia::new();
        media.add_raw_video(16, 16, PixelFormat::Gray8, Rational::new(1, 25), &[frame.clone()]);
        let mut source = MemorySource::new();
        source.insert("v.y4m", media);

        let mut container = source.open(Path::new("v.y4m")).unwrap();
        let mut decoder = container.open_decoder(0).unwrap();
        decoder.send_packet(&container.read_packet().unwrap()).unwrap();
        match decoder.receive_frame().unwrap() {
            Some(DecodedFrame::Video(decoded)) => {
                assert_eq!(decoded.planes[0], frame.planes[0]);
                assert_eq!(decoded.pts, Some(0));
            }
            other => panic!("expected video frame, got {:?}", other),
        }
    }
}
