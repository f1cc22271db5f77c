//! Stream reader: opens a container, selects one audio and one video stream,
//! and turns packets into decoded frames.

use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use crate::core::time::{Rational, Time};
use crate::media::backend::{Container, MediaSource, StreamDecoder, StreamInfo};
use crate::media::error::{AdapterError, Result};
use crate::media::format::MediaKind;
use crate::media::frame::DecodedFrame;

/// A selected stream and its decoder, if one could be opened.
pub struct SelectedStream {
    pub info: StreamInfo,
    decoder: Option<Box<dyn StreamDecoder>>,
    /// End of input has been signalled to the decoder
    draining: bool,
}

impl SelectedStream {
    fn new(info: StreamInfo) -> Self {
        Self {
            info,
            decoder: None,
            draining: false,
        }
    }

    pub fn index(&self) -> usize {
        self.info.index
    }

    pub fn time_base(&self) -> Rational {
        self.info.time_base
    }

    pub fn has_decoder(&self) -> bool {
        self.decoder.is_some()
    }
}

/// Some encoders write a video time-base of n/1 with n > 1000 when they mean
/// n/1000.
fn fix_video_time_base(time_base: Rational) -> Rational {
    if time_base.den == 1 && time_base.num > 1000 {
        Rational::new(time_base.num, 1000)
    } else {
        time_base
    }
}

/// Open container with its selected streams
pub struct StreamReader {
    container: Box<dyn Container>,
    path: PathBuf,
    video: Option<SelectedStream>,
    audio: Option<SelectedStream>,
}

impl StreamReader {
    /// Open `path` through `source` and select the first video and the first
    /// audio stream. Decoders are not opened yet, see `open_decoders`.
    pub fn open(source: &dyn MediaSource, path: &Path) -> Result<Self> {
        if path.as_os_str().is_empty() {
            return Err(AdapterError::invalid_argument("empty path"));
        }

        let container = source.open(path)?;
        info!("opened {}", path.display());

        let mut video = None;
        let mut audio = None;
        for stream in container.streams() {
            info!(
                "stream #{}: {:?} {} time_base={} duration={} bit_rate={}",
                stream.index,
                stream.kind(),
                stream.codec_name,
                stream.time_base,
                stream.duration,
                stream.bit_rate
            );
            match stream.kind() {
                MediaKind::Video if video.is_none() => {
                    let mut info = stream.clone();
                    info.time_base = fix_video_time_base(info.time_base);
                    if info.time_base != stream.time_base {
                        debug!(
                            "video time base {} corrected to {}",
                            stream.time_base, info.time_base
                        );
                    }
                    video = Some(SelectedStream::new(info));
                }
                MediaKind::Audio if audio.is_none() => {
                    audio = Some(SelectedStream::new(stream.clone()));
                }
                _ => {}
            }
        }

        if video.is_none() && audio.is_none() {
            return Err(AdapterError::NoStreamFound);
        }

        Ok(Self {
            container,
            path: path.to_path_buf(),
            video,
            audio,
        })
    }

    /// Open a decoder for each selected stream.
    ///
    /// A video decoder failure is logged and leaves the video stream without a
    /// decoder; an audio decoder failure is returned.
    pub fn open_decoders(&mut self) -> Result<()> {
        if let Some(stream) = self.video.as_mut() {
            match self.container.open_decoder(stream.index()) {
                Ok(decoder) => stream.decoder = Some(decoder),
                Err(e) => warn!(
                    "video stream #{} ({}) is not decodable: {}",
                    stream.index(),
                    stream.info.codec_name,
                    e
                ),
            }
        }

        if let Some(stream) = self.audio.as_mut() {
            match self.container.open_decoder(stream.index()) {
                Ok(decoder) => stream.decoder = Some(decoder),
                Err(e) => {
                    error!(
                        "audio stream #{} ({}) is not decodable: {}",
                        stream.index(),
                        stream.info.codec_name,
                        e
                    );
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn audio_stream(&self) -> Option<&SelectedStream> {
        self.audio.as_ref()
    }

    pub fn video_stream(&self) -> Option<&SelectedStream> {
        self.video.as_ref()
    }

    /// True if `kind` has a selected stream with an open decoder.
    pub fn can_decode(&self, kind: MediaKind) -> bool {
        let stream = match kind {
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Video => self.video.as_ref(),
            MediaKind::Other => None,
        };
        stream.is_some_and(SelectedStream::has_decoder)
    }

    /// Decode the next frame of `kind`.
    ///
    /// Packets of other streams are read and dropped. Packets that fail to
    /// decode are skipped. At the end of the container the decoder is drained,
    /// then `EndOfStream` is returned. Other read failures are returned as is.
    pub fn next_frame(&mut self, kind: MediaKind) -> Result<DecodedFrame> {
        let Self {
            container,
            video,
            audio,
            ..
        } = self;
        let stream = match kind {
            MediaKind::Audio => audio.as_mut(),
            MediaKind::Video => video.as_mut(),
            MediaKind::Other => None,
        }
        .ok_or(AdapterError::NoContext)?;
        let index = stream.info.index;
        let decoder = stream.decoder.as_mut().ok_or(AdapterError::NoContext)?;

        loop {
            match decoder.receive_frame() {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => {}
                Err(e) if e.is_eof() => return Err(AdapterError::EndOfStream),
                Err(e) => debug!("stream #{}: dropping undecodable data: {}", index, e),
            }

            if stream.draining {
                return Err(AdapterError::EndOfStream);
            }

            match container.read_packet() {
                Ok(packet) => {
                    if packet.stream_index != index {
                        continue;
                    }
                    if let Err(e) = decoder.send_packet(&packet) {
                        debug!("stream #{}: skipping packet pts={:?}: {}", index, packet.pts, e);
                    }
                }
                Err(e) if e.is_eof() => {
                    debug!("stream #{}: end of container, draining decoder", index);
                    stream.draining = true;
                    if let Err(e) = decoder.send_eof() {
                        debug!("stream #{}: drain failed: {}", index, e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Seek every stream to `target` microseconds (relative to the container
    /// start) and flush the decoders.
    pub fn seek(&mut self, target: Time) -> Result<()> {
        let timestamp = target + self.container.start_time().unwrap_or(0);
        self.container.seek(timestamp).map_err(|e| match e {
            AdapterError::SeekFailed(msg) => AdapterError::SeekFailed(msg),
            other => AdapterError::SeekFailed(other.to_string()),
        })?;

        for stream in [self.video.as_mut(), self.audio.as_mut()].into_iter().flatten() {
            if let Some(decoder) = stream.decoder.as_mut() {
                decoder.flush();
            }
            stream.draining = false;
        }
        debug!("seeked {} to {}us", self.path.display(), timestamp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::backend::{AudioParameters, CodecParameters, Packet, VideoParameters};
    use crate::media::format::{default_channel_layout, PixelFormat, SampleFormat};
    use crate::media::frame::VideoFrame;
    use crate::media::memory::{MemoryMedia, MemorySource};

    fn pcm(samples: usize) -> Vec<u8> {
        (0..samples).flat_map(|i| (i as i16).to_le_bytes()).collect()
    }

    fn source_with(path: &str, media: MemoryMedia) -> MemorySource {
        let mut source = MemorySource::new();
        source.insert(path, media);
        source
    }

    #[test]
    fn test_empty_path() {
        let source = MemorySource::new();
        let result = StreamReader::open(&source, Path::new(""));
        assert!(matches!(result, Err(AdapterError::InvalidArgument(_))));
        assert_eq!(source.open_count(), 0);
    }

    #[test]
    fn test_no_stream_found() {
        let mut media = MemoryMedia::new();
        media.add_stream("subrip", Rational::new(1, 1000), CodecParameters::Other);
        let source = source_with("subs.mkv", media);
        let result = StreamReader::open(&source, Path::new("subs.mkv"));
        assert!(matches!(result, Err(AdapterError::NoStreamFound)));
    }

    #[test]
    fn test_first_streams_selected() {
        let mut media = MemoryMedia::new();
        media.add_stream("subrip", Rational::new(1, 1000), CodecParameters::Other);
        let first_audio = media.add_pcm_audio(SampleFormat::S16, 8000, 1, &pcm(100), 100);
        media.add_pcm_audio(SampleFormat::S16, 44_100, 2, &pcm(100), 50);
        let first_video = media.add_raw_video(16, 16, PixelFormat::Gray8, Rational::new(1, 25), &[]);
        let source = source_with("multi.mkv", media);

        let reader = StreamReader::open(&source, Path::new("multi.mkv")).unwrap();
        assert_eq!(reader.audio_stream().map(SelectedStream::index), Some(first_audio));
        assert_eq!(reader.video_stream().map(SelectedStream::index), Some(first_video));
    }

    #[test]
    fn test_video_time_base_quirk() {
        let mut media = MemoryMedia::new();
        media.add_raw_video(16, 16, PixelFormat::Gray8, Rational::new(90_000, 1), &[]);
        let source = source_with("odd.flv", media);

        let reader = StreamReader::open(&source, Path::new("odd.flv")).unwrap();
        assert_eq!(reader.video_stream().unwrap().time_base(), Rational::new(90_000, 1000));

        let mut media = MemoryMedia::new();
        media.add_raw_video(16, 16, PixelFormat::Gray8, Rational::new(1000, 1), &[]);
        let source = source_with("ok.flv", media);
        let reader = StreamReader::open(&source, Path::new("ok.flv")).unwrap();
        assert_eq!(reader.video_stream().unwrap().time_base(), Rational::new(1000, 1));
    }

    #[test]
    fn test_audio_decoder_failure_is_fatal() {
        let mut media = MemoryMedia::new();
        media.add_stream(
            "opus",
            Rational::new(1, 48_000),
            CodecParameters::Audio(AudioParameters {
                sample_rate: 48_000,
                channels: 2,
                channel_layout: default_channel_layout(2),
                format: SampleFormat::F32,
                frame_size: 960,
            }),
        );
        let source = source_with("a.ogg", media);
        let mut reader = StreamReader::open(&source, Path::new("a.ogg")).unwrap();
        assert!(matches!(reader.open_decoders(), Err(AdapterError::NoDecoderFound(_))));
    }

    #[test]
    fn test_video_decoder_failure_is_not_fatal() {
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
        media.add_pcm_audio(SampleFormat::S16, 8000, 1, &pcm(100), 100);
        let source = source_with("v.mp4", media);

        let mut reader = StreamReader::open(&source, Path::new("v.mp4")).unwrap();
        reader.open_decoders().unwrap();
        assert!(reader.video_stream().is_some());
        assert!(!reader.can_decode(MediaKind::Video));
        assert!(reader.can_decode(MediaKind::Audio));
        assert!(matches!(reader.next_frame(MediaKind::Video), Err(AdapterError::NoContext)));
    }

    #[test]
    fn test_next_frame_skips_other_streams_and_drains() {
        let mut media = MemoryMedia::new();
        media.add_pcm_audio(SampleFormat::S16, 1000, 1, &pcm(300), 100);
        let frames = vec![VideoFrame::alloc(16, 16, PixelFormat::Gray8); 2];
        media.add_raw_video(16, 16, PixelFormat::Gray8, Rational::new(1, 10), &frames);
        media.sort_by_time();
        let source = source_with("av.mkv", media);

        let mut reader = StreamReader::open(&source, Path::new("av.mkv")).unwrap();
        reader.open_decoders().unwrap();

        let mut decoded = 0;
        loop {
            match reader.next_frame(MediaKind::Audio) {
                Ok(DecodedFrame::Audio(frame)) => {
                    assert_eq!(frame.nb_samples, 100);
                    decoded += 1;
                }
                Ok(DecodedFrame::Video(_)) => panic!("video frame from the audio stream"),
                Err(e) => {
                    assert!(e.is_eof());
                    break;
                }
            }
        }
        assert_eq!(decoded, 3);
        // Drained streams keep reporting the end
        assert!(reader.next_frame(MediaKind::Audio).unwrap_err().is_eof());
    }

    #[test]
    fn test_undecodable_packet_skipped() {
        let mut media = MemoryMedia::new();
        let index = media.add_pcm_audio(SampleFormat::S16, 1000, 1, &pcm(100), 100);
        media.push_packet(Packet {
            stream_index: index,
            pts: Some(100),
            dts: Some(100),
            duration: 1,
            is_key: true,
            data: vec![0u8; 3],
        });
        let source = source_with("bad.wav", media);

        let mut reader = StreamReader::open(&source, Path::new("bad.wav")).unwrap();
        reader.open_decoders().unwrap();
        assert!(reader.next_frame(MediaKind::Audio).is_ok());
        assert!(reader.next_frame(MediaKind::Audio).unwrap_err().is_eof());
    }

    #[test]
    fn test_seek_applies_start_offset_and_rewinds() {
        let mut media = MemoryMedia::new();
        // 100ms packets starting at 0
        media.add_pcm_audio(SampleFormat::S16, 1000, 1, &pcm(500), 100);
        let media = media.with_start_time(100_000);
        let source = source_with("a.wav", media);

        let mut reader = StreamReader::open(&source, Path::new("a.wav")).unwrap();
        reader.open_decoders().unwrap();
        while reader.next_frame(MediaKind::Audio).is_ok() {}

        // 150ms + 100ms start offset lands on the packet at 200ms
        reader.seek(150_000).unwrap();
        match reader.next_frame(MediaKind::Audio).unwrap() {
            DecodedFrame::Audio(frame) => assert_eq!(frame.pts, Some(200)),
            DecodedFrame::Video(_) => panic!("expected audio"),
        }
    }

    #[test]
    fn test_seek_failure() {
        let mut media = MemoryMedia::new();
        media.add_raw_video(16, 16, PixelFormat::Gray8, Rational::new(1, 25), &[]);
        let source = source_with("empty.y4m", media);

        let mut reader = StreamReader::open(&source, Path::new("empty.y4m")).unwrap();
        assert!(matches!(reader.seek(0), Err(AdapterError::SeekFailed(_))));
    }
}
