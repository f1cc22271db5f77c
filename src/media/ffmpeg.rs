//! FFmpeg backend (feature `ffmpeg`).
//!
//! Wraps `ffmpeg-next`. Stream parameters are read straight from the codec
//! parameters so streams whose codec cannot be opened are still described.
//!
//! Decoders may output pixel formats `PixelFormat` has no variant for
//! (full-range `yuvj*`, high bit depth, alpha planes). Those frames are run
//! through libswscale into the nearest supported format at their native size,
//! and the stream reports that format as its own.

use std::mem;
use std::path::Path;

use ffmpeg_next as ffmpeg;
use ffmpeg::ffi::{AVChannelLayout, AVChannelOrder, AVPixelFormat, AVSampleFormat};
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling;
use log::debug;

use crate::convert::backend::ConvertBackend;
use crate::convert::ffmpeg::FfmpegConvert;
use crate::core::time::Rational;
use crate::media::backend::{
    AudioParameters, CodecParameters, Container, MediaSource, Packet, StreamDecoder, StreamInfo,
    VideoParameters,
};
use crate::media::error::{AdapterError, Result};
use crate::media::format::{PixelFormat, SampleFormat};
use crate::media::frame::{AudioFrame, DecodedFrame, VideoFrame};

const SAMPLE_FORMATS: [(AVSampleFormat, SampleFormat); 10] = [
    (AVSampleFormat::AV_SAMPLE_FMT_U8, SampleFormat::U8),
    (AVSampleFormat::AV_SAMPLE_FMT_S16, SampleFormat::S16),
    (AVSampleFormat::AV_SAMPLE_FMT_S32, SampleFormat::S32),
    (AVSampleFormat::AV_SAMPLE_FMT_FLT, SampleFormat::F32),
    (AVSampleFormat::AV_SAMPLE_FMT_DBL, SampleFormat::F64),
    (AVSampleFormat::AV_SAMPLE_FMT_U8P, SampleFormat::U8p),
    (AVSampleFormat::AV_SAMPLE_FMT_S16P, SampleFormat::S16p),
    (AVSampleFormat::AV_SAMPLE_FMT_S32P, SampleFormat::S32p),
    (AVSampleFormat::AV_SAMPLE_FMT_FLTP, SampleFormat::F32p),
    (AVSampleFormat::AV_SAMPLE_FMT_DBLP, SampleFormat::F64p),
];

const PIXEL_FORMATS: [(AVPixelFormat, PixelFormat); 9] = [
    (AVPixelFormat::AV_PIX_FMT_YUV420P, PixelFormat::Yuv420p),
    (AVPixelFormat::AV_PIX_FMT_YUV422P, PixelFormat::Yuv422p),
    (AVPixelFormat::AV_PIX_FMT_YUV444P, PixelFormat::Yuv444p),
    (AVPixelFormat::AV_PIX_FMT_NV12, PixelFormat::Nv12),
    (AVPixelFormat::AV_PIX_FMT_RGB24, PixelFormat::Rgb24),
    (AVPixelFormat::AV_PIX_FMT_BGR24, PixelFormat::Bgr24),
    (AVPixelFormat::AV_PIX_FMT_RGBA, PixelFormat::Rgba),
    (AVPixelFormat::AV_PIX_FMT_BGRA, PixelFormat::Bgra),
    (AVPixelFormat::AV_PIX_FMT_GRAY8, PixelFormat::Gray8),
];

/// Map a raw `AVSampleFormat` value. Formats we do not handle map to `None`.
fn sample_format_from_raw(raw: i32) -> SampleFormat {
    SAMPLE_FORMATS
        .iter()
        .find(|(av, _)| *av as i32 == raw)
        .map_or(SampleFormat::None, |(_, format)| *format)
}

/// Map a raw `AVPixelFormat` value. Formats we do not handle map to `None`.
fn pixel_format_from_raw(raw: i32) -> PixelFormat {
    PIXEL_FORMATS
        .iter()
        .find(|(av, _)| *av as i32 == raw)
        .map_or(PixelFormat::None, |(_, format)| *format)
}

pub(crate) fn to_av_sample_format(format: SampleFormat) -> Option<AVSampleFormat> {
    SAMPLE_FORMATS
        .iter()
        .find(|(_, f)| *f == format)
        .map(|(av, _)| *av)
}

pub(crate) fn to_ffmpeg_pixel(format: PixelFormat) -> Option<Pixel> {
    PIXEL_FORMATS
        .iter()
        .find(|(_, f)| *f == format)
        .map(|(av, _)| Pixel::from(*av))
}

/// Supported format a decoder's output is delivered in: the direct
/// counterpart if there is one, else the closest format we convert to.
fn delivered_pixel_format(pixel: Pixel) -> PixelFormat {
    match pixel_format_from_raw(AVPixelFormat::from(pixel) as i32) {
        PixelFormat::None => fallback_pixel_format(pixel),
        format => format,
    }
}

fn fallback_pixel_format(pixel: Pixel) -> PixelFormat {
    match pixel {
        Pixel::None => PixelFormat::None,
        Pixel::YUVJ420P => PixelFormat::Yuv420p,
        Pixel::YUVJ422P => PixelFormat::Yuv422p,
        Pixel::YUVJ444P => PixelFormat::Yuv444p,
        other => match other.descriptor().map(|desc| desc.nb_components()) {
            // Gray + alpha and colour + alpha
            Some(2) | Some(4) => PixelFormat::Rgba,
            Some(1) => PixelFormat::Gray8,
            Some(3) => PixelFormat::Yuv420p,
            _ => PixelFormat::None,
        },
    }
}

/// Channel mask of a stream layout. Unspecified order gets FFmpeg's default
/// layout for the channel count; custom and ambisonic orders have no mask.
fn channel_mask(layout: &AVChannelLayout) -> u64 {
    match layout.order {
        // SAFETY: `mask` is the active union field for native order.
        AVChannelOrder::AV_CHANNEL_ORDER_NATIVE => unsafe { layout.u.mask },
        AVChannelOrder::AV_CHANNEL_ORDER_UNSPEC if layout.nb_channels > 0 => {
            // SAFETY: an all-zero layout is a valid empty layout that
            // av_channel_layout_default overwrites.
            unsafe {
                let mut default: AVChannelLayout = mem::zeroed();
                ffmpeg::ffi::av_channel_layout_default(&mut default, layout.nb_channels);
                let mask = match default.order {
                    AVChannelOrder::AV_CHANNEL_ORDER_NATIVE => default.u.mask,
                    _ => 0,
                };
                ffmpeg::ffi::av_channel_layout_uninit(&mut default);
                mask
            }
        }
        _ => 0,
    }
}

fn rational(r: ffmpeg::Rational) -> Rational {
    Rational::new(r.numerator(), r.denominator())
}

fn stream_info(stream: &ffmpeg::Stream) -> StreamInfo {
    let params = stream.parameters();
    // SAFETY: the parameters belong to `stream`, which outlives this borrow.
    let par = unsafe { &*params.as_ptr() };

    let parameters = match params.medium() {
        ffmpeg::media::Type::Audio => CodecParameters::Audio(AudioParameters {
            sample_rate: par.sample_rate.max(0) as u32,
            channels: par.ch_layout.nb_channels.max(0) as u16,
            channel_layout: channel_mask(&par.ch_layout),
            format: sample_format_from_raw(par.format),
            frame_size: par.frame_size.max(0) as u32,
        }),
        ffmpeg::media::Type::Video => {
            // The codec context carries the format as a typed AVPixelFormat
            let format = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_or(PixelFormat::None, |context| {
                    // SAFETY: `context` owns a valid codec context.
                    let pix_fmt = unsafe { (*context.as_ptr()).pix_fmt };
                    delivered_pixel_format(Pixel::from(pix_fmt))
                });
            CodecParameters::Video(VideoParameters {
                width: par.width.max(0) as u32,
                height: par.height.max(0) as u32,
                format,
            })
        }
        _ => CodecParameters::Other,
    };

    StreamInfo {
        index: stream.index(),
        codec_name: params.id().name().to_string(),
        time_base: rational(stream.time_base()),
        duration: stream.duration().max(0),
        bit_rate: par.bit_rate,
        parameters,
    }
}

/// Opens containers with libavformat.
pub struct FfmpegSource;

impl FfmpegSource {
    /// Initialize FFmpeg. Safe to call more than once.
    pub fn new() -> Result<Self> {
        ffmpeg::init().map_err(|e| AdapterError::AllocFailed(format!("FFmpeg init failed: {e}")))?;
        Ok(Self)
    }
}

impl MediaSource for FfmpegSource {
    fn open(&self, path: &Path) -> Result<Box<dyn Container>> {
        let input = ffmpeg::format::input(&path)
            .map_err(|e| AdapterError::OpenFailed(format!("{}: {}", path.display(), e)))?;

        let streams = input.streams().map(|stream| stream_info(&stream)).collect();
        // SAFETY: `input` owns a valid format context for its whole lifetime.
        let start_time = unsafe { (*input.as_ptr()).start_time };

        Ok(Box::new(FfmpegContainer {
            input,
            streams,
            start_time: (start_time != ffmpeg::ffi::AV_NOPTS_VALUE).then_some(start_time),
        }))
    }

    fn convert_backend(&self) -> Box<dyn ConvertBackend> {
        Box::new(FfmpegConvert)
    }
}

struct FfmpegContainer {
    input: ffmpeg::format::context::Input,
    streams: Vec<StreamInfo>,
    start_time: Option<i64>,
}

impl Container for FfmpegContainer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn start_time(&self) -> Option<i64> {
        self.start_time
    }

    fn read_packet(&mut self) -> Result<Packet> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => Ok(Packet {
                stream_index: packet.stream(),
                pts: packet.pts(),
                dts: packet.dts(),
                duration: packet.duration(),
                is_key: packet.is_key(),
                data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
            }),
            Err(ffmpeg::Error::Eof) => Err(AdapterError::EndOfStream),
            Err(e) => Err(AdapterError::Read(e.to_string())),
        }
    }

    fn seek(&mut self, timestamp: i64) -> Result<()> {
        // Upper bound = target: land on the closest seek point at or before it
        self.input
            .seek(timestamp, ..timestamp)
            .map_err(|e| AdapterError::SeekFailed(e.to_string()))
    }

    fn open_decoder(&mut self, index: usize) -> Result<Box<dyn StreamDecoder>> {
        let stream = self
            .input
            .stream(index)
            .ok_or_else(|| AdapterError::invalid_argument(format!("no stream {index}")))?;
        let params = stream.parameters();
        let codec_name = params.id().name().to_string();
        let time_base = rational(stream.time_base());

        let open_error = |e: ffmpeg::Error| match e {
            ffmpeg::Error::DecoderNotFound => AdapterError::NoDecoderFound(codec_name.clone()),
            other => AdapterError::DecoderOpen(format!("{}: {}", codec_name, other)),
        };

        let context = ffmpeg::codec::context::Context::from_parameters(params).map_err(open_error)?;
        let kind = match stream.parameters().medium() {
            ffmpeg::media::Type::Audio => DecoderKind::Audio(context.decoder().audio().map_err(open_error)?),
            ffmpeg::media::Type::Video => DecoderKind::Video(
                context.decoder().video().map_err(open_error)?,
                PixelNormalizer::default(),
            ),
            _ => return Err(AdapterError::NoDecoderFound(codec_name)),
        };
        debug!("opened {} decoder for stream #{}", codec_name, index);

        Ok(Box::new(FfmpegDecoder { kind, time_base }))
    }
}

/// Converts decoder output whose pixel format has no `PixelFormat` variant.
#[derive(Default)]
struct PixelNormalizer {
    context: Option<scaling::Context>,
}

// SAFETY: the scaling context is owned by a single decoder and only used
// through `&mut self`.
unsafe impl Send for PixelNormalizer {}

impl PixelNormalizer {
    fn convert(&mut self, frame: &ffmpeg::frame::Video) -> Result<VideoFrame> {
        let source = frame.format();
        let target = fallback_pixel_format(source);
        let pixel = to_ffmpeg_pixel(target)
            .ok_or_else(|| AdapterError::Decode(format!("unsupported pixel format {:?}", source)))?;
        let (width, height) = (frame.width(), frame.height());

        let stale = self.context.as_ref().map_or(true, |context| {
            let input = context.input();
            input.format != source || input.width != width || input.height != height
        });
        if stale {
            debug!("decoder outputs {:?}, converting to {:?}", source, target);
            let context = scaling::Context::get(
                source,
                width,
                height,
                pixel,
                width,
                height,
                scaling::Flags::BILINEAR,
            )
            .map_err(|e| AdapterError::Decode(format!("{:?} -> {:?}: {}", source, target, e)))?;
            self.context = Some(context);
        }

        let context = self
            .context
            .as_mut()
            .ok_or_else(|| AdapterError::Decode("no pixel format converter".to_string()))?;
        let mut converted = ffmpeg::frame::Video::empty();
        context
            .run(frame, &mut converted)
            .map_err(|e| AdapterError::Decode(e.to_string()))?;
        copy_video_frame(&converted, target)
    }
}

enum DecoderKind {
    Audio(ffmpeg::decoder::Audio),
    Video(ffmpeg::decoder::Video, PixelNormalizer),
}

struct FfmpegDecoder {
    kind: DecoderKind,
    time_base: Rational,
}

impl FfmpegDecoder {
    fn opened(&mut self) -> &mut ffmpeg::decoder::Opened {
        match &mut self.kind {
            DecoderKind::Audio(decoder) => decoder,
            DecoderKind::Video(decoder, _) => decoder,
        }
    }
}

fn receive_error(e: ffmpeg::Error) -> Result<Option<DecodedFrame>> {
    match e {
        ffmpeg::Error::Eof => Err(AdapterError::EndOfStream),
        ffmpeg::Error::Other { errno } if errno == ffmpeg::error::EAGAIN => Ok(None),
        other => Err(AdapterError::Decode(other.to_string())),
    }
}

impl StreamDecoder for FfmpegDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let mut av_packet = ffmpeg::Packet::copy(&packet.data);
        av_packet.set_pts(packet.pts);
        av_packet.set_dts(packet.dts);
        av_packet.set_duration(packet.duration);
        if packet.is_key {
            av_packet.set_flags(ffmpeg::packet::Flags::KEY);
        }
        self.opened()
            .send_packet(&av_packet)
            .map_err(|e| AdapterError::Decode(e.to_string()))
    }

    fn send_eof(&mut self) -> Result<()> {
        self.opened()
            .send_eof()
            .map_err(|e| AdapterError::Decode(e.to_string()))
    }

    fn receive_frame(&mut self) -> Result<Option<DecodedFrame>> {
        let time_base = self.time_base;
        match &mut self.kind {
            DecoderKind::Audio(decoder) => {
                let mut frame = ffmpeg::frame::Audio::empty();
                match decoder.receive_frame(&mut frame) {
                    Ok(()) => audio_frame(&frame, time_base).map(|f| Some(DecodedFrame::Audio(f))),
                    Err(e) => receive_error(e),
                }
            }
            DecoderKind::Video(decoder, normalizer) => {
                let mut frame = ffmpeg::frame::Video::empty();
                match decoder.receive_frame(&mut frame) {
                    Ok(()) => decoded_video(&frame, normalizer, time_base)
                        .map(|f| Some(DecodedFrame::Video(f))),
                    Err(e) => receive_error(e),
                }
            }
        }
    }

    fn flush(&mut self) {
        self.opened().flush();
    }
}

/// Copy a decoded FFmpeg audio frame.
fn audio_frame(frame: &ffmpeg::frame::Audio, time_base: Rational) -> Result<AudioFrame> {
    let format = sample_format_from_raw(AVSampleFormat::from(frame.format()) as i32);
    if !format.is_valid() {
        return Err(AdapterError::Decode(format!(
            "unsupported sample format {:?}",
            frame.format()
        )));
    }

    let channels = frame.channels();
    let nb_samples = frame.samples();
    let plane_bytes = if format.is_planar() {
        nb_samples * format.bytes_per_sample()
    } else {
        nb_samples * format.bytes_per_sample() * channels as usize
    };
    let plane_count = if format.is_planar() { channels as usize } else { 1 };
    if plane_count > frame.planes() {
        return Err(AdapterError::Decode(format!(
            "{} channel planar audio is not supported",
            channels
        )));
    }

    let planes = (0..plane_count)
        .map(|plane| {
            frame
                .data(plane)
                .get(..plane_bytes)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| AdapterError::Decode(format!("audio plane {plane} is truncated")))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(AudioFrame {
        planes,
        format,
        channels,
        sample_rate: frame.rate(),
        nb_samples,
        pts: frame.timestamp(),
        time_base,
    })
}

/// Copy a decoded video frame, converting formats we have no variant for.
fn decoded_video(
    frame: &ffmpeg::frame::Video,
    normalizer: &mut PixelNormalizer,
    time_base: Rational,
) -> Result<VideoFrame> {
    let mut output = match pixel_format_from_raw(AVPixelFormat::from(frame.format()) as i32) {
        PixelFormat::None => normalizer.convert(frame)?,
        format => copy_video_frame(frame, format)?,
    };
    output.pts = frame.timestamp();
    output.time_base = time_base;
    Ok(output)
}

/// Copy an FFmpeg video frame in `format` into a tightly packed frame.
pub(crate) fn copy_video_frame(frame: &ffmpeg::frame::Video, format: PixelFormat) -> Result<VideoFrame> {
    let (width, height) = (frame.width(), frame.height());
    let mut output = VideoFrame::alloc(width, height, format);
    for plane in 0..format.plane_count() {
        let stride = frame.stride(plane);
        let data = frame.data(plane);
        let row = output.linesize[plane];
        let (_, rows) = format.plane_size(plane, width, height);
        for y in 0..rows {
            let src = data
                .get(y * stride..y * stride + row)
                .ok_or_else(|| AdapterError::Decode(format!("video plane {plane} is truncated")))?;
            output.planes[plane][y * row..(y + 1) * row].copy_from_slice(src);
        }
    }
    Ok(output)
}
