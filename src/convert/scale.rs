//! Image scaling and pixel format conversion.
//!
//! Scaling runs per plane in the source format. When the target format
//! differs, the scaled image is then converted through an RGBA pivot using
//! BT.601 limited-range YUV.

use serde::{Deserialize, Serialize};

use crate::media::error::{AdapterError, Result};
use crate::media::format::PixelFormat;
use crate::media::frame::VideoFrame;

/// Scaling algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAlgorithm {
    /// Fastest, blocky
    Nearest,
    #[default]
    Bilinear,
}

/// Geometry and format of one side of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSpec {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl VideoSpec {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    pub fn of(frame: &VideoFrame) -> Self {
        Self::new(frame.width, frame.height, frame.format)
    }

    pub fn is_complete(&self) -> bool {
        self.width > 0 && self.height > 0 && self.format.is_valid()
    }
}

/// Scaler from `src` to `dst`
#[derive(Debug)]
pub struct Scaler {
    src: VideoSpec,
    dst: VideoSpec,
    algorithm: ScaleAlgorithm,
}

impl Scaler {
    /// Build a scaler. Fails with `AllocFailed` if either side is incomplete.
    pub fn new(src: VideoSpec, dst: VideoSpec, algorithm: ScaleAlgorithm) -> Result<Self> {
        if !src.is_complete() || !dst.is_complete() {
            return Err(AdapterError::AllocFailed(format!(
                "cannot scale {:?} to {:?}",
                src, dst
            )));
        }
        Ok(Self {
            src,
            dst,
            algorithm,
        })
    }

    pub fn src(&self) -> VideoSpec {
        self.src
    }

    pub fn dst(&self) -> VideoSpec {
        self.dst
    }

    /// Scale and convert one frame. Timestamps are copied from the input.
    pub fn scale(&self, frame: &VideoFrame) -> Result<VideoFrame> {
        if VideoSpec::of(frame) != self.src {
            return Err(AdapterError::conversion(format!(
                "frame is {:?}, scaler expects {:?}",
                VideoSpec::of(frame),
                self.src
            )));
        }
        check_planes(frame)?;

        let resized = if self.src.width == self.dst.width && self.src.height == self.dst.height {
            frame.clone()
        } else {
            self.resize(frame)
        };

        let mut output = if self.src.format == self.dst.format {
            resized
        } else {
            convert_format(&resized, self.dst.format)
        };
        output.pts = frame.pts;
        output.time_base = frame.time_base;
        Ok(output)
    }

    /// Resize in the source format
    fn resize(&self, frame: &VideoFrame) -> VideoFrame {
        let format = frame.format;
        let mut output = VideoFrame::alloc(self.dst.width, self.dst.height, format);
        for plane in 0..format.plane_count() {
            let (sw, sh) = format.plane_size(plane, frame.width, frame.height);
            let (dw, dh) = format.plane_size(plane, self.dst.width, self.dst.height);
            let src = PlaneRef {
                data: &frame.planes[plane],
                linesize: frame.linesize[plane],
                width: sw,
                height: sh,
            };
            let dst_linesize = output.linesize[plane];
            scale_plane(
                &src,
                &mut output.planes[plane],
                dst_linesize,
                dw,
                dh,
                format.plane_components(plane),
                self.algorithm,
            );
        }
        output
    }
}

fn check_planes(frame: &VideoFrame) -> Result<()> {
    let format = frame.format;
    if frame.planes.len() < format.plane_count() || frame.linesize.len() < format.plane_count() {
        return Err(AdapterError::conversion(format!(
            "{:?} frame needs {} planes",
            format,
            format.plane_count()
        )));
    }
    for plane in 0..format.plane_count() {
        let (w, h) = format.plane_size(plane, frame.width, frame.height);
        let row = w * format.plane_components(plane);
        let stride = frame.linesize[plane];
        if stride < row || frame.planes[plane].len() < stride * (h - 1) + row {
            return Err(AdapterError::conversion(format!(
                "plane {plane} too small for {}x{}",
                frame.width, frame.height
            )));
        }
    }
    Ok(())
}

struct PlaneRef<'a> {
    data: &'a [u8],
    linesize: usize,
    width: usize,
    height: usize,
}

fn scale_plane(
    src: &PlaneRef<'_>,
    dst: &mut [u8],
    dst_linesize: usize,
    dst_width: usize,
    dst_height: usize,
    components: usize,
    algorithm: ScaleAlgorithm,
) {
    for y in 0..dst_height {
        let (y0, y1, fy) = map_coord(y, dst_height, src.height, algorithm);
        for x in 0..dst_width {
            let (x0, x1, fx) = map_coord(x, dst_width, src.width, algorithm);
            for c in 0..components {
                let p = |px: usize, py: usize| src.data[py * src.linesize + px * components + c] as f32;
                let value = match algorithm {
                    ScaleAlgorithm::Nearest => p(x0, y0),
                    ScaleAlgorithm::Bilinear => {
                        let top = p(x0, y0) + (p(x1, y0) - p(x0, y0)) * fx;
                        let bottom = p(x0, y1) + (p(x1, y1) - p(x0, y1)) * fx;
                        top + (bottom - top) * fy
                    }
                };
                dst[y * dst_linesize + x * components + c] = value.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Map a destination index to (src index, next src index, fraction).
fn map_coord(dst_idx: usize, dst_size: usize, src_size: usize, algorithm: ScaleAlgorithm) -> (usize, usize, f32) {
    let last = src_size.saturating_sub(1);
    match algorithm {
        ScaleAlgorithm::Nearest => {
            let idx = (dst_idx * src_size / dst_size.max(1)).min(last);
            (idx, idx, 0.0)
        }
        ScaleAlgorithm::Bilinear => {
            let pos = ((dst_idx as f32 + 0.5) * src_size as f32 / dst_size as f32 - 0.5).max(0.0);
            let idx0 = (pos.floor() as usize).min(last);
            let idx1 = (idx0 + 1).min(last);
            (idx0, idx1, pos - idx0 as f32)
        }
    }
}

/// Convert pixel format at equal size through an RGBA pivot.
fn convert_format(src: &VideoFrame, format: PixelFormat) -> VideoFrame {
    let (width, height) = (src.width as usize, src.height as usize);
    let mut dst = VideoFrame::alloc(src.width, src.height, format);

    match format {
        PixelFormat::Yuv420p | PixelFormat::Yuv422p | PixelFormat::Yuv444p | PixelFormat::Nv12 => {
            for y in 0..height {
                for x in 0..width {
                    let [r, g, b, _] = read_rgba(src, x, y);
                    dst.planes[0][y * dst.linesize[0] + x] = rgb_to_yuv(r, g, b).0;
                }
            }

            // One chroma sample per subsampled cell, averaged over the cell
            let (sx, sy) = format.chroma_shift();
            let (cw, ch) = format.plane_size(1, src.width, src.height);
            for cy in 0..ch {
                for cx in 0..cw {
                    let (mut r, mut g, mut b, mut n) = (0u32, 0u32, 0u32, 0u32);
                    for y in (cy << sy)..((cy + 1) << sy).min(height) {
                        for x in (cx << sx)..((cx + 1) << sx).min(width) {
                            let [pr, pg, pb, _] = read_rgba(src, x, y);
                            r += pr as u32;
                            g += pg as u32;
                            b += pb as u32;
                            n += 1;
                        }
                    }
                    let n = n.max(1);
                    let (_, u, v) = rgb_to_yuv((r / n) as u8, (g / n) as u8, (b / n) as u8);
                    if format == PixelFormat::Nv12 {
                        let offset = cy * dst.linesize[1] + cx * 2;
                        dst.planes[1][offset] = u;
                        dst.planes[1][offset + 1] = v;
                    } else {
                        dst.planes[1][cy * dst.linesize[1] + cx] = u;
                        dst.planes[2][cy * dst.linesize[2] + cx] = v;
                    }
                }
            }
        }
        PixelFormat::Rgb24 | PixelFormat::Bgr24 | PixelFormat::Rgba | PixelFormat::Bgra | PixelFormat::Gray8 => {
            let components = format.plane_components(0);
            for y in 0..height {
                for x in 0..width {
                    let [r, g, b, a] = read_rgba(src, x, y);
                    let offset = y * dst.linesize[0] + x * components;
                    let out = &mut dst.planes[0][offset..offset + components];
                    match format {
                        PixelFormat::Rgb24 => out.copy_from_slice(&[r, g, b]),
                        PixelFormat::Bgr24 => out.copy_from_slice(&[b, g, r]),
                        PixelFormat::Rgba => out.copy_from_slice(&[r, g, b, a]),
                        PixelFormat::Bgra => out.copy_from_slice(&[b, g, r, a]),
                        _ => out[0] = luma(r, g, b),
                    }
                }
            }
        }
        PixelFormat::None => {}
    }

    dst
}

fn read_rgba(frame: &VideoFrame, x: usize, y: usize) -> [u8; 4] {
    let format = frame.format;
    let (sx, sy) = format.chroma_shift();
    let (cx, cy) = (x >> sx, y >> sy);
    let planes = &frame.planes;
    let ls = &frame.linesize;

    match format {
        PixelFormat::Yuv420p | PixelFormat::Yuv422p | PixelFormat::Yuv444p => {
            let luma = planes[0][y * ls[0] + x];
            let u = planes[1][cy * ls[1] + cx];
            let v = planes[2][cy * ls[2] + cx];
            let (r, g, b) = yuv_to_rgb(luma, u, v);
            [r, g, b, 255]
        }
        PixelFormat::Nv12 => {
            let luma = planes[0][y * ls[0] + x];
            let offset = cy * ls[1] + cx * 2;
            let (r, g, b) = yuv_to_rgb(luma, planes[1][offset], planes[1][offset + 1]);
            [r, g, b, 255]
        }
        PixelFormat::Rgb24 => {
            let p = &planes[0][y * ls[0] + x * 3..];
            [p[0], p[1], p[2], 255]
        }
        PixelFormat::Bgr24 => {
            let p = &planes[0][y * ls[0] + x * 3..];
            [p[2], p[1], p[0], 255]
        }
        PixelFormat::Rgba => {
            let p = &planes[0][y * ls[0] + x * 4..];
            [p[0], p[1], p[2], p[3]]
        }
        PixelFormat::Bgra => {
            let p = &planes[0][y * ls[0] + x * 4..];
            [p[2], p[1], p[0], p[3]]
        }
        PixelFormat::Gray8 => {
            let g = planes[0][y * ls[0] + x];
            [g, g, g, 255]
        }
        PixelFormat::None => [0, 0, 0, 255],
    }
}

fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (clamp_u8(y), clamp_u8(u), clamp_u8(v))
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;
    (clamp_u8(r), clamp_u8(g), clamp_u8(b))
}

/// Full-range luma for gray output
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32 + 128) >> 8) as u8
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}
