//! Sample and pixel format enums.
//!
//! Both enums carry a `None` sentinel so host-provided raw values that do not
//! name a known format survive until validation, where they are rejected.

use serde::{Deserialize, Serialize};

/// Kind of elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
    /// Subtitles, data, attachments. Never selected.
    Other,
}

/// Audio sample format. `P` suffix marks planar layouts (one plane per channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    #[default]
    None,
    U8,
    S16,
    S32,
    F32,
    F64,
    U8p,
    S16p,
    S32p,
    F32p,
    F64p,
}

impl SampleFormat {
    /// Number of known formats, excluding the `None` sentinel.
    pub const COUNT: i32 = 10;

    const ALL: [SampleFormat; Self::COUNT as usize] = [
        Self::U8,
        Self::S16,
        Self::S32,
        Self::F32,
        Self::F64,
        Self::U8p,
        Self::S16p,
        Self::S32p,
        Self::F32p,
        Self::F64p,
    ];

    /// Map a raw host index to a format. Negative or out-of-range indices map to `None`.
    pub fn from_index(index: i32) -> Self {
        if index < 0 || index >= Self::COUNT {
            return Self::None;
        }
        Self::ALL[index as usize]
    }

    /// Raw host index, -1 for `None`.
    pub fn index(self) -> i32 {
        Self::ALL
            .iter()
            .position(|f| *f == self)
            .map(|i| i as i32)
            .unwrap_or(-1)
    }

    pub fn is_valid(self) -> bool {
        self != Self::None
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::None => 0,
            Self::U8 | Self::U8p => 1,
            Self::S16 | Self::S16p => 2,
            Self::S32 | Self::S32p | Self::F32 | Self::F32p => 4,
            Self::F64 | Self::F64p => 8,
        }
    }

    pub fn is_planar(self) -> bool {
        matches!(
            self,
            Self::U8p | Self::S16p | Self::S32p | Self::F32p | Self::F64p
        )
    }

    /// The interleaved counterpart of this format.
    pub fn packed(self) -> Self {
        match self {
            Self::U8p => Self::U8,
            Self::S16p => Self::S16,
            Self::S32p => Self::S32,
            Self::F32p => Self::F32,
            Self::F64p => Self::F64,
            other => other,
        }
    }
}

/// Video pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    #[default]
    None,
    /// Planar YUV 4:2:0
    Yuv420p,
    /// Planar YUV 4:2:2
    Yuv422p,
    /// Planar YUV 4:4:4
    Yuv444p,
    /// Semi-planar YUV 4:2:0 (Y plane + interleaved UV plane)
    Nv12,
    Rgb24,
    Bgr24,
    Rgba,
    Bgra,
    Gray8,
}

impl PixelFormat {
    /// Number of known formats, excluding the `None` sentinel.
    pub const COUNT: i32 = 9;

    const ALL: [PixelFormat; Self::COUNT as usize] = [
        Self::Yuv420p,
        Self::Yuv422p,
        Self::Yuv444p,
        Self::Nv12,
        Self::Rgb24,
        Self::Bgr24,
        Self::Rgba,
        Self::Bgra,
        Self::Gray8,
    ];

    /// Map a raw host index to a format. Negative or out-of-range indices map to `None`.
    pub fn from_index(index: i32) -> Self {
        if index < 0 || index >= Self::COUNT {
            return Self::None;
        }
        Self::ALL[index as usize]
    }

    /// Raw host index, -1 for `None`.
    pub fn index(self) -> i32 {
        Self::ALL
            .iter()
            .position(|f| *f == self)
            .map(|i| i as i32)
            .unwrap_or(-1)
    }

    pub fn is_valid(self) -> bool {
        self != Self::None
    }

    pub fn plane_count(self) -> usize {
        match self {
            Self::None => 0,
            Self::Yuv420p | Self::Yuv422p | Self::Yuv444p => 3,
            Self::Nv12 => 2,
            Self::Rgb24 | Self::Bgr24 | Self::Rgba | Self::Bgra | Self::Gray8 => 1,
        }
    }

    /// Bytes per pixel within `plane`.
    pub fn plane_components(self, plane: usize) -> usize {
        match (self, plane) {
            (Self::Rgb24 | Self::Bgr24, 0) => 3,
            (Self::Rgba | Self::Bgra, 0) => 4,
            (Self::Nv12, 1) => 2,
            (Self::None, _) => 0,
            _ => 1,
        }
    }

    /// Chroma subsampling shift (horizontal, vertical) for non-luma planes.
    pub fn chroma_shift(self) -> (u32, u32) {
        match self {
            Self::Yuv420p | Self::Nv12 => (1, 1),
            Self::Yuv422p => (1, 0),
            _ => (0, 0),
        }
    }

    /// Size of `plane` in pixels (width, rows) for a `width` x `height` image.
    pub fn plane_size(self, plane: usize, width: u32, height: u32) -> (usize, usize) {
        if plane == 0 {
            return (width as usize, height as usize);
        }
        let (sx, sy) = self.chroma_shift();
        let w = (width + (1 << sx) - 1) >> sx;
        let h = (height + (1 << sy) - 1) >> sy;
        (w as usize, h as usize)
    }

    /// Tightly packed line size of `plane` in bytes.
    pub fn linesize(self, plane: usize, width: u32) -> usize {
        let (w, _) = self.plane_size(plane, width, 1);
        w * self.plane_components(plane)
    }
}

/// Default channel layout mask for a channel count (FL|FR for stereo, FC for mono).
pub fn default_channel_layout(channels: u16) -> u64 {
    match channels {
        0 => 0,
        1 => 0x4,
        2 => 0x3,
        n if n >= 64 => u64::MAX,
        n => (1u64 << n) - 1,
    }
}
