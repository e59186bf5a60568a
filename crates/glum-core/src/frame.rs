//! Raw frame buffers: layout conversion to RGBA, mirroring, rescaling.

use image::imageops::{self, FilterType};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("invalid {layout:?} length: expected {expected}, got {actual}")]
    InvalidLength {
        layout: PixelLayout,
        expected: usize,
        actual: usize,
    },
    #[error("YUYV frames need an even width, got {0}")]
    OddYuyvWidth(u32),
}

/// Byte layout of a raw frame handed over by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    Rgba8,
    Rgb8,
    Gray8,
    /// Packed 4:2:2, `[Y0, U, Y1, V]` per pixel pair.
    Yuyv,
}

impl PixelLayout {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelLayout::Rgba8 => 4,
            PixelLayout::Rgb8 => 3,
            PixelLayout::Gray8 => 1,
            PixelLayout::Yuyv => 2,
        }
    }
}

/// Convert a raw buffer into the RGBA working format.
///
/// Trailing bytes beyond `width * height` pixels are ignored.
pub fn to_rgba(raw: &[u8], width: u32, height: u32, layout: PixelLayout) -> Result<RgbaImage, FrameError> {
    let pixels = width as usize * height as usize;
    let expected = pixels * layout.bytes_per_pixel();
    if raw.len() < expected {
        return Err(FrameError::InvalidLength {
            layout,
            expected,
            actual: raw.len(),
        });
    }
    let raw = &raw[..expected];

    let data: Vec<u8> = match layout {
        PixelLayout::Rgba8 => raw.to_vec(),
        PixelLayout::Rgb8 => raw
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 255])
            .collect(),
        PixelLayout::Gray8 => raw.iter().flat_map(|&g| [g, g, g, 255]).collect(),
        PixelLayout::Yuyv => {
            if width % 2 != 0 {
                return Err(FrameError::OddYuyvWidth(width));
            }
            raw.chunks_exact(4)
                .flat_map(|q| {
                    let [r0, g0, b0] = yuv_to_rgb(q[0], q[1], q[3]);
                    let [r1, g1, b1] = yuv_to_rgb(q[2], q[1], q[3]);
                    [r0, g0, b0, 255, r1, g1, b1, 255]
                })
                .collect()
        }
    };

    // Length was checked above, so the buffer always fits.
    RgbaImage::from_raw(width, height, data).ok_or(FrameError::InvalidLength {
        layout,
        expected,
        actual: raw.len(),
    })
}

/// BT.601 limited-range YUV → RGB.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = (y as f32 - 16.0) * 1.164;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let r = c + 1.596 * e;
    let g = c - 0.392 * d - 0.813 * e;
    let b = c + 2.017 * d;
    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    ]
}

/// Flip left-right in place (selfie view).
pub fn mirror_horizontal(frame: &mut RgbaImage) {
    imageops::flip_horizontal_in_place(frame);
}

/// Working resolution for a source scale in `(0, 1]`; never below 1×1.
pub fn scaled_dimensions(width: u32, height: u32, scale: f64) -> (u32, u32) {
    let w = ((width as f64 * scale).round() as u32).max(1);
    let h = ((height as f64 * scale).round() as u32).max(1);
    (w, h)
}

/// Resample `src` into `dst`'s size, reusing `dst`'s allocation when possible.
pub fn resize_into(src: &RgbaImage, width: u32, height: u32, dst: &mut RgbaImage) {
    if src.dimensions() == (width, height) {
        dst.clone_from(src);
        return;
    }
    *dst = imageops::resize(src, width, height, FilterType::Triangle);
}
