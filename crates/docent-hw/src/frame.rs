//! Frame type and pixel conversion: YUYV/RGB3/MJPG to RGB, JPEG encoding.

use docent_core::EncodedImage;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};

/// A captured RGB8 camera frame, sized to the live stream dimensions.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Wrap RGB8 pixels, checking the buffer matches the dimensions.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = rgb_len(width, height);
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// Average luma (0.0–255.0), BT.601 weights.
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .data
            .chunks_exact(3)
            .map(luma)
            .sum();
        sum / (self.data.len() / 3) as f32
    }

    /// True when almost every pixel is near black (lens covered, exposure
    /// not settled yet).
    pub fn is_dark(&self) -> bool {
        let pixels = self.data.len() / 3;
        if pixels == 0 {
            return true;
        }
        let dark = self
            .data
            .chunks_exact(3)
            .filter(|px| luma(px) < DARK_LUMA)
            .count();
        dark as f32 / pixels as f32 > DARK_FRACTION
    }

    /// Encode as JPEG. Lower quality keeps the upload small.
    pub fn encode_jpeg(&self, quality: u8) -> Result<EncodedImage, FrameError> {
        let mut out = Vec::with_capacity(self.data.len() / 8);
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode(
            &self.data,
            self.width,
            self.height,
            ExtendedColorType::Rgb8,
        )?;
        Ok(EncodedImage::jpeg(out))
    }
}

/// Pixels below this luma count as dark.
const DARK_LUMA: f32 = 32.0;
/// Share of dark pixels above which the whole frame is dark.
const DARK_FRACTION: f32 = 0.95;

fn luma(px: &[u8]) -> f32 {
    0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32
}

fn rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

/// Convert packed YUYV (4:2:2) to RGB8.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
/// `stride` is the driver's bytes per line; 0 means tightly packed.
pub fn yuyv_to_rgb(
    yuyv: &[u8],
    width: u32,
    height: u32,
    stride: u32,
) -> Result<Vec<u8>, FrameError> {
    let mut rgb = Vec::with_capacity(rgb_len(width, height));
    for row in rows(yuyv, width as usize * 2, height, stride)? {
        for chunk in row.chunks_exact(4) {
            let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
            rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
            rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
        }
    }
    Ok(rgb)
}

/// Split a buffer into `height` rows of `row_len` bytes, skipping the
/// padding at the end of each line.
fn rows(
    buf: &[u8],
    row_len: usize,
    height: u32,
    stride: u32,
) -> Result<impl Iterator<Item = &[u8]>, FrameError> {
    let stride = (stride as usize).max(row_len);
    let height = height as usize;
    let expected = match height {
        0 => 0,
        h => stride * (h - 1) + row_len,
    };
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    Ok((0..height).map(move |r| &buf[r * stride..r * stride + row_len]))
}

/// BT.601 full-range YCbCr → RGB.
fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let cb = u as f32 - 128.0;
    let cr = v as f32 - 128.0;
    let r = y + 1.402 * cr;
    let g = y - 0.344_136 * cb - 0.714_136 * cr;
    let b = y + 1.772 * cb;
    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Copy a packed RGB24 buffer, dropping per-line padding.
pub fn rgb24_copy(buf: &[u8], width: u32, height: u32, stride: u32) -> Result<Vec<u8>, FrameError> {
    let mut rgb = Vec::with_capacity(rgb_len(width, height));
    for row in rows(buf, width as usize * 3, height, stride)? {
        rgb.extend_from_slice(row);
    }
    Ok(rgb)
}

/// Decode a Motion-JPEG buffer. Returns pixels and the decoded dimensions.
pub fn mjpeg_to_rgb(buf: &[u8]) -> Result<(Vec<u8>, u32, u32), FrameError> {
    let decoded = image::load_from_memory_with_format(buf, ImageFormat::Jpeg)?.to_rgb8();
    let (width, height) = decoded.dimensions();
    Ok((decoded.into_raw(), width, height))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image codec: {0}")]
    Codec(#[from] image::ImageError),
}
