//! The frame encoding boundary and the JPEG formatter.
//!
//! A formatter turns raw device frames into the wire bytes consumers
//! receive. It is configured once per capture run with the negotiated
//! device format, then fed frames one at a time; `encode` is a pure
//! transform.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use thiserror::Error;

use crate::types::{PixelLayout, RawFrame, SourceFormat};

/// Default JPEG quality, same as the usual webcam sweet spot.
pub const JPEG_QUALITY: u8 = 85;

/// Faults at the encoding boundary.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unsupported pixel layout: {0}")]
    UnsupportedLayout(PixelLayout),

    #[error("formatter used before configure")]
    NotConfigured,

    #[error("frame is {actual} bytes, format needs {expected}")]
    Truncated { expected: usize, actual: usize },

    #[error("frame encoding failed: {0}")]
    Encode(String),
}

/// Converts raw frames into the wire representation.
pub trait FrameFormatter: Send {
    /// Called once per capture run, before any frame is encoded. Rejecting
    /// the layout here is fatal to the run.
    fn configure(&mut self, format: &SourceFormat) -> Result<(), FormatError>;

    /// Encode one raw frame.
    fn encode(&mut self, frame: &RawFrame) -> Result<Bytes, FormatError>;
}

/// JPEG encoder for YUYV and RGB24 device formats.
pub struct JpegFormatter {
    quality: u8,
    configured: Option<Configured>,
}

struct Configured {
    format: SourceFormat,
    /// RGB scratch buffer, reused across frames.
    rgb: Vec<u8>,
}

impl JpegFormatter {
    pub fn new() -> Self {
        Self::with_quality(JPEG_QUALITY)
    }

    pub fn with_quality(quality: u8) -> Self {
        Self {
            quality,
            configured: None,
        }
    }
}

impl Default for JpegFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameFormatter for JpegFormatter {
    fn configure(&mut self, format: &SourceFormat) -> Result<(), FormatError> {
        match format.layout {
            PixelLayout::Yuyv | PixelLayout::Rgb24 => {}
            other => return Err(FormatError::UnsupportedLayout(other)),
        }
        let rgb = vec![0u8; format.width as usize * format.height as usize * 3];
        self.configured = Some(Configured {
            format: *format,
            rgb,
        });
        Ok(())
    }

    fn encode(&mut self, frame: &RawFrame) -> Result<Bytes, FormatError> {
        let configured = self.configured.as_mut().ok_or(FormatError::NotConfigured)?;
        let format = &configured.format;
        let width = format.width;
        let height = format.height;

        let rgb: &[u8] = match format.layout {
            PixelLayout::Yuyv => {
                let expected = width as usize * height as usize * 2;
                if frame.data.len() < expected {
                    return Err(FormatError::Truncated {
                        expected,
                        actual: frame.data.len(),
                    });
                }
                yuyv_to_rgb(&frame.data[..expected], &mut configured.rgb);
                &configured.rgb
            }
            PixelLayout::Rgb24 => {
                let expected = width as usize * height as usize * 3;
                if frame.data.len() < expected {
                    return Err(FormatError::Truncated {
                        expected,
                        actual: frame.data.len(),
                    });
                }
                &frame.data[..expected]
            }
            other => return Err(FormatError::UnsupportedLayout(other)),
        };

        let mut jpeg = Vec::with_capacity(rgb.len() / 8);
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, self.quality);
        encoder
            .encode(rgb, width, height, ExtendedColorType::Rgb8)
            .map_err(|e| FormatError::Encode(e.to_string()))?;
        Ok(Bytes::from(jpeg))
    }
}

/// Expand packed YUYV (Y0 U Y1 V, BT.601) into packed RGB24.
///
/// `rgb` must hold exactly three bytes per pixel; each 4-byte input chunk
/// produces two pixels.
fn yuyv_to_rgb(yuyv: &[u8], rgb: &mut [u8]) {
    for (src, dst) in yuyv.chunks_exact(4).zip(rgb.chunks_exact_mut(6)) {
        let u = src[1] as f32 - 128.0;
        let v = src[3] as f32 - 128.0;
        write_pixel(src[0] as f32, u, v, &mut dst[0..3]);
        write_pixel(src[2] as f32, u, v, &mut dst[3..6]);
    }
}

fn write_pixel(y: f32, u: f32, v: f32, dst: &mut [u8]) {
    dst[0] = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
    dst[1] = (y - 0.344_136 * u - 0.714_136 * v).clamp(0.0, 255.0) as u8;
    dst[2] = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
}
