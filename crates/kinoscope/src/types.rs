//! Value types shared across the capture pipeline.

use std::fmt;

use bytes::Bytes;

/// Pixel layout negotiated with a capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// Packed YUV 4:2:2 (Y0 U Y1 V), the common USB webcam default.
    Yuyv,
    /// Packed 24-bit RGB.
    Rgb24,
    /// Anything else, carried as the raw fourcc for diagnostics.
    Unknown(u32),
}

impl fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yuyv => f.write_str("YUYV"),
            Self::Rgb24 => f.write_str("RGB3"),
            Self::Unknown(fourcc) => {
                let bytes = fourcc.to_le_bytes();
                if bytes.iter().all(|b| b.is_ascii_graphic()) {
                    for b in bytes {
                        write!(f, "{}", b as char)?;
                    }
                    Ok(())
                } else {
                    write!(f, "0x{fourcc:08x}")
                }
            }
        }
    }
}

/// Format negotiated when a device is opened, fixed for one capture run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFormat {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    /// Size in bytes of one raw frame buffer.
    pub buffer_size: usize,
}

/// One raw frame as produced by a source.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Bytes,
    /// Driver-assigned sequence number, monotonic while the device is open.
    pub sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_display() {
        assert_eq!(PixelLayout::Yuyv.to_string(), "YUYV");
        assert_eq!(PixelLayout::Rgb24.to_string(), "RGB3");
        assert_eq!(
            PixelLayout::Unknown(u32::from_le_bytes(*b"MJPG")).to_string(),
            "MJPG"
        );
        assert_eq!(PixelLayout::Unknown(3).to_string(), "0x00000003");
    }
}
