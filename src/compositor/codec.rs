//! Pixel decoding for damage regions and encoding for snapshots.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, ImageFormat, RgbImage, RgbaImage};
use std::fmt;
use std::str::FromStr;

use crate::error::{PilotError, PilotResult};

/// Encodings a damage region may arrive in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionEncoding {
    /// Packed RGB, 3 bytes per pixel
    Rgb24,
    /// Packed RGBA/RGBX, 4 bytes per pixel, alpha ignored
    Rgb32,
    Png,
    Jpeg,
    Webp,
}

impl RegionEncoding {
    /// Map a host encoding tag; `None` for tags we cannot composite
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "rgb24" => RegionEncoding::Rgb24,
            "rgb32" | "rgbx" | "rgba" => RegionEncoding::Rgb32,
            "png" | "png/L" | "png/P" => RegionEncoding::Png,
            "jpeg" => RegionEncoding::Jpeg,
            "webp" => RegionEncoding::Webp,
            _ => return None,
        })
    }
}

/// Decode a damage payload into an RGB region of at most `width`×`height`
pub fn decode_region(tag: &str, width: u32, height: u32, data: &[u8]) -> PilotResult<RgbImage> {
    let encoding = RegionEncoding::from_tag(tag)
        .ok_or_else(|| PilotError::UnsupportedEncoding(tag.to_string()))?;
    let fail = |reason: String| PilotError::RegionDecode {
        encoding: tag.to_string(),
        reason,
    };

    let region = match encoding {
        RegionEncoding::Rgb24 => {
            let len = packed_len(width, height, 3).ok_or_else(|| fail("region too large".into()))?;
            if data.len() < len {
                return Err(fail(format!("expected {} bytes, got {}", len, data.len())));
            }
            RgbImage::from_raw(width, height, data[..len].to_vec())
                .ok_or_else(|| fail("buffer size mismatch".into()))?
        }
        RegionEncoding::Rgb32 => {
            let len = packed_len(width, height, 4).ok_or_else(|| fail("region too large".into()))?;
            if data.len() < len {
                return Err(fail(format!("expected {} bytes, got {}", len, data.len())));
            }
            let rgba = RgbaImage::from_raw(width, height, data[..len].to_vec())
                .ok_or_else(|| fail("buffer size mismatch".into()))?;
            image::DynamicImage::ImageRgba8(rgba).to_rgb8()
        }
        RegionEncoding::Png | RegionEncoding::Jpeg | RegionEncoding::Webp => {
            let format = match encoding {
                RegionEncoding::Png => ImageFormat::Png,
                RegionEncoding::Jpeg => ImageFormat::Jpeg,
                _ => ImageFormat::WebP,
            };
            let decoded = image::load_from_memory_with_format(data, format)
                .map_err(|e| fail(e.to_string()))?
                .to_rgb8();
            // The damage rectangle bounds what we paste, whatever the image says
            if decoded.width() > width || decoded.height() > height {
                imageops::crop_imm(&decoded, 0, 0, width.min(decoded.width()), height.min(decoded.height()))
                    .to_image()
            } else {
                decoded
            }
        }
    };

    Ok(region)
}

fn packed_len(width: u32, height: u32, channels: usize) -> Option<usize> {
    (width as usize).checked_mul(height as usize)?.checked_mul(channels)
}

/// Snapshot output encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotFormat {
    /// Lossy, honours the quality setting
    Jpeg,
    /// Lossless
    Png,
    /// Uncompressed packed RGB
    Raw,
}

impl SnapshotFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotFormat::Jpeg => "jpeg",
            SnapshotFormat::Png => "png",
            SnapshotFormat::Raw => "raw",
        }
    }
}

impl fmt::Display for SnapshotFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotFormat {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jpeg" | "jpg" => Ok(SnapshotFormat::Jpeg),
            "png" => Ok(SnapshotFormat::Png),
            "raw" => Ok(SnapshotFormat::Raw),
            other => Err(PilotError::Snapshot(format!("unknown snapshot format {other:?}"))),
        }
    }
}

/// How a snapshot is encoded and sized
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotSettings {
    pub format: SnapshotFormat,
    pub quality: u8,
    pub scale: f64,
    pub max_dimension: u32,
}

impl SnapshotSettings {
    /// Output size for a buffer of `width`×`height`
    ///
    /// A scale below 1 wins; otherwise the larger side is capped to
    /// `max_dimension` keeping the aspect ratio.
    pub fn target_size(&self, width: u32, height: u32) -> (u32, u32) {
        if self.scale > 0.0 && self.scale < 1.0 {
            return (
                ((f64::from(width) * self.scale) as u32).max(1),
                ((f64::from(height) * self.scale) as u32).max(1),
            );
        }
        let largest = width.max(height);
        if self.max_dimension > 0 && largest > self.max_dimension {
            let ratio = f64::from(self.max_dimension) / f64::from(largest);
            return (
                ((f64::from(width) * ratio) as u32).max(1),
                ((f64::from(height) * ratio) as u32).max(1),
            );
        }
        (width, height)
    }
}

/// Resize and encode a consistent buffer copy
pub fn encode_snapshot(image: RgbImage, settings: &SnapshotSettings) -> PilotResult<(Vec<u8>, u32, u32)> {
    let (width, height) = settings.target_size(image.width(), image.height());
    let image = if (width, height) != image.dimensions() {
        imageops::resize(&image, width, height, FilterType::Lanczos3)
    } else {
        image
    };

    let data = match settings.format {
        SnapshotFormat::Raw => image.into_raw(),
        SnapshotFormat::Jpeg => {
            let mut out = Vec::new();
            JpegEncoder::new_with_quality(&mut out, settings.quality.clamp(1, 100))
                .write_image(image.as_raw(), width, height, ExtendedColorType::Rgb8)
                .map_err(|e| PilotError::Snapshot(e.to_string()))?;
            out
        }
        SnapshotFormat::Png => {
            let mut out = Vec::new();
            PngEncoder::new(&mut out)
                .write_image(image.as_raw(), width, height, ExtendedColorType::Rgb8)
                .map_err(|e| PilotError::Snapshot(e.to_string()))?;
            out
        }
    };

    Ok((data, width, height))
}
