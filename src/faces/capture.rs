//! Decoding captured frames (files, raw bytes, base64 uploads) into images.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::{DynamicImage, GenericImageView};
use std::io::Cursor;
use std::path::Path;

use crate::error::RollcallError;

/// One decoded, upright camera frame.
#[derive(Debug, Clone)]
pub struct Capture {
    image: DynamicImage,
}

impl Capture {
    pub fn from_image(image: DynamicImage) -> Self {
        Self { image }
    }

    /// Decode a raw base64 payload or a `data:image/...;base64,` URL.
    pub fn from_base64(input: &str) -> Result<Self, RollcallError> {
        let payload = match input.trim().strip_prefix("data:") {
            Some(rest) => rest
                .split_once(',')
                .map(|(_, payload)| payload)
                .ok_or_else(|| RollcallError::InvalidImage("data URL has no payload".to_string()))?,
            None => input.trim(),
        };

        // Uploads are often line-wrapped
        let payload: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let bytes = BASE64
            .decode(payload)
            .map_err(|e| RollcallError::InvalidImage(format!("invalid base64: {}", e)))?;

        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RollcallError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| RollcallError::InvalidImage(e.to_string()))?;

        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(RollcallError::InvalidImage("image has zero size".to_string()));
        }

        let image = match read_exif_rotation(bytes) {
            90 => image.rotate90(),
            180 => image.rotate180(),
            270 => image.rotate270(),
            _ => image,
        };

        Ok(Self { image })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read capture {}", path.display()))?;
        let capture = Self::from_bytes(&bytes)
            .with_context(|| format!("Failed to decode capture {}", path.display()))?;
        Ok(capture)
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Convert EXIF orientation value (1-8) to rotation degrees (0, 90, 180, 270)
fn exif_orientation_to_degrees(orientation: u16) -> i32 {
    match orientation {
        6 => 90,
        3 => 180,
        8 => 270,
        _ => 0,
    }
}

/// Rotation implied by the EXIF orientation tag, 0 when absent.
fn read_exif_rotation(bytes: &[u8]) -> i32 {
    let mut reader = Cursor::new(bytes);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(e) => e,
        Err(_) => return 0,
    };

    if let Some(field) = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY) {
        if let exif::Value::Short(ref v) = field.value {
            if let Some(&orientation) = v.first() {
                return exif_orientation_to_degrees(orientation);
            }
        }
    }

    0
}
