// SPDX-License-Identifier: MIT

//! Image metadata extraction: EXIF key/value pairs, no pixel OCR.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::ExtractStrategy;
use crate::{ArquivistaError, Result};

/// Strategy for image files
pub struct ImageStrategy;

impl ImageStrategy {
    pub fn new() -> Self {
        Self
    }

    fn read_exif(path: &Path) -> Result<String> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let exif = exif::Reader::new()
            .read_from_container(&mut reader)
            .map_err(|e| ArquivistaError::Extraction(format!("no EXIF data: {e}")))?;

        let mut text = String::new();
        for field in exif.fields() {
            text.push_str(&format!(
                "{}: {}\n",
                field.tag,
                field.display_value().with_unit(&exif)
            ));
        }

        if text.is_empty() {
            return Err(ArquivistaError::Extraction("empty EXIF block".to_string()));
        }
        Ok(text)
    }
}

impl Default for ImageStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractStrategy for ImageStrategy {
    fn name(&self) -> &'static str {
        "image"
    }

    fn supported_extensions(&self) -> &[&str] {
        &[
            "jpg", "jpeg", "png", "webp", "gif", "bmp", "tiff", "tif", "heic", "heif", "avif",
        ]
    }

    fn extract(&self, path: &Path) -> Result<String> {
        match Self::read_exif(path) {
            Ok(text) => Ok(text),
            Err(_) => {
                // No EXIF (screenshots, PNGs): dimensions still help
                // classification.
                let (width, height) = image::image_dimensions(path).map_err(|e| {
                    ArquivistaError::Extraction(format!("unreadable image: {e}"))
                })?;
                Ok(format!("Image dimensions: {width}x{height}\n"))
            }
        }
    }
}
