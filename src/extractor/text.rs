// SPDX-License-Identifier: MIT

//! Plain-text extraction

use std::path::Path;

use super::ExtractStrategy;
use crate::Result;

/// Strategy for files that are already text
pub struct TextStrategy;

impl TextStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TextStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractStrategy for TextStrategy {
    fn name(&self) -> &'static str {
        "text"
    }

    fn supported_extensions(&self) -> &[&str] {
        &[
            "txt", "md", "markdown", "rst", "json", "xml", "html", "htm", "csv", "tsv", "log",
            "yaml", "yml", "toml",
        ]
    }

    fn extract(&self, path: &Path) -> Result<String> {
        // Lossy decode: mixed encodings are common in stray text
        // files and must not abort extraction.
        let bytes = std::fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
