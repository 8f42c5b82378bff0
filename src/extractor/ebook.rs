// SPDX-License-Identifier: MIT

//! eBook handling: format marker only, no content parsing.

use std::path::Path;

use super::ExtractStrategy;
use crate::Result;

/// Strategy for eBook files
pub struct EbookStrategy;

impl EbookStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EbookStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractStrategy for EbookStrategy {
    fn name(&self) -> &'static str {
        "ebook"
    }

    fn supported_extensions(&self) -> &[&str] {
        &["epub", "mobi", "azw", "azw3"]
    }

    fn extract(&self, path: &Path) -> Result<String> {
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_else(|| "ebook".to_string());
        Ok(format!("[{format} ebook]"))
    }
}
