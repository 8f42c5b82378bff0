// SPDX-License-Identifier: MIT

//! PDF text extraction

use std::path::Path;
use tracing::debug;

use super::ExtractStrategy;
use crate::{ArquivistaError, Result};

/// Strategy for PDF documents: text of the first few pages.
pub struct PdfStrategy {
    pages: u32,
}

impl PdfStrategy {
    pub fn new(pages: u32) -> Self {
        Self { pages }
    }

    /// Page-bounded extraction via lopdf.
    fn extract_front_pages(&self, bytes: &[u8]) -> Result<String> {
        let doc = lopdf::Document::load_mem(bytes)
            .map_err(|e| ArquivistaError::Extraction(format!("failed to load PDF: {e}")))?;

        let page_numbers: Vec<u32> = doc
            .get_pages()
            .keys()
            .copied()
            .take(self.pages as usize)
            .collect();

        if page_numbers.is_empty() {
            return Err(ArquivistaError::Extraction("PDF has no pages".to_string()));
        }

        doc.extract_text(&page_numbers)
            .map_err(|e| ArquivistaError::Extraction(format!("text extraction failed: {e}")))
    }
}

impl ExtractStrategy for PdfStrategy {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn supported_extensions(&self) -> &[&str] {
        &["pdf"]
    }

    fn extract(&self, path: &Path) -> Result<String> {
        let bytes = std::fs::read(path)?;

        match self.extract_front_pages(&bytes) {
            Ok(text) if !text.trim().is_empty() => Ok(text),
            other => {
                if let Err(e) = &other {
                    debug!("page extraction failed for {:?}: {e}, trying full text", path);
                }
                // Whole-document fallback; the excerpt cap bounds it.
                pdf_extract::extract_text_from_mem(&bytes)
                    .map_err(|e| ArquivistaError::Extraction(format!("text extraction failed: {e}")))
            }
        }
    }
}
