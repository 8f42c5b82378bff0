// SPDX-License-Identifier: MIT

//! Content extraction strategies for different file families.
//!
//! Second stage of the pipeline. Each strategy produces a bounded
//! text excerpt for one file family; failures are reported and leave
//! the excerpt empty. Extraction never fails a file.

pub mod archive;
pub mod ebook;
pub mod image;
pub mod media;
pub mod office;
pub mod pdf;
pub mod text;

use std::path::Path;
use tracing::warn;

use crate::config::ExtractorConfig;
use crate::model::FileRecord;
use crate::Result;

/// Marker appended to excerpts cut at the size cap
pub const TRUNCATION_SENTINEL: &str = "[content truncated]";

/// Trait for per-family extraction strategies
pub trait ExtractStrategy: Send + Sync {
    /// Name of this strategy
    fn name(&self) -> &'static str;

    /// File extensions this strategy handles
    fn supported_extensions(&self) -> &[&str];

    /// Check if this strategy can handle an extension
    fn can_handle(&self, extension: &str) -> bool {
        self.supported_extensions()
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    }

    /// Extract a text excerpt from a file
    fn extract(&self, path: &Path) -> Result<String>;
}

/// Registry of extraction strategies, consulted in registration order.
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn ExtractStrategy>>,
}

impl StrategyRegistry {
    /// Create a registry with the default strategies
    pub fn new(config: &ExtractorConfig) -> Self {
        let mut registry = Self {
            strategies: Vec::new(),
        };

        registry.register(Box::new(text::TextStrategy::new()));
        registry.register(Box::new(pdf::PdfStrategy::new(config.pdf_pages)));
        registry.register(Box::new(office::DocxStrategy::new()));
        registry.register(Box::new(office::PptxStrategy::new()));
        registry.register(Box::new(office::XlsxStrategy::new(config.sheet_rows)));
        registry.register(Box::new(image::ImageStrategy::new()));
        registry.register(Box::new(media::AudioStrategy::new()));
        registry.register(Box::new(media::VideoStrategy::new()));
        registry.register(Box::new(ebook::EbookStrategy::new()));
        registry.register(Box::new(archive::ArchiveStrategy::new()));

        registry
    }

    pub fn register(&mut self, strategy: Box<dyn ExtractStrategy>) {
        self.strategies.push(strategy);
    }

    /// Find the strategy for a file, if any
    pub fn find_strategy(&self, extension: &str) -> Option<&dyn ExtractStrategy> {
        self.strategies
            .iter()
            .find(|s| s.can_handle(extension))
            .map(|s| s.as_ref())
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}

/// Extractor: dispatches records to strategies and bounds the output.
pub struct Extractor {
    registry: StrategyRegistry,
    max_excerpt_bytes: usize,
}

impl Extractor {
    pub fn new(config: &ExtractorConfig) -> Self {
        Self {
            registry: StrategyRegistry::new(config),
            max_excerpt_bytes: config.max_excerpt_bytes,
        }
    }

    /// Enrich a record with its excerpt. Never raises for an
    /// individual file: unknown families and failed extractions both
    /// leave an empty excerpt.
    pub fn enrich(&self, record: &mut FileRecord) {
        let excerpt = match self.registry.find_strategy(&record.extension) {
            Some(strategy) => match strategy.extract(&record.path) {
                Ok(content) => truncate_excerpt(&content, self.max_excerpt_bytes),
                Err(e) => {
                    warn!(
                        "extraction failed for {:?} ({}): {e}",
                        record.path,
                        strategy.name()
                    );
                    String::new()
                }
            },
            None => String::new(),
        };

        record.excerpt = Some(excerpt);
    }
}

/// Truncate at the byte cap, on a char boundary, with a trailing
/// sentinel when anything was cut.
pub fn truncate_excerpt(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }

    let mut cut = max_bytes;
    while cut > 0 && !content.is_char_boundary(cut) {
        cut -= 1;
    }

    format!("{}\n{TRUNCATION_SENTINEL}", &content[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use std::fs;
    use std::path::PathBuf;

    fn record_for(path: PathBuf, extension: &str) -> FileRecord {
        FileRecord {
            path,
            size: 0,
            modified: Local::now(),
            created: None,
            extension: extension.to_string(),
            mime: "application/octet-stream".to_string(),
            sha256: "0".repeat(64),
            excerpt: None,
        }
    }

    #[test]
    fn truncate_short_content_is_identity() {
        assert_eq!(truncate_excerpt("hello", 8192), "hello");
    }

    #[test]
    fn truncate_appends_sentinel() {
        let long = "a".repeat(10_000);
        let result = truncate_excerpt(&long, 8192);
        assert!(result.ends_with(TRUNCATION_SENTINEL));
        assert!(result.len() < long.len());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        // Multibyte char straddling the cap must not split.
        let content = format!("{}é", "a".repeat(9));
        let result = truncate_excerpt(&content, 10);
        assert!(result.starts_with(&"a".repeat(9)));
        assert!(result.contains(TRUNCATION_SENTINEL));
    }

    #[test]
    fn unknown_extension_gets_empty_excerpt() {
        let extractor = Extractor::new(&crate::config::ExtractorConfig::default());
        let mut record = record_for(PathBuf::from("/nonexistent/file.xyz"), "xyz");
        extractor.enrich(&mut record);
        assert_eq!(record.excerpt.as_deref(), Some(""));
    }

    #[test]
    fn failed_extraction_is_nonfatal() {
        let extractor = Extractor::new(&crate::config::ExtractorConfig::default());
        // A pdf path that does not exist: the strategy fails, the
        // record still comes back with an empty excerpt.
        let mut record = record_for(PathBuf::from("/nonexistent/file.pdf"), "pdf");
        extractor.enrich(&mut record);
        assert_eq!(record.excerpt.as_deref(), Some(""));
    }

    #[test]
    fn text_files_are_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        fs::write(&path, "meeting notes for the quarter").unwrap();

        let extractor = Extractor::new(&crate::config::ExtractorConfig::default());
        let mut record = record_for(path, "txt");
        extractor.enrich(&mut record);
        assert_eq!(
            record.excerpt.as_deref(),
            Some("meeting notes for the quarter")
        );
    }

    #[test]
    fn registry_dispatches_by_extension() {
        let registry = StrategyRegistry::new(&crate::config::ExtractorConfig::default());
        assert_eq!(registry.find_strategy("pdf").unwrap().name(), "pdf");
        assert_eq!(registry.find_strategy("JPG").unwrap().name(), "image");
        assert_eq!(registry.find_strategy("epub").unwrap().name(), "ebook");
        assert!(registry.find_strategy("xyz").is_none());
    }
}
