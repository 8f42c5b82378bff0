// SPDX-License-Identifier: MIT

//! Archive listing: entry names, no unpacking.

use std::path::Path;

use super::ExtractStrategy;
use crate::{ArquivistaError, Result};

/// Entries listed from a single archive
const MAX_ENTRIES: usize = 50;

/// Strategy for archive files
pub struct ArchiveStrategy;

impl ArchiveStrategy {
    pub fn new() -> Self {
        Self
    }

    fn list_zip(path: &Path) -> Result<Vec<String>> {
        let file = std::fs::File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| ArquivistaError::Extraction(format!("failed to open ZIP: {e}")))?;

        let mut names = Vec::new();
        for i in 0..archive.len().min(MAX_ENTRIES) {
            if let Ok(entry) = archive.by_index(i) {
                names.push(entry.name().to_string());
            }
        }
        Ok(names)
    }

    fn list_tar(path: &Path) -> Result<Vec<String>> {
        let file = std::fs::File::open(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let reader: Box<dyn std::io::Read> = if ext == "gz" || ext == "tgz" {
            Box::new(flate2::read::GzDecoder::new(file))
        } else {
            Box::new(file)
        };

        let mut archive = tar::Archive::new(reader);
        let mut names = Vec::new();

        for entry in archive
            .entries()
            .map_err(|e| ArquivistaError::Extraction(format!("failed to read TAR: {e}")))?
        {
            let Ok(entry) = entry else { continue };
            if let Ok(entry_path) = entry.path() {
                names.push(entry_path.to_string_lossy().into_owned());
            }
            if names.len() >= MAX_ENTRIES {
                break;
            }
        }

        Ok(names)
    }
}

impl Default for ArchiveStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractStrategy for ArchiveStrategy {
    fn name(&self) -> &'static str {
        "archive"
    }

    fn supported_extensions(&self) -> &[&str] {
        &["zip", "jar", "tar", "gz", "tgz"]
    }

    fn extract(&self, path: &Path) -> Result<String> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        let names = match ext.as_str() {
            "zip" | "jar" => Self::list_zip(path)?,
            "tar" | "gz" | "tgz" => Self::list_tar(path)?,
            other => {
                return Err(ArquivistaError::Extraction(format!(
                    "unsupported archive type: {other}"
                )))
            }
        };

        let mut text = format!("Archive entries ({}):\n", names.len());
        for name in names {
            text.push_str(&name);
            text.push('\n');
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn lists_zip_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.zip");

        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        writer.start_file("docs/readme.txt", options).unwrap();
        writer.write_all(b"hi").unwrap();
        writer.start_file("data.csv", options).unwrap();
        writer.write_all(b"a,b").unwrap();
        writer.finish().unwrap();

        let text = ArchiveStrategy::new().extract(&path).unwrap();
        assert!(text.contains("docs/readme.txt"));
        assert!(text.contains("data.csv"));
        assert!(text.starts_with("Archive entries (2):"));
    }
}
