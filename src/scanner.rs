// SPDX-License-Identifier: MIT

//! Directory scanner: recursive walk, exclusion filters, hashing.
//!
//! First stage of the pipeline. Read-only: never modifies a file,
//! never follows a symlink. Emits one [`FileRecord`] per accepted
//! file, in discovery order.

use chrono::{DateTime, Local};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::ScannerConfig;
use crate::model::FileRecord;
use crate::Result;

/// Chunk size for streaming hash computation
const HASH_CHUNK_SIZE: usize = 8192;

/// Counters tracked across one scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStats {
    pub files_scanned: u64,
    pub files_excluded: u64,
    pub directories_skipped: u64,
    pub total_size_bytes: u64,
}

/// Directory scanner with exclusion rules.
pub struct Scanner {
    min_file_size: u64,
    excluded_dirs: HashSet<String>,
    excluded_extensions: HashSet<String>,
}

impl Scanner {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            min_file_size: config.min_file_size,
            excluded_dirs: config.excluded_dirs.iter().cloned().collect(),
            excluded_extensions: config
                .excluded_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Start a scan under `root`.
    ///
    /// Fails only when the root itself is missing or unreadable; all
    /// later failures are reported and skipped by the iterator.
    pub fn scan<'a>(&'a self, root: &Path) -> Result<ScanIter<'a>> {
        // Probe the root eagerly so an unusable root is a hard error
        // instead of an empty scan.
        std::fs::read_dir(root)?;

        Ok(ScanIter {
            scanner: self,
            walker: WalkDir::new(root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter(),
            stats: ScanStats::default(),
        })
    }

    fn is_excluded_dir(&self, name: &str) -> bool {
        self.excluded_dirs.contains(name)
    }

    fn is_excluded_file(&self, extension: &str, size: u64) -> bool {
        size < self.min_file_size || self.excluded_extensions.contains(extension)
    }
}

/// Lazy, finite, non-restartable sequence of [`FileRecord`]s.
pub struct ScanIter<'a> {
    scanner: &'a Scanner,
    walker: walkdir::IntoIter,
    stats: ScanStats,
}

impl ScanIter<'_> {
    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn into_stats(self) -> ScanStats {
        self.stats
    }
}

impl Iterator for ScanIter<'_> {
    type Item = FileRecord;

    fn next(&mut self) -> Option<FileRecord> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    // Directory-level I/O failure: report, skip the
                    // subtree, keep walking.
                    warn!("scan error, skipping subtree: {e}");
                    self.stats.directories_skipped += 1;
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                let name = entry.file_name().to_string_lossy();
                if entry.depth() > 0 && self.scanner.is_excluded_dir(&name) {
                    self.stats.directories_skipped += 1;
                    self.walker.skip_current_dir();
                }
                continue;
            }

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!("cannot stat {:?}: {e}", path);
                    self.stats.files_excluded += 1;
                    continue;
                }
            };

            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_default();

            if self.scanner.is_excluded_file(&extension, metadata.len()) {
                self.stats.files_excluded += 1;
                continue;
            }

            let sha256 = match hash_file(path) {
                Ok(h) => h,
                Err(e) => {
                    // Permission denied or vanished mid-walk.
                    warn!("cannot hash {:?}: {e}", path);
                    self.stats.files_excluded += 1;
                    continue;
                }
            };

            let modified = metadata
                .modified()
                .map(DateTime::<Local>::from)
                .unwrap_or_else(|_| Local::now());
            let created = metadata.created().ok().map(DateTime::<Local>::from);

            let mime = mime_guess::from_path(path)
                .first_raw()
                .unwrap_or("application/octet-stream")
                .to_string();

            self.stats.files_scanned += 1;
            self.stats.total_size_bytes += metadata.len();

            return Some(FileRecord {
                path: path.to_path_buf(),
                size: metadata.len(),
                modified,
                created,
                extension,
                mime,
                sha256,
                excerpt: None,
            });
        }
    }
}

/// Streaming SHA-256 of a file's contents.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
