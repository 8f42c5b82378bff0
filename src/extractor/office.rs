// SPDX-License-Identifier: MIT

//! Office document extraction: DOCX body text, PPTX slide text,
//! spreadsheet sheet previews.

use std::io::Read;
use std::path::Path;

use super::ExtractStrategy;
use crate::{ArquivistaError, Result};

/// Pull the text runs out of an Office XML part, keeping only the
/// contents of the given text tag (`w:t` for WordprocessingML, `a:t`
/// for DrawingML). These parts are machine-generated and regular
/// enough that a full XML parse buys nothing.
fn extract_xml_text(content: &str, text_tag: &str) -> String {
    enum State {
        /// Between elements
        Markup,
        /// Inside a tag, accumulating its raw contents
        Tag(String),
        /// Inside a text run
        Run,
    }

    let mut out = String::new();
    let mut state = State::Markup;

    for c in content.chars() {
        state = match (state, c) {
            (State::Markup, '<') => State::Tag(String::new()),
            (State::Markup, _) => State::Markup,
            (State::Tag(raw), '>') => {
                if opens_text_run(&raw, text_tag) {
                    State::Run
                } else {
                    State::Markup
                }
            }
            (State::Tag(mut raw), c) => {
                raw.push(c);
                State::Tag(raw)
            }
            (State::Run, '<') => {
                out.push(' ');
                State::Tag(String::new())
            }
            (State::Run, c) => {
                out.push(c);
                State::Run
            }
        };
    }

    out
}

/// An opening run tag is the exact tag name, optionally with
/// attributes (`w:t xml:space="preserve"`), never a closing or
/// self-closing form.
fn opens_text_run(raw: &str, text_tag: &str) -> bool {
    if raw.starts_with('/') || raw.ends_with('/') {
        return false;
    }
    raw.split_whitespace().next() == Some(text_tag)
}

fn read_zip_entry(archive_path: &Path, entry_name: &str) -> Result<String> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| ArquivistaError::Extraction(format!("failed to open container: {e}")))?;

    let mut entry = archive
        .by_name(entry_name)
        .map_err(|e| ArquivistaError::Extraction(format!("no {entry_name}: {e}")))?;

    let mut content = String::new();
    entry.read_to_string(&mut content)?;
    Ok(content)
}

/// Strategy for Word documents: body text.
pub struct DocxStrategy;

impl DocxStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DocxStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractStrategy for DocxStrategy {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn supported_extensions(&self) -> &[&str] {
        &["docx"]
    }

    fn extract(&self, path: &Path) -> Result<String> {
        let xml = read_zip_entry(path, "word/document.xml")?;
        Ok(extract_xml_text(&xml, "w:t"))
    }
}

/// Strategy for presentations: slide titles and body text, in slide
/// order.
pub struct PptxStrategy;

impl PptxStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PptxStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractStrategy for PptxStrategy {
    fn name(&self) -> &'static str {
        "pptx"
    }

    fn supported_extensions(&self) -> &[&str] {
        &["pptx"]
    }

    fn extract(&self, path: &Path) -> Result<String> {
        let file = std::fs::File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| ArquivistaError::Extraction(format!("failed to open container: {e}")))?;

        let mut slide_names: Vec<String> = archive
            .file_names()
            .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
            .map(String::from)
            .collect();
        slide_names.sort();

        let mut text = String::new();
        for name in slide_names {
            let mut entry = archive
                .by_name(&name)
                .map_err(|e| ArquivistaError::Extraction(format!("bad slide {name}: {e}")))?;
            let mut xml = String::new();
            entry.read_to_string(&mut xml)?;
            text.push_str(extract_xml_text(&xml, "a:t").trim());
            text.push('\n');
        }

        Ok(text)
    }
}

/// Strategy for spreadsheets: sheet names followed by the first rows
/// of each sheet.
pub struct XlsxStrategy {
    rows: usize,
}

impl XlsxStrategy {
    pub fn new(rows: usize) -> Self {
        Self { rows }
    }
}

impl ExtractStrategy for XlsxStrategy {
    fn name(&self) -> &'static str {
        "xlsx"
    }

    fn supported_extensions(&self) -> &[&str] {
        &["xlsx", "xls", "ods"]
    }

    fn extract(&self, path: &Path) -> Result<String> {
        use calamine::Reader;

        let mut workbook = calamine::open_workbook_auto(path)
            .map_err(|e| ArquivistaError::Extraction(format!("failed to open workbook: {e}")))?;

        let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
        let mut text = format!("Sheets: {}\n", sheet_names.join(", "));

        for sheet_name in &sheet_names {
            let Ok(range) = workbook.worksheet_range(sheet_name) else {
                continue;
            };
            text.push_str(&format!("\n[{sheet_name}]\n"));
            for (i, row) in range.rows().enumerate() {
                if i >= self.rows {
                    text.push_str("...\n");
                    break;
                }
                let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
                text.push_str(&cells.join("\t"));
                text.push('\n');
            }
        }

        Ok(text)
    }
}
