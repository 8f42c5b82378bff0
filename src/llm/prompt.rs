// SPDX-License-Identifier: MIT

//! Prompt construction for the LLM classifier.
//!
//! The prompt carries no file contents beyond the bounded excerpt.

use crate::model::{Category, FileRecord};

/// Fields the response must carry, in schema order
pub const RESPONSE_FIELDS: [&str; 7] = [
    "category",
    "subcategory",
    "subject",
    "year",
    "suggested_name",
    "confidence",
    "rationale",
];

fn category_list() -> String {
    Category::ALL
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn excerpt_of(record: &FileRecord, cap: usize) -> String {
    let excerpt = record.excerpt.as_deref().unwrap_or_default();
    if excerpt.is_empty() {
        return "(no content extracted)".to_string();
    }

    let mut cut = cap.min(excerpt.len());
    while cut > 0 && !excerpt.is_char_boundary(cut) {
        cut -= 1;
    }
    if cut < excerpt.len() {
        format!("{}…", &excerpt[..cut])
    } else {
        excerpt.to_string()
    }
}

/// Build the initial classification prompt for one record.
pub fn classification_prompt(record: &FileRecord, excerpt_cap: usize) -> String {
    format!(
        "You are a file organization assistant. Classify the file below \
into the appropriate category.\n\
\n\
## File\n\
- Name: {name}\n\
- Extension: {ext}\n\
- Size: {size} bytes\n\
- Modified: {year}\n\
\n\
## Content excerpt\n\
{excerpt}\n\
\n\
## Valid categories\n\
{categories}\n\
\n\
## Response\n\
Respond with a single JSON object and nothing else: no prose, no code \
fences, no commentary. Exactly these fields:\n\
{{\n\
  \"category\": \"one of the valid categories\",\n\
  \"subcategory\": \"specific subcategory within the category\",\n\
  \"subject\": \"short descriptor of the document (max 50 chars)\",\n\
  \"year\": 1900-2100,\n\
  \"suggested_name\": \"YYYY-MM-DD__Category__Subject (no extension)\",\n\
  \"confidence\": 0-100,\n\
  \"rationale\": \"one short sentence\"\n\
}}",
        name = record.base_name(),
        ext = record.extension,
        size = record.size,
        year = record.modified.format("%Y"),
        excerpt = excerpt_of(record, excerpt_cap),
        categories = category_list(),
    )
}

/// Directive after a response that failed to decode at all.
pub fn correction_prompt(record: &FileRecord, excerpt_cap: usize) -> String {
    format!(
        "Your previous response was not valid structured data. Emit \
structured data only: a single JSON object with the fields \
{fields}, no surrounding prose or code fences.\n\
\n\
File: {name}\n\
Valid categories:\n\
{categories}\n\
Content excerpt:\n\
{excerpt}",
        fields = RESPONSE_FIELDS.join(", "),
        name = record.base_name(),
        categories = category_list(),
        excerpt = excerpt_of(record, excerpt_cap.min(500)),
    )
}

/// Directive after a response with missing or malformed fields.
pub fn completion_prompt(record: &FileRecord, field_errors: &[String]) -> String {
    format!(
        "Your previous response was structured but had invalid fields:\n\
{problems}\n\
\n\
Respond again with a single JSON object carrying exactly the fields \
{fields}. Category must be one of:\n\
{categories}\n\
Year must be an integer 1900-2100; confidence an integer 0-100.\n\
\n\
File: {name}",
        problems = field_errors
            .iter()
            .map(|e| format!("- {e}"))
            .collect::<Vec<_>>()
            .join("\n"),
        fields = RESPONSE_FIELDS.join(", "),
        categories = category_list(),
        name = record.base_name(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use std::path::PathBuf;

    fn record(excerpt: Option<&str>) -> FileRecord {
        FileRecord {
            path: PathBuf::from("/in/contrato_aluguel.pdf"),
            size: 52_430,
            modified: Local::now(),
            created: None,
            extension: "pdf".to_string(),
            mime: "application/pdf".to_string(),
            sha256: "0".repeat(64),
            excerpt: excerpt.map(String::from),
        }
    }

    #[test]
    fn prompt_lists_all_categories() {
        let prompt = classification_prompt(&record(None), 2000);
        for category in Category::ALL {
            assert!(prompt.contains(category.as_str()));
        }
    }

    #[test]
    fn prompt_includes_record_summary_and_excerpt() {
        let prompt = classification_prompt(&record(Some("CONTRATO DE LOCAÇÃO")), 2000);
        assert!(prompt.contains("contrato_aluguel.pdf"));
        assert!(prompt.contains("52430 bytes"));
        assert!(prompt.contains("CONTRATO DE LOCAÇÃO"));
    }

    #[test]
    fn prompt_caps_the_excerpt() {
        let long = "x".repeat(5000);
        let prompt = classification_prompt(&record(Some(&long)), 2000);
        assert!(!prompt.contains(&long));
        assert!(prompt.contains(&"x".repeat(2000)));
    }

    #[test]
    fn completion_prompt_names_offending_fields() {
        let errors = vec![
            "year out of range: 1850".to_string(),
            "missing field: rationale".to_string(),
        ];
        let prompt = completion_prompt(&record(None), &errors);
        assert!(prompt.contains("year out of range: 1850"));
        assert!(prompt.contains("missing field: rationale"));
    }
}
