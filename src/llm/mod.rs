// SPDX-License-Identifier: MIT

//! LLM classifier: semantic classification for files no rule
//! resolved.
//!
//! The backend produces an opaque string; the parser here is the
//! trust boundary. Nothing reaches the planner before it has passed
//! schema validation. Persistent failure falls back to the inbox
//! with confidence 0.

pub mod backend;
pub mod prompt;

use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::model::{Category, Classification, ClassificationSource, FileRecord};
use crate::planner::sanitize_name;
use crate::{ArquivistaError, Result};

use backend::{generate_with_retry, LlmBackend};
use prompt::{classification_prompt, completion_prompt, correction_prompt, RESPONSE_FIELDS};

/// Upper bound on any string field in a response
const MAX_FIELD_LEN: usize = 256;

/// Token bucket enforcing the request-per-minute ceiling. One of the
/// two shared mutable resources in the whole pipeline.
pub struct RateLimiter {
    capacity: f64,
    per_sec: f64,
    state: Mutex<(f64, Instant)>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute.max(1) as f64;
        Self {
            capacity,
            per_sec: capacity / 60.0,
            state: Mutex::new((capacity, Instant::now())),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("rate limiter lock poisoned");
                let now = Instant::now();
                let elapsed = now.duration_since(state.1).as_secs_f64();
                state.0 = (state.0 + elapsed * self.per_sec).min(self.capacity);
                state.1 = now;

                if state.0 >= 1.0 {
                    state.0 -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64((1.0 - state.0) / self.per_sec))
                }
            };

            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}

/// Pull a JSON object out of a raw response: strict parse first, then
/// a fenced code block, then the first balanced `{…}` in the text.
pub fn extract_json(response: &str) -> Option<Value> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            if let Ok(value) = serde_json::from_str::<Value>(after[..end].trim()) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }

    let mut depth = 0usize;
    let mut start = None;
    for (i, c) in trimmed.char_indices() {
        match c {
            '{' => {
                if start.is_none() {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start.take() {
                            if let Ok(value) =
                                serde_json::from_str::<Value>(&trimmed[s..=i])
                            {
                                if value.is_object() {
                                    return Some(value);
                                }
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    None
}

#[derive(Debug)]
struct ValidatedResponse {
    category: Category,
    subcategory: String,
    subject: String,
    year: i32,
    suggested_name: String,
    confidence: u8,
    rationale: String,
}

fn string_field(
    obj: &serde_json::Map<String, Value>,
    field: &str,
    errors: &mut Vec<String>,
) -> Option<String> {
    match obj.get(field) {
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                errors.push(format!("empty field: {field}"));
                None
            } else if s.chars().count() > MAX_FIELD_LEN {
                errors.push(format!("field too long: {field}"));
                None
            } else {
                Some(s.to_string())
            }
        }
        Some(_) => {
            errors.push(format!("field is not a string: {field}"));
            None
        }
        None => {
            errors.push(format!("missing field: {field}"));
            None
        }
    }
}

fn int_field(
    obj: &serde_json::Map<String, Value>,
    field: &str,
    errors: &mut Vec<String>,
) -> Option<i64> {
    match obj.get(field) {
        Some(Value::Number(n)) => n.as_i64().or_else(|| {
            errors.push(format!("field is not an integer: {field}"));
            None
        }),
        // Models sometimes quote their numbers; accept digits.
        Some(Value::String(s)) => s.trim().parse::<i64>().ok().or_else(|| {
            errors.push(format!("field is not an integer: {field}"));
            None
        }),
        Some(_) => {
            errors.push(format!("field is not an integer: {field}"));
            None
        }
        None => {
            errors.push(format!("missing field: {field}"));
            None
        }
    }
}

/// Validate a decoded object against the response schema. Returns
/// every field problem at once so the completion directive can name
/// them all.
fn validate_response(value: &Value) -> std::result::Result<ValidatedResponse, Vec<String>> {
    let Some(obj) = value.as_object() else {
        return Err(vec!["response is not an object".to_string()]);
    };

    let mut errors = Vec::new();

    for key in obj.keys() {
        if !RESPONSE_FIELDS.contains(&key.as_str()) {
            errors.push(format!("unexpected field: {key}"));
        }
    }

    let category = string_field(obj, "category", &mut errors).and_then(|s| {
        s.parse::<Category>()
            .map_err(|_| errors.push(format!("unknown category: {s}")))
            .ok()
    });
    let subcategory = string_field(obj, "subcategory", &mut errors);
    let subject = string_field(obj, "subject", &mut errors);
    let suggested_name = string_field(obj, "suggested_name", &mut errors);
    let rationale = string_field(obj, "rationale", &mut errors);

    let year = int_field(obj, "year", &mut errors).and_then(|y| {
        if (1900..=2100).contains(&y) {
            Some(y as i32)
        } else {
            errors.push(format!("year out of range: {y}"));
            None
        }
    });
    let confidence = int_field(obj, "confidence", &mut errors).and_then(|c| {
        if (0..=100).contains(&c) {
            Some(c as u8)
        } else {
            errors.push(format!("confidence out of range: {c}"));
            None
        }
    });

    match (
        category,
        subcategory,
        subject,
        suggested_name,
        rationale,
        year,
        confidence,
    ) {
        (
            Some(category),
            Some(subcategory),
            Some(subject),
            Some(suggested_name),
            Some(rationale),
            Some(year),
            Some(confidence),
        ) if errors.is_empty() => Ok(ValidatedResponse {
            category,
            subcategory,
            subject,
            year,
            suggested_name,
            confidence,
            rationale,
        }),
        _ => Err(errors),
    }
}

/// Terminal classification for a file nothing could classify:
/// inbox, confidence 0, rationale recording the reason.
pub fn fallback_classification(record: &FileRecord, reason: &str) -> Classification {
    let subject = sanitize_name(
        &record
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string()),
    );
    let date = record.modified.format("%Y-%m-%d");

    Classification {
        category: Category::Inbox,
        subcategory: String::new(),
        subject: subject.clone(),
        year: 0,
        suggested_name: format!("{date}__{}__{subject}", Category::Inbox),
        confidence: 0,
        rationale: format!("fallback: {reason}"),
        source: ClassificationSource::Fallback,
    }
}

/// Semantic file classifier over a pluggable backend.
pub struct LlmClassifier {
    backend: Arc<dyn LlmBackend>,
    max_attempts: u32,
    prompt_excerpt_bytes: usize,
    semaphore: Arc<Semaphore>,
    limiter: Arc<RateLimiter>,
    health: OnceCell<std::result::Result<(), String>>,
}

impl LlmClassifier {
    pub fn new(backend: Arc<dyn LlmBackend>, config: &LlmConfig) -> Self {
        Self {
            backend,
            max_attempts: config.max_attempts.max(1),
            prompt_excerpt_bytes: config.prompt_excerpt_bytes,
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            limiter: Arc::new(RateLimiter::new(config.requests_per_minute)),
            health: OnceCell::new(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    /// Probe the backend once per run; later calls return the cached
    /// result.
    pub async fn ensure_healthy(&self) -> Result<()> {
        let cached = self
            .health
            .get_or_init(|| async {
                self.backend.health_check().await.map_err(|e| e.to_string())
            })
            .await;

        cached
            .clone()
            .map_err(ArquivistaError::BackendUnavailable)
    }

    /// Classify one record. Never fails: after `max_attempts` invalid
    /// responses (or exhausted transport retries) the file falls back
    /// to the inbox with confidence 0.
    pub async fn classify(&self, record: &FileRecord) -> Classification {
        let _permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return self.fallback(record, "classifier shut down"),
        };

        let mut next_prompt = classification_prompt(record, self.prompt_excerpt_bytes);
        let mut last_reason = String::from("no attempt made");

        for attempt in 1..=self.max_attempts {
            self.limiter.acquire().await;

            let response = match generate_with_retry(self.backend.as_ref(), &next_prompt).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(
                        "backend error classifying {:?} (attempt {attempt}): {e}",
                        record.path
                    );
                    last_reason = format!("backend error: {e}");
                    continue;
                }
            };

            let Some(value) = extract_json(&response) else {
                debug!(
                    "undecodable response for {:?} (attempt {attempt})",
                    record.path
                );
                last_reason = "response was not valid structured data".to_string();
                next_prompt = correction_prompt(record, self.prompt_excerpt_bytes);
                continue;
            };

            match validate_response(&value) {
                Ok(validated) => {
                    return Classification {
                        category: validated.category,
                        subcategory: sanitize_name(&validated.subcategory),
                        subject: validated.subject,
                        year: validated.year,
                        suggested_name: validated.suggested_name,
                        confidence: validated.confidence,
                        rationale: validated.rationale,
                        source: ClassificationSource::Llm,
                    };
                }
                Err(field_errors) => {
                    debug!(
                        "schema errors for {:?} (attempt {attempt}): {field_errors:?}",
                        record.path
                    );
                    last_reason = format!("schema errors: {}", field_errors.join("; "));
                    next_prompt = completion_prompt(record, &field_errors);
                }
            }
        }

        warn!(
            "classification failed for {:?} after {} attempts: {last_reason}",
            record.path, self.max_attempts
        );
        self.fallback(record, &last_reason)
    }

    fn fallback(&self, record: &FileRecord, reason: &str) -> Classification {
        fallback_classification(record, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Local;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockBackend {
        responses: Mutex<VecDeque<String>>,
        calls: AtomicU32,
    }

    impl MockBackend {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmBackend for MockBackend {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn model(&self) -> &str {
            "mock-model"
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }

        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        }
    }

    fn record() -> FileRecord {
        FileRecord {
            path: PathBuf::from("/in/contrato.pdf"),
            size: 4096,
            modified: Local::now(),
            created: None,
            extension: "pdf".to_string(),
            mime: "application/pdf".to_string(),
            sha256: "0".repeat(64),
            excerpt: Some("contrato de trabalho".to_string()),
        }
    }

    fn classifier(backend: Arc<MockBackend>) -> LlmClassifier {
        LlmClassifier::new(backend, &LlmConfig::default())
    }

    const VALID: &str = r#"{
        "category": "01_Trabalho",
        "subcategory": "Contratos",
        "subject": "Contrato de trabalho",
        "year": 2024,
        "suggested_name": "2024-00-00__01_Trabalho__Contrato_de_trabalho",
        "confidence": 92,
        "rationale": "employment contract keywords"
    }"#;

    #[test]
    fn extract_json_accepts_pure_object() {
        assert!(extract_json(VALID).is_some());
    }

    #[test]
    fn extract_json_accepts_fenced_block() {
        let fenced = format!("Here you go:\n```json\n{VALID}\n```");
        assert!(extract_json(&fenced).is_some());
    }

    #[test]
    fn extract_json_accepts_prose_wrapped_object() {
        let wrapped = format!("Sure! The classification is {VALID} — let me know!");
        assert!(extract_json(&wrapped).is_some());
    }

    #[test]
    fn extract_json_rejects_garbage() {
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("").is_none());
        assert!(extract_json("[1, 2, 3]").is_none());
    }

    #[test]
    fn validate_rejects_unknown_category() {
        let mut value: Value = serde_json::from_str(VALID).unwrap();
        value["category"] = Value::String("99_Outros".to_string());
        let errors = validate_response(&value).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("unknown category")));
    }

    #[test]
    fn validate_rejects_year_out_of_range() {
        let mut value: Value = serde_json::from_str(VALID).unwrap();
        value["year"] = Value::from(1850);
        let errors = validate_response(&value).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("year out of range")));
    }

    #[test]
    fn validate_rejects_extra_fields() {
        let mut value: Value = serde_json::from_str(VALID).unwrap();
        value["notes"] = Value::String("extra".to_string());
        let errors = validate_response(&value).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("unexpected field: notes")));
    }

    #[test]
    fn validate_accepts_quoted_integers() {
        let mut value: Value = serde_json::from_str(VALID).unwrap();
        value["confidence"] = Value::String("88".to_string());
        let validated = validate_response(&value).unwrap();
        assert_eq!(validated.confidence, 88);
    }

    #[tokio::test]
    async fn classify_returns_llm_classification() {
        let backend = MockBackend::new(&[VALID]);
        let classifier = classifier(backend.clone());

        let classification = classifier.classify(&record()).await;
        assert_eq!(classification.category, Category::Trabalho);
        assert_eq!(classification.confidence, 92);
        assert_eq!(classification.source, ClassificationSource::Llm);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn classify_recovers_on_second_attempt() {
        let backend = MockBackend::new(&["not json at all", VALID]);
        let classifier = classifier(backend.clone());

        let classification = classifier.classify(&record()).await;
        assert_eq!(classification.source, ClassificationSource::Llm);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistent_garbage_falls_back_to_inbox() {
        let backend = MockBackend::new(&["garbage", "more garbage", "still garbage"]);
        let classifier = classifier(backend.clone());

        let classification = classifier.classify(&record()).await;
        assert_eq!(classification.category, Category::Inbox);
        assert_eq!(classification.confidence, 0);
        assert_eq!(classification.source, ClassificationSource::Fallback);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn health_probe_is_cached_for_the_run() {
        let backend = MockBackend::new(&[]);
        let classifier = classifier(backend);
        assert!(classifier.ensure_healthy().await.is_ok());
        assert!(classifier.ensure_healthy().await.is_ok());
    }
}
