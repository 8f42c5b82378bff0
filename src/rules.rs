// SPDX-License-Identifier: MIT

//! Deterministic rule engine: ordered pattern rules, first full match
//! wins. Files no rule matches are left for the LLM classifier.

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use crate::model::{Category, Classification, ClassificationSource, FileRecord};
use crate::planner::sanitize_name;
use crate::{ArquivistaError, Result};

const MAX_SUBJECT_LEN: usize = 50;

fn default_rule_confidence() -> u8 {
    90
}

/// One classification rule, as declared in the YAML rules file.
#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    pub id: String,
    /// Glob on the base name; brace expansion over comma-separated
    /// alternatives is supported (`*.{jpg,png}`), case-insensitive.
    pub pattern: String,
    pub category: Category,
    #[serde(default)]
    pub subcategory: String,
    /// Any-keyword match against excerpt and base name
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub min_size_mb: Option<f64>,
    #[serde(default)]
    pub max_size_mb: Option<f64>,
    #[serde(default = "default_rule_confidence")]
    pub confidence: u8,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    rules: Vec<Rule>,
}

struct CompiledRule {
    rule: Rule,
    patterns: Vec<glob::Pattern>,
}

/// Rule engine: evaluates rules in declaration order.
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
    year_re: Regex,
    hits: Mutex<BTreeMap<String, u64>>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Rule>) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            validate_rule(&rule)?;
            let patterns = compile_pattern(&rule.pattern).map_err(|e| {
                ArquivistaError::Config(format!("rule {}: bad pattern {:?}: {e}", rule.id, rule.pattern))
            })?;
            compiled.push(CompiledRule { rule, patterns });
        }

        Ok(Self {
            rules: compiled,
            year_re: Regex::new(r"(19|20)\d{2}").expect("static regex"),
            hits: Mutex::new(BTreeMap::new()),
        })
    }

    /// Load rules from a YAML file. Any malformed rule is fatal.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ArquivistaError::Config(format!("cannot read rules file {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: RulesFile = serde_yaml::from_str(content)
            .map_err(|e| ArquivistaError::Config(format!("malformed rules file: {e}")))?;
        Self::new(file.rules)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Classify a record. First rule whose full predicate matches
    /// (glob, then size bounds, then any-keyword) wins; no
    /// rule-combination logic.
    pub fn classify(&self, record: &FileRecord) -> Option<Classification> {
        let base_name = record.base_name();
        let base_lower = base_name.to_lowercase();

        for compiled in &self.rules {
            if !self.matches(compiled, record, &base_lower) {
                continue;
            }

            let rule = &compiled.rule;
            debug!("rule {} matched {:?}", rule.id, record.path);
            *self
                .hits
                .lock()
                .expect("hit counter lock poisoned")
                .entry(rule.id.clone())
                .or_insert(0) += 1;

            return Some(self.build_classification(record, rule, &base_name));
        }

        None
    }

    /// Per-rule hit counts accumulated so far.
    pub fn hit_counts(&self) -> BTreeMap<String, u64> {
        self.hits.lock().expect("hit counter lock poisoned").clone()
    }

    fn matches(&self, compiled: &CompiledRule, record: &FileRecord, base_lower: &str) -> bool {
        if !compiled.patterns.iter().any(|p| p.matches(base_lower)) {
            return false;
        }

        let rule = &compiled.rule;
        if let Some(min) = rule.min_size_mb {
            if (record.size as f64) < min * 1024.0 * 1024.0 {
                return false;
            }
        }
        if let Some(max) = rule.max_size_mb {
            if (record.size as f64) > max * 1024.0 * 1024.0 {
                return false;
            }
        }

        if !rule.keywords.is_empty() {
            let mut haystack = record
                .excerpt
                .as_deref()
                .unwrap_or_default()
                .to_lowercase();
            haystack.push(' ');
            haystack.push_str(base_lower);

            if !rule
                .keywords
                .iter()
                .any(|k| haystack.contains(&k.to_lowercase()))
            {
                return false;
            }
        }

        true
    }

    fn build_classification(
        &self,
        record: &FileRecord,
        rule: &Rule,
        base_name: &str,
    ) -> Classification {
        let year = self.parse_year_token(base_name).unwrap_or(0);

        let stem = record
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| base_name.to_string());
        let mut subject = sanitize_name(&stem);
        if subject.len() > MAX_SUBJECT_LEN {
            let mut cut = MAX_SUBJECT_LEN;
            while cut > 0 && !subject.is_char_boundary(cut) {
                cut -= 1;
            }
            subject.truncate(cut);
        }

        let date_str = record.modified.format("%Y-%m-%d");
        let suggested_name = format!("{date_str}__{}__{subject}", rule.category);

        Classification {
            category: rule.category,
            subcategory: rule.subcategory.clone(),
            subject: if rule.description.is_empty() {
                subject
            } else {
                rule.description.clone()
            },
            year,
            suggested_name,
            confidence: rule.confidence,
            rationale: format!("Matched rule: {}", rule.id),
            source: ClassificationSource::Rule(rule.id.clone()),
        }
    }

    fn parse_year_token(&self, base_name: &str) -> Option<i32> {
        self.year_re
            .find(base_name)
            .and_then(|m| m.as_str().parse().ok())
    }
}

fn validate_rule(rule: &Rule) -> Result<()> {
    if rule.id.is_empty() {
        return Err(ArquivistaError::Config("rule with empty id".to_string()));
    }
    if rule.pattern.is_empty() {
        return Err(ArquivistaError::Config(format!(
            "rule {}: empty pattern",
            rule.id
        )));
    }
    if rule.confidence > 100 {
        return Err(ArquivistaError::Config(format!(
            "rule {}: confidence {} out of range",
            rule.id, rule.confidence
        )));
    }
    Ok(())
}

/// Compile a base-name glob, expanding one brace group of
/// comma-separated alternatives into separate patterns. Matching is
/// case-insensitive (everything is lowercased).
fn compile_pattern(pattern: &str) -> std::result::Result<Vec<glob::Pattern>, glob::PatternError> {
    expand_braces(&pattern.to_lowercase())
        .iter()
        .map(|p| glob::Pattern::new(p))
        .collect()
}

fn expand_braces(pattern: &str) -> Vec<String> {
    let (Some(open), Some(close)) = (pattern.find('{'), pattern.find('}')) else {
        return vec![pattern.to_string()];
    };
    if close < open {
        return vec![pattern.to_string()];
    }

    let head = &pattern[..open];
    let tail = &pattern[close + 1..];
    pattern[open + 1..close]
        .split(',')
        .map(|alt| format!("{head}{}{tail}", alt.trim()))
        .collect()
}
