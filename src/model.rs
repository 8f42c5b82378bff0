// SPDX-License-Identifier: MIT

//! Shared pipeline types: records, classifications, plans, manifests.
//!
//! Data flows one way through the pipeline. Each stage enriches or
//! replaces the prior stage's record; nothing here mutates upstream
//! state.

use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::{ArquivistaError, Result};

/// The fixed category set. Names are stable identifiers, not UI
/// strings; they double as destination directory names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "01_Trabalho")]
    Trabalho,
    #[serde(rename = "02_Financas")]
    Financas,
    #[serde(rename = "03_Estudos")]
    Estudos,
    #[serde(rename = "04_Livros")]
    Livros,
    #[serde(rename = "05_Pessoal")]
    Pessoal,
    #[serde(rename = "90_Inbox_Organizar")]
    Inbox,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Trabalho,
        Category::Financas,
        Category::Estudos,
        Category::Livros,
        Category::Pessoal,
        Category::Inbox,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Trabalho => "01_Trabalho",
            Category::Financas => "02_Financas",
            Category::Estudos => "03_Estudos",
            Category::Livros => "04_Livros",
            Category::Pessoal => "05_Pessoal",
            Category::Inbox => "90_Inbox_Organizar",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ArquivistaError;

    fn from_str(s: &str) -> Result<Self> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ArquivistaError::Schema(format!("unknown category: {s}")))
    }
}

/// One record per discovered file. Immutable after Scan/Extract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path to the file
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Modification timestamp
    pub modified: DateTime<Local>,
    /// Creation timestamp, where the platform exposes one
    pub created: Option<DateTime<Local>>,
    /// Lowercase extension without the dot
    pub extension: String,
    /// MIME guess from the extension
    pub mime: String,
    /// SHA-256 of contents
    pub sha256: String,
    /// Bounded text excerpt, set by the Extractor
    pub excerpt: Option<String>,
}

impl FileRecord {
    /// Base file name, lossily decoded.
    pub fn base_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Where a classification decision came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationSource {
    /// Matched a deterministic rule, by rule id
    Rule(String),
    /// Produced by the LLM classifier
    Llm,
    /// Fallback after classification failure
    Fallback,
}

impl fmt::Display for ClassificationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassificationSource::Rule(id) => write!(f, "rule:{id}"),
            ClassificationSource::Llm => f.write_str("llm"),
            ClassificationSource::Fallback => f.write_str("fallback"),
        }
    }
}

impl Serialize for ClassificationSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ClassificationSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "llm" => Ok(ClassificationSource::Llm),
            "fallback" => Ok(ClassificationSource::Fallback),
            other => match other.strip_prefix("rule:") {
                Some(id) if !id.is_empty() => Ok(ClassificationSource::Rule(id.to_string())),
                _ => Err(serde::de::Error::custom(format!(
                    "invalid classification source: {other}"
                ))),
            },
        }
    }
}

/// Classification decision for one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    /// Free-form but sanitized subdivision of the category
    pub subcategory: String,
    /// Short human-readable descriptor
    pub subject: String,
    /// Document year; 0 when unknown
    pub year: i32,
    /// `YYYY-MM-DD__Category__Subject`, no extension
    pub suggested_name: String,
    /// 0-100
    pub confidence: u8,
    pub rationale: String,
    pub source: ClassificationSource,
}

/// One executable intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "MOVE")]
    Move,
    #[serde(rename = "COPY")]
    Copy,
    #[serde(rename = "RENAME")]
    Rename,
    #[serde(rename = "SKIP")]
    Skip,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Move => "MOVE",
            Action::Copy => "COPY",
            Action::Rename => "RENAME",
            Action::Skip => "SKIP",
        };
        f.write_str(s)
    }
}

/// A single planned filesystem mutation.
///
/// `size` and `sha256` capture the source state at plan time; the
/// executor refuses to act when the live file no longer matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    pub action: Action,
    pub source: PathBuf,
    /// Absent iff action is SKIP
    pub dest: Option<PathBuf>,
    pub reason: String,
    pub confidence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub llm_used: bool,
    pub size: u64,
    pub sha256: String,
}

/// Counts by action, kept in plan metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCounts {
    pub moves: usize,
    pub copies: usize,
    pub renames: usize,
    pub skips: usize,
}

impl ActionCounts {
    pub fn record(&mut self, action: Action) {
        match action {
            Action::Move => self.moves += 1,
            Action::Copy => self.copies += 1,
            Action::Rename => self.renames += 1,
            Action::Skip => self.skips += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.moves + self.copies + self.renames + self.skips
    }
}

/// Ordered collection of plan items plus metadata. The persisted JSON
/// form is the executor's sole input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub generated_at: DateTime<Local>,
    pub base_root: PathBuf,
    pub counts: ActionCounts,
    pub items: Vec<PlanItem>,
}

impl Plan {
    /// Persist the machine-readable plan.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a persisted plan. Any read or decode failure is a corrupt
    /// plan file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ArquivistaError::Plan(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| ArquivistaError::Plan(format!("corrupt plan {}: {e}", path.display())))
    }
}

/// Execution mode: simulate or mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecMode {
    #[serde(rename = "dry-run")]
    DryRun,
    #[serde(rename = "apply")]
    Apply,
}

/// Outcome status of one executed plan item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecStatus {
    #[serde(rename = "applied")]
    Applied,
    #[serde(rename = "dry-run")]
    DryRun,
    #[serde(rename = "skipped")]
    Skipped,
    #[serde(rename = "failed")]
    Failed,
}

/// Outcome of one plan item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub source: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_dest: Option<PathBuf>,
    /// Destination actually used; may differ from the planned one
    /// after live collision versioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_dest: Option<PathBuf>,
    pub status: ExecStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Local>,
}

/// Append-only record of an Execute run, persisted atomically at the
/// end of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub plan_id: String,
    pub mode: ExecMode,
    pub base_root: PathBuf,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub results: Vec<ExecutionResult>,
}

impl Manifest {
    pub fn new(plan: &Plan, mode: ExecMode) -> Self {
        Self {
            plan_id: plan.id.clone(),
            mode,
            base_root: plan.base_root.clone(),
            started_at: Local::now(),
            finished_at: None,
            results: Vec::new(),
        }
    }

    pub fn count(&self, status: ExecStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn any_failed(&self) -> bool {
        self.results.iter().any(|r| r.status == ExecStatus::Failed)
    }
}
