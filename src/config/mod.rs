// SPDX-License-Identifier: MIT

//! Configuration management for Arquivista

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Base root: all destination paths live under this directory
    pub base_root: PathBuf,

    /// Directory for plan artifacts
    #[serde(default = "default_plans_dir")]
    pub plans_dir: PathBuf,

    /// Directory for manifests and run logs
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    /// Path to the YAML rules file
    #[serde(default = "default_rules_path")]
    pub rules_path: PathBuf,

    /// Budget in seconds for one file's extraction and classification
    #[serde(default = "default_file_timeout")]
    pub file_timeout_secs: u64,

    /// Overall run deadline in seconds; unset means no deadline
    #[serde(default)]
    pub run_deadline_secs: Option<u64>,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub extractor: ExtractorConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub planner: PlannerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScannerConfig {
    /// Minimum file size in bytes
    #[serde(default = "default_min_file_size")]
    pub min_file_size: u64,
    /// Directory base names skipped during the walk
    #[serde(default = "default_excluded_dirs")]
    pub excluded_dirs: Vec<String>,
    /// Extensions (without dot, lowercase) never scanned
    #[serde(default = "default_excluded_extensions")]
    pub excluded_extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExtractorConfig {
    /// Excerpt cap in bytes
    #[serde(default = "default_max_excerpt_bytes")]
    pub max_excerpt_bytes: usize,
    /// Pages read from the front of a PDF
    #[serde(default = "default_pdf_pages")]
    pub pdf_pages: u32,
    /// Rows read from each spreadsheet sheet
    #[serde(default = "default_sheet_rows")]
    pub sheet_rows: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Schema retries per file
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Concurrent in-flight classification requests
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Overall request-per-minute ceiling
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Excerpt bytes included in a prompt
    #[serde(default = "default_prompt_excerpt_bytes")]
    pub prompt_excerpt_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GeminiConfig {
    #[serde(default = "default_gemini_model")]
    pub model: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OpenAiConfig {
    #[serde(default = "default_openai_model")]
    pub model: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlannerConfig {
    /// Minimum confidence for a non-inbox destination
    #[serde(default = "default_min_confidence")]
    pub min_confidence: u8,
}

// Default value functions
fn default_plans_dir() -> PathBuf {
    PathBuf::from("plans")
}
fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_rules_path() -> PathBuf {
    PathBuf::from("configs/rules.yaml")
}
fn default_min_file_size() -> u64 {
    1024
}
fn default_file_timeout() -> u64 {
    60
}
fn default_max_excerpt_bytes() -> usize {
    8192
}
fn default_pdf_pages() -> u32 {
    5
}
fn default_sheet_rows() -> usize {
    20
}
fn default_max_attempts() -> u32 {
    3
}
fn default_request_timeout() -> u64 {
    30
}
fn default_concurrency() -> usize {
    4
}
fn default_requests_per_minute() -> u32 {
    60
}
fn default_prompt_excerpt_bytes() -> usize {
    2000
}
fn default_ollama_url() -> String {
    std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| "http://localhost:11434".to_string())
}
fn default_ollama_model() -> String {
    "qwen2.5:7b".to_string()
}
fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_min_confidence() -> u8 {
    85
}

fn default_excluded_dirs() -> Vec<String> {
    [
        // Version control
        ".git",
        ".svn",
        ".hg",
        // IDE / editor
        ".vscode",
        ".idea",
        ".vs",
        // Language tooling
        "__pycache__",
        ".pytest_cache",
        ".mypy_cache",
        "venv",
        ".venv",
        ".tox",
        "node_modules",
        ".npm",
        ".yarn",
        "target",
        // System
        "$RECYCLE.BIN",
        "System Volume Information",
        ".Trash",
        ".cache",
        // Sensitive
        ".ssh",
        ".gnupg",
        ".aws",
        ".azure",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_excluded_extensions() -> Vec<String> {
    [
        // Executables and scripts
        "exe", "dll", "sys", "msi", "com", "scr", "bat", "cmd", "ps1", "sh", "bash",
        // Temporary
        "tmp", "temp", "bak", "swp", "lock", "part", "crdownload",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_file_size: default_min_file_size(),
            excluded_dirs: default_excluded_dirs(),
            excluded_extensions: default_excluded_extensions(),
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_excerpt_bytes: default_max_excerpt_bytes(),
            pdf_pages: default_pdf_pages(),
            sheet_rows: default_sheet_rows(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            ollama: OllamaConfig::default(),
            gemini: GeminiConfig::default(),
            openai: OpenAiConfig::default(),
            max_attempts: default_max_attempts(),
            request_timeout_secs: default_request_timeout(),
            concurrency: default_concurrency(),
            requests_per_minute: default_requests_per_minute(),
            prompt_excerpt_bytes: default_prompt_excerpt_bytes(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: default_gemini_model(),
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            model: default_openai_model(),
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_root: PathBuf::from("organized"),
            plans_dir: default_plans_dir(),
            logs_dir: default_logs_dir(),
            rules_path: default_rules_path(),
            file_timeout_secs: default_file_timeout(),
            run_deadline_secs: None,
            scanner: ScannerConfig::default(),
            extractor: ExtractorConfig::default(),
            llm: LlmConfig::default(),
            planner: PlannerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content).map_err(|e| {
                crate::ArquivistaError::Config(format!("Failed to parse config: {e}"))
            })?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
