// SPDX-License-Identifier: MIT

//! Error types for Arquivista

use thiserror::Error;

/// Result type alias for Arquivista operations
pub type Result<T> = std::result::Result<T, ArquivistaError>;

/// Arquivista error types
#[derive(Error, Debug)]
pub enum ArquivistaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Collision error: {0}")]
    Collision(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Plan file error: {0}")]
    Plan(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ArquivistaError {
    /// Stable machine-readable kind, recorded in execution results.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Api(_) => "api",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::Extraction(_) => "extraction",
            Self::Schema(_) => "schema",
            Self::Collision(_) => "collision",
            Self::Integrity(_) => "integrity",
            Self::Plan(_) => "plan",
            Self::Json(_) => "json",
        }
    }
}
