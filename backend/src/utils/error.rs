use serde::Serialize;
use thiserror::Error;

/// Errors raised around the analysis core: reading inputs, decoding plans, loading config.
///
/// The detectors themselves never fail. Everything here belongs to the layer that
/// prepares SQL text and plan nodes before handing them to the engine.
#[derive(Error, Debug)]
pub enum AnalyzerError {
    // Input errors 1xxx
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Empty SQL input: {0}")]
    EmptySql(String),

    // Plan errors 2xxx
    #[error("Invalid execution plan: {0}")]
    InvalidPlan(String),

    #[error("Malformed plan JSON: {0}")]
    Json(#[from] serde_json::Error),

    // Configuration errors 3xxx
    #[error("Configuration error: {0}")]
    Config(String),

    // Generic wrapper for other errors - auto-convert from anyhow::Error
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AnalyzerError {
    /// Helper to create an I/O error bound to the path that failed
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Helper to create empty SQL error
    pub fn empty_sql(source: impl Into<String>) -> Self {
        Self::EmptySql(source.into())
    }

    /// Helper to create invalid plan error
    pub fn invalid_plan(message: impl Into<String>) -> Self {
        Self::InvalidPlan(message.into())
    }

    /// Helper to create configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Numeric code reported by the CLI, grouped by failure family
    pub fn error_code(&self) -> i32 {
        match self {
            Self::Io { .. } => 1001,
            Self::EmptySql(_) => 1002,

            Self::InvalidPlan(_) => 2001,
            Self::Json(_) => 2002,

            Self::Config(_) => 3001,

            Self::Internal(_) => 5001,
        }
    }

    pub fn to_report(&self) -> ErrorReport {
        ErrorReport { code: self.error_code(), message: self.to_string() }
    }
}

/// Machine-readable error payload written to stderr by the CLI
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub code: i32,
    pub message: String,
}

pub type AnalyzerResult<T> = Result<T, AnalyzerError>;
