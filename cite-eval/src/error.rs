//! Error types for the `cite-eval` crate.

use std::path::PathBuf;

use cite_rag::RagError;
use thiserror::Error;

/// Errors that can occur while loading eval sets, judging or writing reports.
#[derive(Debug, Error)]
pub enum EvalError {
    /// A line of the eval set could not be parsed.
    #[error("{path}:{line}: {message}")]
    InvalidRecord {
        /// The eval set file.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// What was wrong with the line.
        message: String,
    },

    /// The judge failed or replied with something unusable.
    #[error("Judge error: {0}")]
    JudgeError(String),

    /// A pipeline error outside per-record evaluation.
    #[error(transparent)]
    Rag(#[from] RagError),

    /// An I/O error while reading inputs or writing reports.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// A convenience result type for evaluation operations.
pub type Result<T> = std::result::Result<T, EvalError>;
