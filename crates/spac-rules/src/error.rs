//! Error types for the rule engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading or compiling rules.
#[derive(Error, Debug)]
pub enum RulesError {
    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rule file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}
