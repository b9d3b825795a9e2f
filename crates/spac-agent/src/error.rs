//! Error types for the local agent.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} fetching {url}")]
    Status { url: String, status: u16 },

    #[error("block-list is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Rules(#[from] spac_rules::RulesError),
}
