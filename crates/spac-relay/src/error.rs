//! Error types for the relay server.

use thiserror::Error;

/// Errors surfaced by the relay server.
///
/// Everything the relay does after binding is per-session and handled in
/// place, so only the serve loop's I/O failures bubble up.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
