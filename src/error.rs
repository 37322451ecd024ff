//! Crate-level error type for the seams a caller might reasonably match on.
//!
//! Per-connection failures (a bad request line, a `read`/`write` returning an
//! OS error) never surface here — they close that one connection and the
//! reactor carries on. This type is for failures in setting the server up at
//! all: bad configuration, a listener that can't bind, and the like.

use std::path::PathBuf;

use crate::http::ParseError;

/// Errors that can abort server startup or a single, non-recoverable step of
/// request handling that the caller may want to match on.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Any I/O failure outside the per-connection hot path (binding the
    /// listening socket, reading the configured document root, etc).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A request failed to parse as HTTP/1.1.
    #[error("HTTP parse error: {0}")]
    Parse(#[from] ParseError),

    /// The configured document root does not exist or is not a directory.
    #[error("document root {0:?} is not a directory")]
    InvalidDocRoot(PathBuf),
}
