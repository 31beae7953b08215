//! Error types for conversion operations.

use thiserror::Error;

/// Errors that can occur while converting a legacy article body.
///
/// Unresolvable cross-references and external fetch failures are absorbed
/// where they happen (logged, conversion continues); only conditions that
/// make the whole document unusable surface here.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed markup: {0}")]
    Parse(String),

    #[error("document {pid} has no body")]
    NoBody { pid: String },

    #[error("invalid rules file: {0}")]
    Rules(String),

    #[error("fragment fetch failed: {0}")]
    Fetch(String),
}

pub type Result<T> = std::result::Result<T, Error>;
