#![forbid(unsafe_code)]
//! Error types for PebbleFS.
//!
//! Defines `PfsError` and a `Result<T>` alias used throughout the workspace.

use pfs_types::{BlockPair, ParseError};
use thiserror::Error;

/// Unified error type for all PebbleFS operations.
#[derive(Debug, Error)]
pub enum PfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u64, detail: ParseError },

    #[error("metadata pair {pair} unreachable: {detail}")]
    Disconnected { pair: BlockPair, detail: String },

    #[error("invalid configuration: {0}")]
    Format(String),

    #[error("no space left on device")]
    NoSpace,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("value expected: {0}")]
    ValueExpected(String),

    #[error("dictionary expected: {0}")]
    DictionaryExpected(String),

    #[error("too many retries: {0}")]
    TooManyRetries(u32),
}

impl PfsError {
    /// Attach the block a codec failure was observed on.
    #[must_use]
    pub fn corrupt(block: u64, detail: ParseError) -> Self {
        Self::Corruption { block, detail }
    }
}

/// Result alias using `PfsError`.
pub type Result<T> = std::result::Result<T, PfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = PfsError::corrupt(3, ParseError::NoCommit);
        assert_eq!(
            err.to_string(),
            "corrupt metadata at block 3: no valid commit in metadata block"
        );

        let err = PfsError::NotFound("a/b".to_owned());
        assert_eq!(err.to_string(), "not found: a/b");
    }
}
