//! Error primitives shared across the crate boundary, mirroring the style
//! used for FFI-facing error types elsewhere in this lineage: a small
//! `thiserror` enum plus a result alias.

use thiserror::Error;

pub type AbiResult<T> = Result<T, AbiError>;

#[derive(Debug, Error)]
pub enum AbiError {
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("argument error: {0}")]
    ArgumentError(String),

    #[error("helper '{0}' is not registered")]
    HelperMissing(String),
}

impl From<String> for AbiError {
    fn from(msg: String) -> Self {
        Self::ArgumentError(msg)
    }
}

impl From<&str> for AbiError {
    fn from(msg: &str) -> Self {
        Self::ArgumentError(msg.to_string())
    }
}
