//! Error taxonomy for the Hermes buffering engine.
//!
//! Mirrors the kinds enumerated in the system design: configuration
//! failures are fatal at init, `OutOfSpace`/`NotFound` are typed results
//! the caller is expected to handle, and `ExternalIo` preserves the
//! underlying OS error.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HermesError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("out of space: no device could satisfy the placement request")]
    OutOfSpace,

    #[error("external I/O error: {0}")]
    ExternalIo(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("Hermes is not initialized")]
    Uninitialized,

    #[error("Hermes is shutting down")]
    ShuttingDown,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HermesError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, HermesError::NotFound(_))
    }

    pub fn is_out_of_space(&self) -> bool {
        matches!(self, HermesError::OutOfSpace)
    }
}

pub type Result<T> = std::result::Result<T, HermesError>;
