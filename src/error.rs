//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides one consistent way to report the
//! failures that can occur while driving the rig and reading or writing a
//! dataset.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment` while loading settings.
//! - **`Configuration`**: Semantic errors in settings that parsed fine but are
//!   logically wrong (e.g. `min_force > max_force`). Raised by validation.
//! - **`Io`**: Wraps `std::io::Error` for file and socket I/O.
//! - **`Archive`**: Wraps `zip` errors while reading or writing `.npz` files.
//! - **`Array`**: An entry could not be encoded/decoded as an NPY array, or
//!   arrays could not be stacked.
//! - **`Instrument`**: A device returned something unexpected or refused a
//!   command.
//! - **`Timeout`**: A device did not reach the expected state in time.
//! - **`InvalidDescription`**: Operator input did not parse into an object
//!   description.
//! - **`Dataset`**: A dataset directory is missing, empty, or inconsistent.
//! - **`FeatureNotEnabled`**: A device backend was requested that this build
//!   does not provide.
//!
//! By using `#[from]`, `DaqError` can be created from the underlying error
//! types with the `?` operator.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Array error: {0}")]
    Array(String),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Invalid object description: {0}")]
    InvalidDescription(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Item {index} field '{field}' does not match dataset spec: expected {expected}, found {found}")]
    SpecMismatch {
        index: usize,
        field: String,
        expected: String,
        found: String,
    },

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<DaqError>),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

impl From<ndarray::ShapeError> for DaqError {
    fn from(err: ndarray::ShapeError) -> Self {
        DaqError::Array(err.to_string())
    }
}
