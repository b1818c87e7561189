//! Driver error taxonomy and the single store-error translation point.

use crate::store::StoreError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("path not found: {path}")]
    PathNotFound { path: String },
    #[error("operation unsupported by the {} driver", super::DRIVER_NAME)]
    Unsupported,
    #[error("invalid path: {path}")]
    InvalidPath { path: String },
    #[error("invalid driver option: {0}")]
    InvalidOption(String),
    #[error("{path}: {source}")]
    Store {
        path: String,
        #[source]
        source: StoreError,
    },
    #[error("reading data for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

pub type DriverResult<T> = Result<T, DriverError>;

/// A failed `write_stream`. `bytes_written` counts caller bytes that were
/// committed before the failure; resume at `offset + bytes_written`.
#[derive(Debug, Error)]
#[error("write stopped after {bytes_written} bytes: {source}")]
pub struct WriteError {
    pub bytes_written: u64,
    #[source]
    pub source: DriverError,
}

impl WriteError {
    pub fn new(bytes_written: u64, source: DriverError) -> Self {
        Self {
            bytes_written,
            source,
        }
    }
}

/// Translate a store error for `path` into the driver taxonomy.
///
/// A 404 becomes `PathNotFound`; everything else is passed through with the
/// failing path attached.
pub fn parse_error(path: &str, err: StoreError) -> DriverError {
    match err.status_code() {
        Some(404) => DriverError::PathNotFound {
            path: path.to_string(),
        },
        _ => DriverError::Store {
            path: path.to_string(),
            source: err,
        },
    }
}
