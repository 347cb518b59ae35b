//! Error types shared by the crate.
//!
//! Caller logic errors (shape or distribution mismatches, pivot counts that exceed
//! the number of rows, reallocation of borrowed storage) are not represented here.
//! They are checked with assertions at the API boundary and abort the calling process.

use ndarray_linalg::error::LinalgError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RustyReductionError {
    #[error("Lapack Error: {0}")]
    LinalgError(#[from] LinalgError),
    #[error("Lapack routine `{routine}` failed with info = {info}")]
    LapackError { routine: &'static str, info: i32 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode matrix record: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("Failed to decode matrix record: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("Inconsistent matrix record: {0}")]
    FormatError(String),
}

pub type Result<T> = std::result::Result<T, RustyReductionError>;
