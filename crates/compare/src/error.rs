//! Error types for image comparison

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompareError {
    #[error("Screenshot not found: {0}")]
    MissingImage(PathBuf),

    #[error("Comparison task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type CompareResult<T> = Result<T, CompareError>;

impl From<CompareError> for shotcheck_engine::Error {
    fn from(e: CompareError) -> Self {
        shotcheck_engine::Error::Comparison(e.to_string())
    }
}
