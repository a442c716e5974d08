use thiserror::Error;
use std::io;
use std::path::PathBuf;

/// Custom error types for fibermorph
#[derive(Error, Debug)]
pub enum FiberMorphError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load configuration from {path}: {message}")]
    ConfigLoad {
        path: PathBuf,
        message: String,
    },

    #[error("Failed to read image {path}: {message}")]
    InputRead {
        path: PathBuf,
        message: String,
    },

    #[error("No reader registered for {0}")]
    UnsupportedFormat(PathBuf),

    #[error("CSV output error: {0}")]
    CsvOutput(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Pipeline panicked while processing {path}: {message}")]
    PipelinePanic {
        path: PathBuf,
        message: String,
    },

    #[error("Invalid input path: {0}")]
    InvalidPath(PathBuf),

    #[error("Unexpected error: {0}")]
    Other(String),
}

impl FiberMorphError {
    /// Configuration-level errors abort the run before any image is processed
    pub fn is_fatal(&self) -> bool {
        matches!(self, FiberMorphError::Config(_) | FiberMorphError::ConfigLoad { .. })
    }
}

/// Type alias for Result with our custom error type
pub type Result<T> = std::result::Result<T, FiberMorphError>;
