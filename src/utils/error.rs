//! Error Handling Module
//!
//! Defines the error type shared by the model builders.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for model construction
#[derive(Error, Debug)]
pub enum Error {
    /// Layer or input shapes do not line up
    #[error("Shape mismatch: {0}")]
    Shape(String),

    /// A hyperparameter is out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Pretrained weights could not be found
    #[error("Pretrained weights not found at '{}'", .0.display())]
    WeightsUnavailable(PathBuf),

    /// Burn recorder failed to decode a weight file
    #[error("Failed to load weight record: {0}")]
    Record(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<burn::record::RecorderError> for Error {
    fn from(err: burn::record::RecorderError) -> Self {
        Error::Record(format!("{:?}", err))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Convenience Result type for model construction
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Shape("pool window 4 exceeds 3x3 input".to_string());
        assert_eq!(err.to_string(), "Shape mismatch: pool window 4 exceeds 3x3 input");
    }

    #[test]
    fn test_weights_unavailable_mentions_path() {
        let err = Error::WeightsUnavailable(PathBuf::from("/weights/vgg16.mpk"));
        assert!(err.to_string().contains("vgg16.mpk"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let parsed: std::result::Result<toml::Value, _> = toml::from_str("num_classes = ");
        let err: Error = parsed.unwrap_err().into();
        assert!(matches!(err, Error::Config(_)));
    }
}
