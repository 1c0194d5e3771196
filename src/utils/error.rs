//! Error Handling Module
//!
//! Defines the error type used across the library.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for soybean fine-tuning operations
#[derive(Error, Debug)]
pub enum SoybeanError {
    /// Error loading or processing an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoadError(PathBuf, String),

    /// Error with dataset operations
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error with model construction or weight import
    #[error("Model error: {0}")]
    Model(String),

    /// Error with training
    #[error("Training error: {0}")]
    Training(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Burn record save/load error
    #[error("Record error: {0}")]
    Record(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl From<serde_json::Error> for SoybeanError {
    fn from(err: serde_json::Error) -> Self {
        SoybeanError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for SoybeanError {
    fn from(err: toml::de::Error) -> Self {
        SoybeanError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for SoybeanError {
    fn from(err: toml::ser::Error) -> Self {
        SoybeanError::Serialization(err.to_string())
    }
}

/// Convenience Result type for library operations
pub type Result<T> = std::result::Result<T, SoybeanError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| SoybeanError::Dataset(format!("{}: {}", f(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SoybeanError::Dataset("test error".to_string());
        assert_eq!(format!("{}", err), "Dataset error: test error");
    }

    #[test]
    fn test_image_load_error() {
        let path = PathBuf::from("/data/Broken soybeans/0001.jpg");
        let err = SoybeanError::ImageLoadError(path, "unexpected EOF".to_string());
        let msg = format!("{}", err);
        assert!(msg.contains("0001.jpg"));
        assert!(msg.contains("unexpected EOF"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: SoybeanError = io.into();
        assert!(matches!(err, SoybeanError::Io(_)));
    }

    #[test]
    fn test_json_conversion() {
        let parsed: std::result::Result<u32, serde_json::Error> = serde_json::from_str("{oops");
        let err: SoybeanError = parsed.unwrap_err().into();
        assert!(matches!(err, SoybeanError::Serialization(_)));
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<i32, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"));

        let err = result
            .with_context(|| format!("Failed to read {}", "Broken soybeans"))
            .unwrap_err();
        assert!(matches!(err, SoybeanError::Dataset(_)));
        assert!(format!("{}", err).contains("Failed to read Broken soybeans: file not found"));
    }
}
