//! Error types for ID-photo preparation

use thiserror::Error;

/// Result type alias for photo preparation operations
pub type Result<T> = std::result::Result<T, PhotoError>;

/// Error taxonomy for the preparation pipeline
///
/// Only [`PhotoError::InvalidInput`] and [`PhotoError::Decode`] abort a run.
/// Every other variant is recovered inside the pipeline and surfaced as a
/// validation entry.
#[derive(Error, Debug)]
pub enum PhotoError {
    /// Wrong file type or size, rejected before any processing
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Corrupt or unsupported image data
    #[error("Decode error: {0}")]
    Decode(String),

    /// Model-based segmentation could not produce a usable mask
    #[error("Segmentation unavailable: {0}")]
    SegmentationUnavailable(String),

    /// Heuristic segmentation hit an internal failure
    #[error("Heuristic segmentation failed: {0}")]
    HeuristicSegmentationFailed(String),

    /// Canvas allocation or drawing failed
    #[error("Composition failure: {0}")]
    CompositionFailure(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Network errors while fetching model files
    #[error("Network error: {0}")]
    Network(String),

    /// Input/output errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image codec errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Unexpected internal conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PhotoError {
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    pub fn segmentation_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::SegmentationUnavailable(msg.into())
    }

    pub fn heuristic_failed<S: Into<String>>(msg: S) -> Self {
        Self::HeuristicSegmentationFailed(msg.into())
    }

    pub fn composition<S: Into<String>>(msg: S) -> Self {
        Self::CompositionFailure(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create network error with operation context
    pub fn network_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::Network(format!("{}: {}", context.into(), error))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        Self::Io(std::io::Error::new(
            error.kind(),
            format!(
                "Failed to {} '{}': {}",
                operation,
                path.as_ref().display(),
                error
            ),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Whether this error ends a pipeline run without producing an image
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::Decode(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PhotoError::invalid_config("tolerance out of range");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: tolerance out of range"
        );

        let err = PhotoError::segmentation_unavailable("no mask field");
        assert_eq!(err.to_string(), "Segmentation unavailable: no mask field");
    }

    #[test]
    fn test_only_input_and_decode_are_fatal() {
        assert!(PhotoError::invalid_input("gif").is_fatal());
        assert!(PhotoError::decode("truncated").is_fatal());
        assert!(!PhotoError::segmentation_unavailable("timeout").is_fatal());
        assert!(!PhotoError::heuristic_failed("empty border").is_fatal());
        assert!(!PhotoError::composition("oom").is_fatal());
        assert!(!PhotoError::internal("join").is_fatal());
    }

    #[test]
    fn test_config_value_error_context() {
        let err = PhotoError::config_value_error("tolerance", 300, "1-255", Some(30));
        let msg = err.to_string();
        assert!(msg.contains("tolerance"));
        assert!(msg.contains("300"));
        assert!(msg.contains("1-255"));
        assert!(msg.contains("Recommended: 30"));
    }

    #[test]
    fn test_file_io_error_context() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = PhotoError::file_io_error("read input", "/tmp/photo.jpg", &io);
        let msg = err.to_string();
        assert!(msg.contains("read input"));
        assert!(msg.contains("/tmp/photo.jpg"));
    }
}
