//! # Error Types
//!
//! Custom error types for Drone Link using `thiserror`.

use thiserror::Error;

/// Main error type for Drone Link
#[derive(Debug, Error)]
pub enum DroneLinkError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Drone Link
pub type Result<T> = std::result::Result<T, DroneLinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts() {
        let err: DroneLinkError = toml::from_str::<toml::Value>("= nope").unwrap_err().into();
        assert!(matches!(err, DroneLinkError::Config(_)));
        assert!(err.to_string().starts_with("Configuration error"));
    }

    #[test]
    fn test_io_error_converts() {
        let err: DroneLinkError = std::io::Error::new(std::io::ErrorKind::AddrInUse, "taken").into();
        assert!(matches!(err, DroneLinkError::Io(_)));
        assert_eq!(err.to_string(), "I/O error: taken");
    }
}
