//! Error types for keygate

use std::io;

use thiserror::Error;

/// Result type alias for keygate
pub type Result<T> = std::result::Result<T, Error>;

/// keygate errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::Config("auth.validator_url is required".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: auth.validator_url is required"
        );
    }

    #[test]
    fn test_from_io() {
        let err: Error = io::Error::new(io::ErrorKind::AddrInUse, "port taken").into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.to_string(), "IO error: port taken");
    }
}
