//! WolfLease Error Types

use thiserror::Error;

use crate::lease::LeaseError;

/// Result type alias for WolfLease operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfLease error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to render configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    // Lease service errors
    #[error("Lease error: {0}")]
    Lease(#[from] LeaseError),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Runtime errors
    #[error("No Tokio runtime available: {0}")]
    NoRuntime(String),

    #[error("Coordinator task has stopped")]
    ShuttingDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_error_converts() {
        let err: Error = LeaseError::LeaseLost { key: "leader".into() }.into();
        assert!(matches!(err, Error::Lease(LeaseError::LeaseLost { .. })));
        assert_eq!(err.to_string(), "Lease error: lease leader is no longer valid");
    }
}
