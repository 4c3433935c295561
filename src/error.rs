//! Error types and handling for Offpeak
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Offpeak operations
pub type Result<T> = std::result::Result<T, OffpeakError>;

/// Main error type for Offpeak
#[derive(Debug, Error)]
pub enum OffpeakError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors with a field-level message
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// A tracker with the same identity is already configured
    #[error("Duplicate tracker: {identity}")]
    Duplicate { identity: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl OffpeakError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        OffpeakError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        OffpeakError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new duplicate-tracker error
    pub fn duplicate<S: Into<String>>(identity: S) -> Self {
        OffpeakError::Duplicate {
            identity: identity.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        OffpeakError::Io {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        OffpeakError::Generic {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for OffpeakError {
    fn from(err: std::io::Error) -> Self {
        OffpeakError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for OffpeakError {
    fn from(err: serde_yaml::Error) -> Self {
        OffpeakError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for OffpeakError {
    fn from(err: serde_json::Error) -> Self {
        OffpeakError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<chrono::ParseError> for OffpeakError {
    fn from(err: chrono::ParseError) -> Self {
        OffpeakError::validation("datetime", &err.to_string())
    }
}
