//! Error types for n2n-core

use thiserror::Error;

/// Result type alias for n2n-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in n2n-core
///
/// Per-record delivery failures are not errors: destinations report them
/// through [`crate::record::WriteOutcome`]. Only setup problems and
/// programmer errors surface here.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file could not be found
    #[error("configuration file not found: {path}")]
    ConfigNotFound {
        /// Path that was searched
        path: String,
    },

    /// Bad or missing settings, unreachable backing resource
    #[error("invalid configuration for {component}: {message}")]
    Configuration {
        /// Component whose configuration is invalid
        component: String,
        /// Description of what's invalid
        message: String,
    },

    /// A source or destination type name that nothing is registered for
    #[error("unsupported {kind} type '{requested}' (available: {available})")]
    UnknownType {
        /// `source` or `destination`
        kind: &'static str,
        /// The type name from the configuration
        requested: String,
        /// Comma separated list of registered type names
        available: String,
    },

    /// A component was used before `initialize` succeeded
    #[error("{component} used before initialize")]
    NotInitialized {
        /// Name of the component
        component: String,
    },

    /// `read()` was called a second time on a single-pass source
    #[error("{component} stream was already consumed")]
    StreamConsumed {
        /// Name of the component
        component: String,
    },

    /// A source item that cannot become a record
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Transform execution error for a single record
    #[error("transform error in '{transform}': {message}")]
    Transform {
        /// Name or type of the transform
        transform: String,
        /// Description of the error
        message: String,
    },

    /// Failed to parse YAML configuration
    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// CSV decoding error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a [`Error::Configuration`] error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Whether this error is fatal setup trouble rather than a runtime fault
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. }
                | Self::Configuration { .. }
                | Self::UnknownType { .. }
                | Self::Yaml(_)
        )
    }
}
