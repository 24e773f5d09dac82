//! Error types for resource parsing.

use thiserror::Error;

/// Errors raised while building resources from text.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResourceError {
    /// The entry does not have the `name:value` shape.
    #[error("malformed resource '{0}': expected name[(role)]:value")]
    Malformed(String),

    /// A scalar amount could not be parsed or is negative.
    #[error("invalid scalar for '{name}': {value}")]
    InvalidScalar { name: String, value: String },

    /// A range list could not be parsed.
    #[error("invalid ranges for '{name}': {value}")]
    InvalidRanges { name: String, value: String },
}

/// Result type for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;
