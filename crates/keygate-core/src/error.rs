//! Error types for Keygate core.

use thiserror::Error;

/// Errors raised while building, encoding or scoping an access policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The policy is well-formed but uses something this network cannot evaluate.
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// The encoded policy does not match the wire schema.
    #[error("malformed policy: {0}")]
    MalformedPolicy(String),

    /// A capability request covers more than one resource, ability or a long window.
    #[error("scope too broad: {0}")]
    ScopeTooBroad(String),
}

/// Errors for identifier parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid wallet address: {0}")]
    InvalidAddress(String),

    #[error("invalid content address: {0}")]
    InvalidContentAddress(String),
}

impl From<hex::FromHexError> for IdentifierError {
    fn from(e: hex::FromHexError) -> Self {
        IdentifierError::InvalidHex(e.to_string())
    }
}

/// Result type for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;
