//! Error types for the authorization module.

use thiserror::Error;

use keygate_core::PolicyError;

use crate::state::FlowState;

/// Errors raised while delegating a capability and exchanging it for a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    /// The delegation signature does not verify for the claimed wallet.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The delegation nonce was already consumed.
    #[error("nonce already used")]
    NonceReplayed,

    /// The delegation is outside its validity window.
    #[error("delegation expired")]
    DelegationExpired,

    /// The delegation does not cover the requested resource or ability.
    #[error("scope mismatch: {0}")]
    ScopeMismatch(String),

    /// The nonce was not issued by the network or is too old.
    #[error("invalid nonce: {0}")]
    InvalidNonce(String),

    /// The nonce source could not be reached.
    #[error("nonce unavailable: {0}")]
    NonceUnavailable(String),

    /// The wallet refused or failed to sign.
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// The decryption flow was driven out of order.
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: FlowState, to: FlowState },

    /// The requested capability is broader than allowed.
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl AuthorizationError {
    /// Whether a fresh nonce could make the same request succeed.
    pub fn is_nonce_failure(&self) -> bool {
        matches!(
            self,
            AuthorizationError::NonceReplayed | AuthorizationError::InvalidNonce(_)
        )
    }
}

/// Errors from sealing and opening session-bound payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SealError {
    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("decryption error: {0}")]
    Decryption(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for authorization operations.
pub type Result<T> = std::result::Result<T, AuthorizationError>;
