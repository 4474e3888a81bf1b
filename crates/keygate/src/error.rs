//! Error types for Keygate.

use keygate_auth::AuthorizationError;
use keygate_core::{IdentifierError, PolicyError};
use keygate_net::{CryptoError, NetError};
use keygate_store::StorageError;
use thiserror::Error;

/// Errors that can occur during Keygate operations.
#[derive(Debug, Error)]
pub enum KeygateError {
    /// The access policy is invalid, malformed or too broad.
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    /// The wallet could not be authorized for a session.
    #[error("authorization error: {0}")]
    Authorization(#[from] AuthorizationError),

    /// The key network refused or failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Envelope storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A content address or wallet address did not parse.
    #[error("identifier error: {0}")]
    Identifier(#[from] IdentifierError),

    /// Bad configuration value.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<NetError> for KeygateError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::Crypto(e) => KeygateError::Crypto(e),
            NetError::Authorization(e) => KeygateError::Authorization(e),
            NetError::Policy(e) => KeygateError::Policy(e),
        }
    }
}

/// Coarse classification for callers deciding what to show or retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Nothing stored at the address.
    NotFound,
    /// The requester may not have the plaintext, or must sign again.
    NotAuthorized,
    /// Worth retrying later.
    Transient,
    /// The input is wrong and retrying will not help.
    Invalid,
}

impl KeygateError {
    pub fn kind(&self) -> FailureKind {
        match self {
            KeygateError::Storage(StorageError::NotFound(_)) => FailureKind::NotFound,
            KeygateError::Storage(StorageError::StoreUnavailable(_))
            | KeygateError::Storage(StorageError::Database(_)) => FailureKind::Transient,
            KeygateError::Storage(_) => FailureKind::Invalid,

            KeygateError::Authorization(e) => match e {
                AuthorizationError::NonceUnavailable(_) => FailureKind::Transient,
                AuthorizationError::InvalidTransition { .. } | AuthorizationError::Policy(_) => {
                    FailureKind::Invalid
                }
                _ => FailureKind::NotAuthorized,
            },

            KeygateError::Crypto(e) => match e {
                CryptoError::NetworkUnavailable(_) | CryptoError::QuorumTimeout { .. } => {
                    FailureKind::Transient
                }
                CryptoError::AccessDenied | CryptoError::CredentialExpired => {
                    FailureKind::NotAuthorized
                }
                _ => FailureKind::Invalid,
            },

            KeygateError::Policy(_) | KeygateError::Identifier(_) | KeygateError::Config(_) => {
                FailureKind::Invalid
            }
        }
    }
}

/// Result type for Keygate operations.
pub type Result<T> = std::result::Result<T, KeygateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            KeygateError::from(StorageError::NotFound("bafy".into())).kind(),
            FailureKind::NotFound
        );
        assert_eq!(
            KeygateError::from(CryptoError::AccessDenied).kind(),
            FailureKind::NotAuthorized
        );
        assert_eq!(
            KeygateError::from(AuthorizationError::DelegationExpired).kind(),
            FailureKind::NotAuthorized
        );
        assert_eq!(
            KeygateError::from(CryptoError::QuorumTimeout { received: 1, needed: 2 }).kind(),
            FailureKind::Transient
        );
        assert_eq!(
            KeygateError::from(PolicyError::InvalidPolicy("empty".into())).kind(),
            FailureKind::Invalid
        );
        assert_eq!(
            KeygateError::from(CryptoError::BindingMismatch).kind(),
            FailureKind::Invalid
        );
    }

    #[test]
    fn test_net_error_flattens() {
        let e = KeygateError::from(NetError::Authorization(AuthorizationError::NonceReplayed));
        assert!(matches!(
            e,
            KeygateError::Authorization(AuthorizationError::NonceReplayed)
        ));
    }
}
