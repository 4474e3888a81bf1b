//! Error types for the key network.

use thiserror::Error;

use keygate_auth::AuthorizationError;
use keygate_core::PolicyError;

use crate::threshold::ThresholdError;

/// Errors from threshold encryption and decryption.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Fewer than the threshold of nodes could be reached.
    #[error("key network unavailable: {0}")]
    NetworkUnavailable(String),

    /// Enough nodes refused to bind the policy.
    #[error("policy rejected: {0}")]
    PolicyRejected(String),

    /// The requester does not satisfy the policy.
    #[error("access denied")]
    AccessDenied,

    /// Too few decryption shares arrived before the deadline.
    #[error("quorum timeout: received {received} of {needed} shares")]
    QuorumTimeout { received: usize, needed: usize },

    /// The session credential has expired or was not accepted.
    #[error("session credential expired")]
    CredentialExpired,

    /// The binding hash was not minted by this network for this policy.
    #[error("binding hash does not match policy")]
    BindingMismatch,

    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// Recombined plaintext does not match the bound data hash.
    #[error("decrypted data failed integrity check")]
    IntegrityFailure,
}

impl From<ThresholdError> for CryptoError {
    fn from(e: ThresholdError) -> Self {
        match e {
            ThresholdError::Integrity => CryptoError::IntegrityFailure,
            ThresholdError::NotEnoughShares { needed, got } => CryptoError::QuorumTimeout {
                received: got,
                needed,
            },
            other => CryptoError::InvalidCiphertext(other.to_string()),
        }
    }
}

/// Errors surfaced by the network client and the session authorizer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl From<ThresholdError> for NetError {
    fn from(e: ThresholdError) -> Self {
        NetError::Crypto(e.into())
    }
}

/// Failure to exchange a message with a node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("node unreachable: {0}")]
    Unreachable(String),

    #[error("codec error: {0}")]
    Codec(String),
}

/// Result type for network operations.
pub type Result<T> = std::result::Result<T, NetError>;
