//! Key node protocol messages.
//!
//! Every exchange is a single request answered by a single response.
//! Refusals carry only a [`NodeRejection`] code; nodes never say which
//! policy clause failed.

use std::fmt;

use serde::{Deserialize, Serialize};

use keygate_auth::{
    AuthorizationError, CapabilityDelegation, NetworkNonce, SealedShare, SessionGrant,
    X25519PublicKey,
};
use keygate_core::{AccessPolicy, Blake3Hash, BindingHash, Ed25519PublicKey};

use crate::error::CryptoError;
use crate::threshold::{DleqProof, PublicKeySet};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 0;

/// Unique identifier for a key node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Node id for an identity key.
    pub fn from_identity(key: &Ed25519PublicKey) -> Self {
        Self(*key.as_bytes())
    }

    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..4]))
    }
}

/// Requests a client sends to a key node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeRequest {
    /// Learn the node's identity and the network key.
    Handshake,

    /// Ask for a fresh single-use nonce.
    FetchNonce,

    /// Ask for a binding tag over a policy and plaintext hash.
    Bind {
        policy: AccessPolicy,
        data_hash: Blake3Hash,
    },

    /// Exchange a signed delegation for a session grant.
    Authorize {
        delegation: CapabilityDelegation,
        session_public: X25519PublicKey,
    },

    /// Ask for a decryption share under an established session.
    Decrypt {
        grant: SessionGrant,
        policy: AccessPolicy,
        binding_hash: BindingHash,
        ciphertext: Vec<u8>,
    },
}

impl NodeRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            NodeRequest::Handshake => "handshake",
            NodeRequest::FetchNonce => "fetch_nonce",
            NodeRequest::Bind { .. } => "bind",
            NodeRequest::Authorize { .. } => "authorize",
            NodeRequest::Decrypt { .. } => "decrypt",
        }
    }
}

/// What a node says about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_key: Ed25519PublicKey,
    /// Index of the node's key share, starting at 1.
    pub share_index: u32,
    pub public_keys: PublicKeySet,
    pub protocol_version: u8,
}

/// A decryption share sealed to the requesting session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareResponse {
    pub share_index: u32,
    /// The compressed share point, sealed to the session key.
    pub sealed_point: SealedShare,
    pub proof: DleqProof,
}

/// Responses from a key node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeResponse {
    Handshake(NodeInfo),
    Nonce(NetworkNonce),
    Bound { tag: [u8; 32] },
    Authorized(SessionGrant),
    Share(ShareResponse),
    Rejected(NodeRejection),
}

/// Refusal codes. Deliberately coarse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRejection {
    InvalidSignature,
    NonceReplayed,
    InvalidNonce,
    DelegationExpired,
    ScopeMismatch,
    CredentialExpired,
    BindingMismatch,
    AccessDenied,
    PolicyRejected,
    InvalidCiphertext,
    /// The node could not evaluate the request right now.
    Unavailable,
    BadRequest,
}

impl NodeRejection {
    /// The error a client reports when this rejection decides a quorum.
    pub fn into_crypto_error(self) -> CryptoError {
        match self {
            NodeRejection::CredentialExpired => CryptoError::CredentialExpired,
            NodeRejection::BindingMismatch => CryptoError::BindingMismatch,
            NodeRejection::AccessDenied => CryptoError::AccessDenied,
            NodeRejection::PolicyRejected => {
                CryptoError::PolicyRejected("refused by key nodes".into())
            }
            NodeRejection::InvalidCiphertext => {
                CryptoError::InvalidCiphertext("refused by key nodes".into())
            }
            other => CryptoError::NetworkUnavailable(format!("nodes answered {other:?}")),
        }
    }

    /// The authorization error for this rejection, if it is one.
    pub fn as_authorization_error(self) -> Option<AuthorizationError> {
        match self {
            NodeRejection::InvalidSignature => Some(AuthorizationError::InvalidSignature(
                "rejected by key nodes".into(),
            )),
            NodeRejection::NonceReplayed => Some(AuthorizationError::NonceReplayed),
            NodeRejection::InvalidNonce => Some(AuthorizationError::InvalidNonce(
                "rejected by key nodes".into(),
            )),
            NodeRejection::DelegationExpired => Some(AuthorizationError::DelegationExpired),
            NodeRejection::ScopeMismatch => Some(AuthorizationError::ScopeMismatch(
                "rejected by key nodes".into(),
            )),
            _ => None,
        }
    }
}

/// Serialize a message to CBOR bytes.
pub fn to_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, String> {
    let mut buf = Vec::new();
    ciborium::into_writer(message, &mut buf).map_err(|e| e.to_string())?;
    Ok(buf)
}

/// Deserialize a message from CBOR bytes.
pub fn from_frame<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, String> {
    ciborium::from_reader(bytes).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keygate_core::{single_address_policy, Chain};

    #[test]
    fn test_request_frame_roundtrip() {
        let request = NodeRequest::Bind {
            policy: single_address_policy(Chain::ethereum(), "0x01"),
            data_hash: Blake3Hash::hash(b"doc"),
        };
        let decoded: NodeRequest = from_frame(&to_frame(&request).unwrap()).unwrap();

        match decoded {
            NodeRequest::Bind { policy, data_hash } => {
                assert_eq!(policy, single_address_policy(Chain::ethereum(), "0x01"));
                assert_eq!(data_hash, Blake3Hash::hash(b"doc"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rejection_mapping() {
        assert_eq!(
            NodeRejection::AccessDenied.into_crypto_error(),
            CryptoError::AccessDenied
        );
        assert_eq!(
            NodeRejection::NonceReplayed.as_authorization_error(),
            Some(AuthorizationError::NonceReplayed)
        );
        assert!(NodeRejection::AccessDenied.as_authorization_error().is_none());
    }
}
