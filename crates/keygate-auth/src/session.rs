//! Session credentials.
//!
//! A session is the ephemeral product of one delegation exchange: an X25519
//! secret generated locally plus one signed grant from each accepting key
//! node. Key nodes seal decryption shares to the session public key, so the
//! credential is the only thing that can open them.
//!
//! [`SessionCredential`] is intentionally neither `Clone` nor serializable.

use serde::{Deserialize, Serialize};

use keygate_core::{Ed25519PublicKey, Ed25519Signature, Keypair, WalletAddress};

use crate::crypto::{X25519PublicKey, X25519StaticSecret};
use crate::delegation::{Ability, CapabilityDelegation, ResourceDescriptor};
use crate::error::SealError;
use crate::keyshare::SealedShare;

/// What a session may do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionScope {
    pub wallet: WalletAddress,
    pub resource: ResourceDescriptor,
    pub ability: Ability,
    /// Unix milliseconds.
    pub expires_at: i64,
}

impl SessionScope {
    pub fn from_delegation(delegation: &CapabilityDelegation) -> Self {
        Self {
            wallet: delegation.wallet_address(),
            resource: delegation.resource().clone(),
            ability: delegation.ability().clone(),
            expires_at: delegation.expires_at(),
        }
    }
}

/// A key node's signed acceptance of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionGrant {
    /// Identity key of the issuing node.
    pub node_key: Ed25519PublicKey,
    pub session_public: X25519PublicKey,
    pub scope: SessionScope,
    pub signature: Ed25519Signature,
}

/// Signed portion of a grant.
#[derive(Serialize)]
struct GrantDigest<'a> {
    domain: &'static str,
    node_key: &'a Ed25519PublicKey,
    session_public: &'a X25519PublicKey,
    scope: &'a SessionScope,
}

impl SessionGrant {
    /// Sign a grant with the node identity key.
    pub fn issue(
        node: &Keypair,
        session_public: X25519PublicKey,
        scope: SessionScope,
    ) -> Result<Self, SealError> {
        let node_key = node.public_key();
        let message = signing_bytes(&node_key, &session_public, &scope)?;
        Ok(Self {
            node_key,
            session_public,
            scope,
            signature: node.sign(&message),
        })
    }

    /// Check the signature was made by `node_key`.
    pub fn verify(&self) -> bool {
        match signing_bytes(&self.node_key, &self.session_public, &self.scope) {
            Ok(message) => self.node_key.verify(&message, &self.signature),
            Err(_) => false,
        }
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.scope.expires_at
    }
}

fn signing_bytes(
    node_key: &Ed25519PublicKey,
    session_public: &X25519PublicKey,
    scope: &SessionScope,
) -> Result<Vec<u8>, SealError> {
    let digest = GrantDigest {
        domain: "keygate/session-grant/v0",
        node_key,
        session_public,
        scope,
    };
    let mut buf = Vec::new();
    ciborium::into_writer(&digest, &mut buf)
        .map_err(|e| SealError::Serialization(e.to_string()))?;
    Ok(buf)
}

/// Local X25519 key for a session that has not been granted yet.
pub struct SessionKey {
    secret: X25519StaticSecret,
}

impl SessionKey {
    pub fn generate() -> Self {
        Self {
            secret: X25519StaticSecret::generate(),
        }
    }

    pub fn public_key(&self) -> X25519PublicKey {
        self.secret.public_key()
    }

    /// Attach the grants collected for this key.
    pub fn into_credential(self, scope: SessionScope, grants: Vec<SessionGrant>) -> SessionCredential {
        SessionCredential {
            secret: self.secret,
            scope,
            grants,
        }
    }
}

/// An established session. Dropped after one decryption flow.
pub struct SessionCredential {
    secret: X25519StaticSecret,
    scope: SessionScope,
    grants: Vec<SessionGrant>,
}

impl SessionCredential {
    pub fn public_key(&self) -> X25519PublicKey {
        self.secret.public_key()
    }

    pub fn scope(&self) -> &SessionScope {
        &self.scope
    }

    pub fn wallet(&self) -> WalletAddress {
        self.scope.wallet
    }

    pub fn resource(&self) -> &ResourceDescriptor {
        &self.scope.resource
    }

    pub fn expires_at(&self) -> i64 {
        self.scope.expires_at
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.scope.expires_at
    }

    pub fn grants(&self) -> &[SessionGrant] {
        &self.grants
    }

    /// Grant issued by the node with identity `node_key`.
    pub fn grant_for(&self, node_key: &Ed25519PublicKey) -> Option<&SessionGrant> {
        self.grants.iter().find(|g| &g.node_key == node_key)
    }

    /// Open a payload a node sealed to this session.
    pub fn open(&self, sealed: &SealedShare, context: &[u8]) -> Result<Vec<u8>, SealError> {
        sealed.open(&self.secret, context)
    }
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredential")
            .field("public_key", &self.public_key())
            .field("scope", &self.scope)
            .field("grants", &self.grants.len())
            .finish()
    }
}
