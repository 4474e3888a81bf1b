//! Symmetric and key-agreement primitives.
//!
//! Provides X25519 key agreement for session keys and ChaCha20-Poly1305
//! authenticated encryption with associated data.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::error::SealError;

/// An X25519 public key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct X25519PublicKey(pub [u8; 32]);

impl X25519PublicKey {
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl fmt::Debug for X25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519Pub({:02x}{:02x}{:02x}{:02x}..)", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl From<PublicKey> for X25519PublicKey {
    fn from(pk: PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

/// An X25519 static secret.
///
/// Deliberately neither `Clone` nor serializable.
pub struct X25519StaticSecret(StaticSecret);

impl X25519StaticSecret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(StaticSecret::from(bytes))
    }

    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey::from(PublicKey::from(&self.0))
    }

    pub fn diffie_hellman(&self, peer_public: &X25519PublicKey) -> SharedKey {
        let shared = self.0.diffie_hellman(&peer_public.to_dalek());
        SharedKey(*shared.as_bytes())
    }
}

impl fmt::Debug for X25519StaticSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519StaticSecret({:?})", self.public_key())
    }
}

/// A shared secret derived from X25519 key agreement.
pub struct SharedKey([u8; 32]);

impl SharedKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive a wrapping key bound to `context`.
    pub fn derive_encryption_key(&self, context: &[u8]) -> EncryptionKey {
        let mut hasher = blake3::Hasher::new_derive_key("keygate/session-seal/v0");
        hasher.update(&self.0);
        hasher.update(context);
        EncryptionKey(*hasher.finalize().as_bytes())
    }
}

/// A 256-bit symmetric key for ChaCha20-Poly1305.
#[derive(Clone)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encrypt `plaintext`, authenticating `aad` alongside it.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        aad: &[u8],
        nonce: &EncryptionNonce,
    ) -> Result<Vec<u8>, SealError> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| SealError::Encryption(e.to_string()))?;

        cipher
            .encrypt(Nonce::from_slice(&nonce.0), Payload { msg: plaintext, aad })
            .map_err(|e| SealError::Encryption(e.to_string()))
    }

    /// Decrypt `ciphertext`. Fails if it or `aad` was tampered with.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        aad: &[u8],
        nonce: &EncryptionNonce,
    ) -> Result<Vec<u8>, SealError> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| SealError::Decryption(e.to_string()))?;

        cipher
            .decrypt(Nonce::from_slice(&nonce.0), Payload { msg: ciphertext, aad })
            .map_err(|e| SealError::Decryption(e.to_string()))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// A 96-bit nonce for ChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionNonce(pub [u8; 12]);

impl EncryptionNonce {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

/// Ephemeral key pair for one-time key agreement.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::thread_rng());
        let public = X25519PublicKey::from(PublicKey::from(&secret));
        Self { secret, public }
    }

    pub fn public_key(&self) -> X25519PublicKey {
        self.public
    }

    /// Consumes the ephemeral secret.
    pub fn diffie_hellman(self, peer_public: &X25519PublicKey) -> SharedKey {
        let shared = self.secret.diffie_hellman(&peer_public.to_dalek());
        SharedKey(*shared.as_bytes())
    }
}
