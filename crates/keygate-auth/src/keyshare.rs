//! Payloads sealed to a session key.
//!
//! Key nodes never return decryption material in the clear. Each share is
//! encrypted to the requesting session's X25519 key, so only the holder of
//! the session credential can combine them.

use serde::{Deserialize, Serialize};

use crate::crypto::{EncryptionNonce, EphemeralKeyPair, X25519PublicKey, X25519StaticSecret};
use crate::error::SealError;

/// Bytes encrypted to one X25519 recipient via ECDH + ChaCha20-Poly1305.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedShare {
    /// Ephemeral X25519 public key (sender's side of ECDH).
    pub ephemeral_public: X25519PublicKey,

    /// The payload, encrypted with the derived shared secret.
    pub ciphertext: Vec<u8>,

    pub nonce: EncryptionNonce,
}

impl SealedShare {
    /// Seal `payload` for `recipient`. `context` must be supplied again to open.
    pub fn seal(
        payload: &[u8],
        recipient: &X25519PublicKey,
        context: &[u8],
    ) -> Result<Self, SealError> {
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();

        let wrap_key = ephemeral.diffie_hellman(recipient).derive_encryption_key(context);
        let nonce = EncryptionNonce::generate();
        let ciphertext = wrap_key.encrypt(payload, context, &nonce)?;

        Ok(Self {
            ephemeral_public,
            ciphertext,
            nonce,
        })
    }

    /// Open with the recipient's secret.
    pub fn open(
        &self,
        recipient_secret: &X25519StaticSecret,
        context: &[u8],
    ) -> Result<Vec<u8>, SealError> {
        let wrap_key = recipient_secret
            .diffie_hellman(&self.ephemeral_public)
            .derive_encryption_key(context);
        wrap_key.decrypt(&self.ciphertext, context, &self.nonce)
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SealError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| SealError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SealError> {
        ciborium::from_reader(bytes).map_err(|e| SealError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let session = X25519StaticSecret::generate();
        let sealed = SealedShare::seal(&[7u8; 32], &session.public_key(), b"label").unwrap();

        assert_eq!(sealed.open(&session, b"label").unwrap(), vec![7u8; 32]);
    }

    #[test]
    fn test_wrong_recipient_fails() {
        let session = X25519StaticSecret::generate();
        let eavesdropper = X25519StaticSecret::generate();
        let sealed = SealedShare::seal(b"share", &session.public_key(), b"label").unwrap();

        assert!(sealed.open(&eavesdropper, b"label").is_err());
    }

    #[test]
    fn test_wrong_context_fails() {
        let session = X25519StaticSecret::generate();
        let sealed = SealedShare::seal(b"share", &session.public_key(), b"label").unwrap();

        assert!(sealed.open(&session, b"other").is_err());
    }

    #[test]
    fn test_cbor_roundtrip() {
        let session = X25519StaticSecret::generate();
        let sealed = SealedShare::seal(b"share", &session.public_key(), b"ctx").unwrap();
        let restored = SealedShare::from_bytes(&sealed.to_bytes().unwrap()).unwrap();

        assert_eq!(restored, sealed);
        assert_eq!(restored.open(&session, b"ctx").unwrap(), b"share");
    }
}
