//! Wallet identities and signing.
//!
//! The core never holds a user's private key; it only talks to a
//! [`WalletSigner`]. [`LocalWallet`] is an in-process signer for tests and
//! scripts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair};
use crate::types::WalletAddress;

const ADDRESS_CONTEXT: &str = "keygate/wallet-address/v0";

impl WalletAddress {
    /// Derive the address controlled by an Ed25519 public key.
    ///
    /// `address = last 20 bytes of BLAKE3-derive(pubkey)`.
    pub fn from_public_key(public_key: &Ed25519PublicKey) -> Self {
        let digest = Blake3Hash::derive(ADDRESS_CONTEXT, &[public_key.as_bytes()]);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest.as_bytes()[12..]);
        Self(out)
    }
}

/// A signature produced by a wallet over a text message.
///
/// Carries the signer's public key so a verifier can check both the
/// signature and that the key controls the claimed address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSignature {
    pub public_key: Ed25519PublicKey,
    pub signature: Ed25519Signature,
}

impl WalletSignature {
    /// Address that produced this signature.
    pub fn signer_address(&self) -> WalletAddress {
        WalletAddress::from_public_key(&self.public_key)
    }

    /// Check the signature covers `message` and was made by `address`.
    pub fn verify(&self, message: &str, address: &WalletAddress) -> bool {
        self.signer_address() == *address
            && self.public_key.verify(message.as_bytes(), &self.signature)
    }
}

/// External wallet collaborator.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// The address this wallet signs for.
    fn address(&self) -> WalletAddress;

    /// Sign a human-readable message.
    async fn sign_message(&self, message: &str) -> Result<WalletSignature, WalletError>;
}

/// Failure reported by a wallet (user rejected, device unavailable, ...).
#[derive(Debug, Clone, thiserror::Error)]
#[error("wallet error: {0}")]
pub struct WalletError(pub String);

/// In-process wallet backed by an Ed25519 keypair.
#[derive(Debug, Clone)]
pub struct LocalWallet {
    keypair: Keypair,
}

impl LocalWallet {
    pub fn generate() -> Self {
        Self {
            keypair: Keypair::generate(),
        }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            keypair: Keypair::from_seed(&seed),
        }
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    /// Sign synchronously.
    pub fn sign(&self, message: &str) -> WalletSignature {
        WalletSignature {
            public_key: self.keypair.public_key(),
            signature: self.keypair.sign(message.as_bytes()),
        }
    }
}

#[async_trait]
impl WalletSigner for LocalWallet {
    fn address(&self) -> WalletAddress {
        WalletAddress::from_public_key(&self.keypair.public_key())
    }

    async fn sign_message(&self, message: &str) -> Result<WalletSignature, WalletError> {
        Ok(self.sign(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_verifies_for_own_address() {
        let wallet = LocalWallet::from_seed([1u8; 32]);
        let signature = wallet.sign("authorize me");

        assert!(signature.verify("authorize me", &wallet.address()));
        assert!(!signature.verify("authorize someone else", &wallet.address()));
    }

    #[test]
    fn test_signature_rejected_for_other_address() {
        let wallet = LocalWallet::from_seed([1u8; 32]);
        let other = LocalWallet::from_seed([2u8; 32]);
        let signature = wallet.sign("authorize me");

        assert!(!signature.verify("authorize me", &other.address()));
    }

    #[tokio::test]
    async fn test_local_wallet_async_signer() {
        let wallet = LocalWallet::from_seed([3u8; 32]);
        let signature = wallet.sign_message("hello").await.unwrap();
        assert_eq!(signature.signer_address(), wallet.address());
    }
}
