//! # Keygate Auth
//!
//! Capability delegation and session credentials.
//!
//! ## Overview
//!
//! Decryption is never authorized by a standing key. Each attempt builds a
//! short-lived [`CapabilityDelegation`] naming one document and the
//! decryption ability, has the wallet sign it, and exchanges it with the key
//! network for a [`SessionCredential`]. Key nodes seal their decryption
//! shares to the session key, so a credential is useful for exactly the
//! scope it was granted for.
//!
//! ## Key Concepts
//!
//! - **Delegation**: EIP-4361 style message with a network-issued nonce
//! - **Session grant**: a node's signed acceptance of a session key
//! - **Sealed share**: bytes encrypted to a session via X25519 + ChaCha20-Poly1305
//! - **Decryption flow**: the state machine every attempt walks through

pub mod crypto;
pub mod delegation;
pub mod error;
pub mod keyshare;
pub mod session;
pub mod state;

pub use crypto::{EncryptionKey, EncryptionNonce, X25519PublicKey, X25519StaticSecret};
pub use delegation::{
    Ability, CapabilityDelegation, CapabilityDelegationBuilder, DelegationConfig, NetworkNonce,
    NonceSource, ResourceDescriptor, UnsignedDelegation,
};
pub use error::{AuthorizationError, Result, SealError};
pub use keyshare::SealedShare;
pub use session::{SessionCredential, SessionGrant, SessionKey, SessionScope};
pub use state::{DecryptionFlow, FlowState};
