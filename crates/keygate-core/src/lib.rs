//! # Keygate Core
//!
//! Pure primitives for Keygate: access policies, their canonical encoding,
//! identifiers and wallet keys.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`AccessPolicy`] - Conjunction of on-chain predicates gating decryption
//! - [`BindingHash`] - Network-issued commitment tying a ciphertext to its policy
//! - [`ContentAddress`] - CIDv1 of a stored envelope
//! - [`WalletAddress`] / [`WalletSigner`] - The requesting identity
//!
//! ## Canonicalization
//!
//! Policies are encoded as deterministic JSON. See [`canonical`] module.

pub mod canonical;
pub mod clock;
pub mod crypto;
pub mod error;
pub mod policy;
pub mod types;
pub mod wallet;

pub use canonical::{decode_policy, encode_policy, policy_hash};
pub use clock::{now_millis, Clock, ManualClock, SystemClock};
pub use crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair};
pub use error::{IdentifierError, PolicyError};
pub use policy::{
    single_address_policy, AccessPolicy, Chain, Comparator, Parameter, PolicyClause,
    PredicateMethod, ResourceKind, SubstitutionToken,
};
pub use types::{BindingHash, ContentAddress, WalletAddress};
pub use wallet::{LocalWallet, WalletError, WalletSignature, WalletSigner};
