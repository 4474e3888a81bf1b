//! # Keygate
//!
//! Wallet-gated document encryption over a threshold key network.
//!
//! ## Overview
//!
//! A document owner encrypts a file under an access policy, a conjunction
//! of on-chain conditions such as "the requester controls wallet X". The
//! decryption key is split across a T-of-N network of key nodes, so no
//! single server can decrypt. Later, a requester proves control of a wallet
//! by signing a short-lived capability delegation; each node checks the
//! policy against chain state before contributing its share.
//!
//! ## Key Concepts
//!
//! - **Policy**: Canonically encoded, bound to the ciphertext, immutable.
//! - **Envelope**: Ciphertext, binding hash and policy, stored by CID.
//! - **Delegation**: Single-use, time-bounded, signed by the requester's wallet.
//! - **Session**: Ephemeral, never persisted, dropped after one decryption.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use keygate::{DecryptionOrchestrator, DocumentMetadata, KeygateConfig};
//! use keygate::core::{single_address_policy, Chain, LocalWallet, WalletSigner};
//! use keygate::net::{NodeTransport, ThresholdCryptoClient};
//! use keygate::store::SqliteBlobStore;
//!
//! async fn example(transports: Vec<Arc<dyn NodeTransport>>) -> keygate::Result<()> {
//!     let config = KeygateConfig::from_env()?;
//!     let client = Arc::new(ThresholdCryptoClient::new(transports, config.network));
//!     let blobs = Arc::new(SqliteBlobStore::open("envelopes.db")?);
//!     let keygate = DecryptionOrchestrator::new(client, blobs, config.delegation);
//!
//!     let wallet = LocalWallet::generate();
//!     let policy = single_address_policy(Chain::ethereum(), &wallet.address().to_string());
//!
//!     let stored = keygate
//!         .encrypt_and_store(b"contract", &policy, DocumentMetadata::for_file("contract.pdf"))
//!         .await?;
//!     let document = keygate.decrypt_with_signer(&stored.cid.to_cid(), &wallet).await?;
//!     assert_eq!(document.bytes, b"contract");
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `keygate::core` - Policies, identifiers, wallets, clocks
//! - `keygate::store` - Envelope storage (gateway, SQLite, memory)
//! - `keygate::auth` - Delegations, sessions, flow state
//! - `keygate::net` - Threshold client, key nodes, transports

pub mod config;
pub mod error;
pub mod orchestrator;

// Re-export component crates
pub use keygate_auth as auth;
pub use keygate_core as core;
pub use keygate_net as net;
pub use keygate_store as store;

// Re-export main types for convenience
pub use config::KeygateConfig;
pub use error::{FailureKind, KeygateError, Result};
pub use orchestrator::{
    infer_content_type, DecryptedDocument, DecryptionOrchestrator, DocumentMetadata,
    StoredDocument,
};

// Re-export commonly used types
pub use keygate_auth::{DelegationConfig, SessionCredential};
pub use keygate_core::{AccessPolicy, ContentAddress, PolicyClause, WalletAddress, WalletSigner};
pub use keygate_net::{NetworkConfig, ThresholdCryptoClient};
