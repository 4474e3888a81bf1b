//! # Keygate Testkit
//!
//! Testing utilities for Keygate.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Canonical policy bytes, policy hashes and an envelope CID
//! - **Generators**: Proptest strategies for policies, wallets and documents
//! - **Fixtures**: An in-process key network with fault injection
//!
//! ## Golden Vectors
//!
//! ```rust
//! use keygate_testkit::vectors::verify_all_vectors;
//!
//! for (name, matches, hash) in verify_all_vectors() {
//!     assert!(matches, "{name}: {hash}");
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use keygate_core::encode_policy;
//! use keygate_testkit::generators::policy;
//!
//! proptest! {
//!     #[test]
//!     fn encoding_is_deterministic(policy in policy(3)) {
//!         prop_assert_eq!(encode_policy(&policy).unwrap(), encode_policy(&policy).unwrap());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use keygate_testkit::fixtures::{owner_policy, wallet, TestNetwork};
//! use keygate::DocumentMetadata;
//!
//! # async fn example() {
//! let network = TestNetwork::new(2, 3);
//! let owner = wallet(1);
//! let stored = network
//!     .orchestrator
//!     .encrypt_and_store(b"hello", &owner_policy(&owner), DocumentMetadata::default())
//!     .await
//!     .unwrap();
//! # }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{multi_party_wallets, owner_policy, wallet, TestNetwork, TestNode};
pub use generators::DocumentParams;
pub use vectors::{all_vectors, golden_envelope, verify_all_vectors, GoldenVector, ENVELOPE_CID};
