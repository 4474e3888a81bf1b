//! # Keygate Net
//!
//! The threshold key network: key nodes, the client that talks to them and
//! the exchange of delegations for sessions.
//!
//! ## Overview
//!
//! The network key is Shamir-shared across N key nodes; any T of them can
//! help decrypt, no fewer can, and no process ever holds the whole key.
//! Clients encrypt locally under the network public key. To decrypt, a
//! client presents a session to each node; every node independently checks
//! the session, the binding and the access policy against chain state
//! before releasing a proved decryption share sealed to the session.
//!
//! ## Key Properties
//!
//! - **Threshold**: T valid shares recombine, T-1 reveal nothing
//! - **Bound**: a ciphertext only decrypts under the policy it was bound to
//! - **Verifiable**: every share carries a DLEQ proof checked by the client
//! - **Cancel-safe**: dropping a request aborts outstanding node calls
//!
//! ## Message Flow
//!
//! ```text
//! Client                               Key node (each of N)
//!   |-------- Handshake --------------->|
//!   |<------- NodeInfo -----------------|
//!   |-------- FetchNonce -------------->|   (one node)
//!   |<------- Nonce --------------------|
//!   |-------- Authorize(delegation) --->|
//!   |<------- SessionGrant -------------|
//!   |-------- Decrypt(grant, ...) ----->|
//!   |<------- sealed share + proof -----|
//! ```

pub mod authorizer;
pub mod binding;
pub mod chain;
pub mod client;
pub mod config;
pub mod error;
pub mod messages;
pub mod node;
pub mod quorum;
pub mod threshold;
pub mod transport;

pub use authorizer::SessionAuthorizer;
pub use binding::{document_label, NetworkSecret};
pub use chain::{evaluate_policy, ChainError, ChainReader, MemoryChain};
pub use client::{EncryptionResult, ThresholdCryptoClient};
pub use config::{KeyNodeConfig, NetworkConfig};
pub use error::{CryptoError, NetError, Result, TransportError};
pub use messages::{NodeId, NodeRejection, NodeRequest, NodeResponse, PROTOCOL_VERSION};
pub use node::{KeyNode, NodeStats};
pub use threshold::{KeyCeremony, KeyShare, PublicKeySet, ThresholdCiphertext};
pub use transport::{memory::Faults, memory::MemoryTransport, NodeTransport};
