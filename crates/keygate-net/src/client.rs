//! Client for the threshold key network.
//!
//! [`ThresholdCryptoClient`] never holds key material. It learns the network
//! public key at connect time, encrypts locally under it, and for decryption
//! collects sealed, proved shares from a quorum of nodes and recombines them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use keygate_auth::{AuthorizationError, NetworkNonce, NonceSource, SessionCredential};
use keygate_core::{
    encode_policy, AccessPolicy, Blake3Hash, BindingHash, Clock, Ed25519PublicKey, SystemClock,
};

use crate::binding::document_label;
use crate::config::NetworkConfig;
use crate::error::{CryptoError, NetError, Result};
use crate::messages::{NodeId, NodeInfo, NodeRejection, NodeRequest, NodeResponse, PROTOCOL_VERSION};
use crate::quorum::{gather, QuorumOutcome, StopRule, Verdict};
use crate::threshold::{self, DecryptionShare, PointBytes, PublicKeySet, ThresholdCiphertext};
use crate::transport::NodeTransport;

/// Ciphertext plus the binding hash it was encrypted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionResult {
    pub ciphertext: Vec<u8>,
    pub binding_hash: BindingHash,
}

/// A node that answered the connect handshake.
#[derive(Clone)]
pub(crate) struct ConnectedNode {
    pub transport: Arc<dyn NodeTransport>,
    pub node_key: Ed25519PublicKey,
    pub share_index: u32,
}

/// What the client learned at connect time.
pub(crate) struct ConnectedNetwork {
    pub public_keys: PublicKeySet,
    pub nodes: Vec<ConnectedNode>,
}

impl ConnectedNetwork {
    pub fn threshold(&self) -> usize {
        self.public_keys.threshold()
    }

    pub fn node(&self, id: &NodeId) -> Option<&ConnectedNode> {
        self.nodes.iter().find(|n| n.transport.node_id() == *id)
    }
}

/// Client for a T-of-N key network.
///
/// Shared behind an `Arc`. Connects lazily on first use.
pub struct ThresholdCryptoClient {
    transports: Vec<Arc<dyn NodeTransport>>,
    config: NetworkConfig,
    clock: Arc<dyn Clock>,
    state: RwLock<Option<Arc<ConnectedNetwork>>>,
    nonce_cursor: AtomicUsize,
}

impl ThresholdCryptoClient {
    pub fn new(transports: Vec<Arc<dyn NodeTransport>>, config: NetworkConfig) -> Self {
        Self {
            transports,
            config,
            clock: Arc::new(SystemClock),
            state: RwLock::new(None),
            nonce_cursor: AtomicUsize::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Handshake with the nodes and learn the network key.
    ///
    /// Needs at least `threshold` nodes agreeing on the same key set.
    /// Does nothing if already connected.
    pub async fn connect(&self) -> Result<()> {
        self.network().await.map(|_| ())
    }

    /// Forget the connection. Idempotent.
    pub async fn disconnect(&self) {
        if self.state.write().await.take().is_some() {
            info!("disconnected from key network");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.is_some()
    }

    /// The network public key set, connecting if needed.
    pub async fn public_keys(&self) -> Result<PublicKeySet> {
        Ok(self.network().await?.public_keys.clone())
    }

    pub(crate) async fn network(&self) -> Result<Arc<ConnectedNetwork>> {
        if let Some(network) = self.state.read().await.as_ref() {
            return Ok(network.clone());
        }

        let mut state = self.state.write().await;
        if let Some(network) = state.as_ref() {
            return Ok(network.clone());
        }
        let network = Arc::new(self.handshake().await?);
        *state = Some(network.clone());
        Ok(network)
    }

    async fn handshake(&self) -> Result<ConnectedNetwork> {
        let requests = self
            .transports
            .iter()
            .map(|t| (t.clone(), NodeRequest::Handshake))
            .collect();

        let outcome = gather(
            requests,
            StopRule::All,
            self.config.handshake_timeout,
            |id, response| match response {
                NodeResponse::Handshake(info) if info.protocol_version != PROTOCOL_VERSION => {
                    Verdict::Invalid(format!("protocol version {}", info.protocol_version))
                }
                NodeResponse::Handshake(info) if NodeId::from_identity(&info.node_key) != id => {
                    Verdict::Invalid("identity does not match node id".into())
                }
                NodeResponse::Handshake(info) => Verdict::Accept(info),
                NodeResponse::Rejected(r) => Verdict::Reject(r),
                _ => Verdict::Invalid("expected handshake".into()),
            },
        )
        .await;

        // Largest group of nodes agreeing on one key set.
        let mut groups: Vec<(PublicKeySet, Vec<(NodeId, NodeInfo)>)> = Vec::new();
        for (id, info) in outcome.accepted {
            match groups.iter_mut().find(|(keys, _)| *keys == info.public_keys) {
                Some((_, members)) => members.push((id, info)),
                None => groups.push((info.public_keys.clone(), vec![(id, info)])),
            }
        }
        let (public_keys, members) = groups
            .into_iter()
            .max_by_key(|(_, members)| members.len())
            .ok_or_else(|| CryptoError::NetworkUnavailable("no key node answered".into()))?;

        let needed = self.config.threshold.max(public_keys.threshold());
        if members.len() < needed {
            warn!(agreeing = members.len(), needed, "not enough key nodes agree");
            return Err(CryptoError::NetworkUnavailable(format!(
                "{} of {} nodes agree on the network key",
                members.len(),
                needed
            ))
            .into());
        }

        let nodes = members
            .into_iter()
            .filter_map(|(id, info)| {
                let transport = self.transports.iter().find(|t| t.node_id() == id)?.clone();
                Some(ConnectedNode {
                    transport,
                    node_key: info.node_key,
                    share_index: info.share_index,
                })
            })
            .collect::<Vec<_>>();

        info!(
            nodes = nodes.len(),
            threshold = public_keys.threshold(),
            total = public_keys.total(),
            "connected to key network"
        );
        Ok(ConnectedNetwork { public_keys, nodes })
    }

    /// A fresh nonce from one node, trying nodes in turn.
    pub async fn request_nonce(&self) -> Result<NetworkNonce> {
        let network = self.network().await?;
        let count = network.nodes.len();
        let start = self.nonce_cursor.fetch_add(1, Ordering::Relaxed);

        for offset in 0..count {
            let node = &network.nodes[(start + offset) % count];
            let call = node.transport.call(NodeRequest::FetchNonce);
            match tokio::time::timeout(self.config.request_timeout, call).await {
                Ok(Ok(NodeResponse::Nonce(nonce))) => {
                    debug!(node = %node.transport.node_id(), "fetched nonce");
                    return Ok(nonce);
                }
                Ok(Ok(other)) => {
                    warn!(node = %node.transport.node_id(), ?other, "unexpected nonce response")
                }
                Ok(Err(e)) => debug!(node = %node.transport.node_id(), error = %e, "nonce fetch failed"),
                Err(_) => debug!(node = %node.transport.node_id(), "nonce fetch timed out"),
            }
        }

        Err(CryptoError::NetworkUnavailable("no node issued a nonce".into()).into())
    }

    /// Encrypt `plaintext` so only requesters satisfying `policy` can decrypt.
    ///
    /// Needs no wallet. The result is randomized.
    pub async fn encrypt(&self, plaintext: &[u8], policy: &AccessPolicy) -> Result<EncryptionResult> {
        let canonical = encode_policy(policy)?;
        let network = self.network().await?;
        let needed = network.threshold();
        let data_hash = Blake3Hash::hash(plaintext);

        let requests = network
            .nodes
            .iter()
            .map(|node| {
                let request = NodeRequest::Bind {
                    policy: policy.clone(),
                    data_hash,
                };
                (node.transport.clone(), request)
            })
            .collect();

        let outcome = gather(
            requests,
            StopRule::Quorum(needed),
            self.config.request_timeout,
            |_, response| match response {
                NodeResponse::Bound { tag } => Verdict::Accept(tag),
                NodeResponse::Rejected(r) => Verdict::Reject(r),
                _ => Verdict::Invalid("expected binding tag".into()),
            },
        )
        .await;

        if !outcome.reached(needed) {
            return Err(quorum_failure(&outcome, needed, |o| {
                CryptoError::NetworkUnavailable(format!(
                    "{} of {} nodes bound the policy",
                    o.accepted.len(),
                    needed
                ))
            }));
        }

        let tag = agreed_value(outcome.accepted.iter().map(|(_, tag)| *tag), needed)
            .ok_or_else(|| CryptoError::NetworkUnavailable("nodes disagree on binding".into()))?;
        let binding_hash = BindingHash::new(data_hash, tag);
        let label = document_label(&binding_hash, &canonical);

        let ciphertext = threshold::encrypt(&network.public_keys, &label, plaintext)?.to_bytes()?;
        debug!(bytes = plaintext.len(), binding = %binding_hash, "encrypted");

        Ok(EncryptionResult {
            ciphertext,
            binding_hash,
        })
    }

    /// Decrypt with shares from a quorum of nodes.
    ///
    /// Every node re-checks the session, the binding and the policy. The
    /// plaintext is released only after recombination and an integrity check.
    pub async fn decrypt(
        &self,
        ciphertext: &[u8],
        binding_hash: &BindingHash,
        policy: &AccessPolicy,
        session: &SessionCredential,
    ) -> Result<Vec<u8>> {
        if session.is_expired_at(self.clock.now_millis()) {
            return Err(CryptoError::CredentialExpired.into());
        }

        let canonical = encode_policy(policy)?;
        let label = document_label(binding_hash, &canonical);
        let parsed = ThresholdCiphertext::from_bytes(ciphertext)
            .map_err(|e| CryptoError::InvalidCiphertext(e.to_string()))?;
        parsed
            .verify(&label)
            .map_err(|_| CryptoError::BindingMismatch)?;

        let network = self.network().await?;
        let needed = network.threshold();

        let requests: Vec<_> = network
            .nodes
            .iter()
            .filter_map(|node| {
                let grant = session.grant_for(&node.node_key)?;
                let request = NodeRequest::Decrypt {
                    grant: grant.clone(),
                    policy: policy.clone(),
                    binding_hash: *binding_hash,
                    ciphertext: ciphertext.to_vec(),
                };
                Some((node.transport.clone(), request))
            })
            .collect();

        let expected_index: HashMap<NodeId, u32> = network
            .nodes
            .iter()
            .map(|n| (n.transport.node_id(), n.share_index))
            .collect();
        let keys = &network.public_keys;

        let outcome = gather(
            requests,
            StopRule::Quorum(needed),
            self.config.request_timeout,
            |id, response| match response {
                NodeResponse::Share(share) => {
                    if expected_index.get(&id) != Some(&share.share_index) {
                        return Verdict::Invalid("share index does not match node".into());
                    }
                    let point = match session.open(&share.sealed_point, label.as_bytes()) {
                        Ok(bytes) => match <[u8; 32]>::try_from(bytes.as_slice()) {
                            Ok(point) => PointBytes(point),
                            Err(_) => return Verdict::Invalid("share has wrong length".into()),
                        },
                        Err(_) => return Verdict::Invalid("share not sealed to session".into()),
                    };
                    let share = DecryptionShare {
                        index: share.share_index,
                        point,
                        proof: share.proof,
                    };
                    match keys.verify_share(&share, &parsed) {
                        Ok(()) => Verdict::Accept(share),
                        Err(e) => Verdict::Invalid(format!("share proof: {e}")),
                    }
                }
                NodeResponse::Rejected(r) => Verdict::Reject(r),
                _ => Verdict::Invalid("expected decryption share".into()),
            },
        )
        .await;

        if !outcome.reached(needed) {
            return Err(quorum_failure(&outcome, needed, |o| CryptoError::QuorumTimeout {
                received: o.accepted.len(),
                needed,
            }));
        }

        let shares: Vec<DecryptionShare> =
            outcome.into_accepted().into_iter().map(|(_, s)| s).collect();
        let plaintext = threshold::combine(keys, &parsed, &label, &shares)?;

        if Blake3Hash::hash(&plaintext) != binding_hash.data_hash() {
            warn!(binding = %binding_hash, "plaintext does not match bound hash");
            return Err(CryptoError::IntegrityFailure.into());
        }

        info!(bytes = plaintext.len(), wallet = %session.wallet(), "decrypted");
        Ok(plaintext)
    }
}

#[async_trait]
impl NonceSource for ThresholdCryptoClient {
    async fn fetch_nonce(&self) -> keygate_auth::Result<NetworkNonce> {
        self.request_nonce()
            .await
            .map_err(|e| AuthorizationError::NonceUnavailable(e.to_string()))
    }
}

impl std::fmt::Debug for ThresholdCryptoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThresholdCryptoClient")
            .field("nodes", &self.transports.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Error for a failed quorum round.
///
/// A refusal is surfaced only when refusals alone made the quorum
/// impossible; otherwise `fallback` describes the shortfall.
pub(crate) fn quorum_failure<T>(
    outcome: &QuorumOutcome<T>,
    needed: usize,
    fallback: impl FnOnce(&QuorumOutcome<T>) -> CryptoError,
) -> NetError {
    match outcome.dominant_rejection(needed) {
        Some(rejection) => rejection_error(rejection),
        None => fallback(outcome).into(),
    }
}

pub(crate) fn rejection_error(rejection: NodeRejection) -> NetError {
    match rejection.as_authorization_error() {
        Some(e) => e.into(),
        None => rejection.into_crypto_error().into(),
    }
}

/// A value at least `needed` nodes returned.
fn agreed_value<V: PartialEq + Copy>(values: impl Iterator<Item = V>, needed: usize) -> Option<V> {
    let values: Vec<V> = values.collect();
    values
        .iter()
        .find(|v| values.iter().filter(|w| w == v).count() >= needed)
        .copied()
}
