//! A key node: one holder of one share of the network key.
//!
//! Each node checks every request on its own. A node never trusts another
//! node's verdict and never learns whether the quorum as a whole succeeded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use keygate_auth::{
    CapabilityDelegation, ResourceDescriptor, SealedShare, SessionGrant, SessionScope,
    X25519PublicKey,
};
use keygate_core::{
    encode_policy, AccessPolicy, Blake3Hash, BindingHash, Clock, Ed25519PublicKey, Keypair,
};

use crate::binding::{document_label, NetworkSecret, NonceFault};
use crate::chain::{evaluate_policy, ChainReader};
use crate::config::KeyNodeConfig;
use crate::messages::{
    NodeId, NodeInfo, NodeRejection, NodeRequest, NodeResponse, ShareResponse, PROTOCOL_VERSION,
};
use crate::threshold::{KeyShare, PublicKeySet, ThresholdCiphertext};

/// Counters for what a node has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub nonces_issued: u64,
    pub grants_issued: u64,
    pub shares_released: u64,
    pub rejections: u64,
}

#[derive(Debug, Default)]
struct Counters {
    nonces_issued: AtomicU64,
    grants_issued: AtomicU64,
    shares_released: AtomicU64,
    rejections: AtomicU64,
}

/// A key node.
pub struct KeyNode {
    id: NodeId,
    identity: Keypair,
    share: KeyShare,
    public_keys: PublicKeySet,
    secret: NetworkSecret,
    chain: Arc<dyn ChainReader>,
    clock: Arc<dyn Clock>,
    config: KeyNodeConfig,
    /// Consumed nonces and when they were issued.
    consumed: Mutex<HashMap<String, i64>>,
    counters: Counters,
}

impl KeyNode {
    pub fn new(
        identity: Keypair,
        share: KeyShare,
        public_keys: PublicKeySet,
        secret: NetworkSecret,
        chain: Arc<dyn ChainReader>,
        clock: Arc<dyn Clock>,
        config: KeyNodeConfig,
    ) -> Self {
        Self {
            id: NodeId::from_identity(&identity.public_key()),
            identity,
            share,
            public_keys,
            secret,
            chain,
            clock,
            config,
            consumed: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.identity.public_key()
    }

    pub fn share_index(&self) -> u32 {
        self.share.index()
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            nonces_issued: self.counters.nonces_issued.load(Ordering::Relaxed),
            grants_issued: self.counters.grants_issued.load(Ordering::Relaxed),
            shares_released: self.counters.shares_released.load(Ordering::Relaxed),
            rejections: self.counters.rejections.load(Ordering::Relaxed),
        }
    }

    /// Answer one request.
    pub async fn handle(&self, request: NodeRequest) -> NodeResponse {
        let kind = request.kind();
        let result = match request {
            NodeRequest::Handshake => Ok(NodeResponse::Handshake(self.info())),
            NodeRequest::FetchNonce => Ok(self.fetch_nonce()),
            NodeRequest::Bind { policy, data_hash } => self.bind(&policy, &data_hash),
            NodeRequest::Authorize {
                delegation,
                session_public,
            } => self.authorize(&delegation, session_public),
            NodeRequest::Decrypt {
                grant,
                policy,
                binding_hash,
                ciphertext,
            } => self.decrypt(&grant, &policy, &binding_hash, &ciphertext).await,
        };

        match result {
            Ok(response) => response,
            Err(rejection) => {
                self.counters.rejections.fetch_add(1, Ordering::Relaxed);
                debug!(node = %self.id, request = kind, ?rejection, "rejected");
                NodeResponse::Rejected(rejection)
            }
        }
    }

    fn info(&self) -> NodeInfo {
        NodeInfo {
            node_key: self.identity.public_key(),
            share_index: self.share.index(),
            public_keys: self.public_keys.clone(),
            protocol_version: PROTOCOL_VERSION,
        }
    }

    fn fetch_nonce(&self) -> NodeResponse {
        self.counters.nonces_issued.fetch_add(1, Ordering::Relaxed);
        NodeResponse::Nonce(self.secret.issue_nonce(self.clock.now_millis()))
    }

    fn bind(
        &self,
        policy: &AccessPolicy,
        data_hash: &Blake3Hash,
    ) -> Result<NodeResponse, NodeRejection> {
        let canonical = encode_policy(policy).map_err(|_| NodeRejection::PolicyRejected)?;
        let tag = self.secret.binding_tag(&canonical, data_hash);
        debug!(node = %self.id, clauses = policy.len(), "bound policy");
        Ok(NodeResponse::Bound { tag })
    }

    fn authorize(
        &self,
        delegation: &CapabilityDelegation,
        session_public: X25519PublicKey,
    ) -> Result<NodeResponse, NodeRejection> {
        delegation
            .verify_signature()
            .map_err(|_| NodeRejection::InvalidSignature)?;
        delegation
            .verify_scope()
            .map_err(|_| NodeRejection::ScopeMismatch)?;

        let now = self.clock.now_millis();
        let skew = self.config.clock_skew_millis();
        if now > delegation.expires_at() || delegation.issued_at() > now.saturating_add(skew) {
            return Err(NodeRejection::DelegationExpired);
        }

        let issued_at = self
            .secret
            .verify_nonce(
                delegation.nonce(),
                now,
                self.config.nonce_ttl_millis(),
                skew,
            )
            .map_err(|fault: NonceFault| {
                debug!(node = %self.id, ?fault, "nonce refused");
                NodeRejection::InvalidNonce
            })?;
        self.consume_nonce(delegation.nonce().as_str(), issued_at, now)?;

        let grant = SessionGrant::issue(
            &self.identity,
            session_public,
            SessionScope::from_delegation(delegation),
        )
        .map_err(|_| NodeRejection::BadRequest)?;

        self.counters.grants_issued.fetch_add(1, Ordering::Relaxed);
        info!(node = %self.id, wallet = %delegation.wallet_address(), "issued session grant");
        Ok(NodeResponse::Authorized(grant))
    }

    /// Mark `nonce` used. Forgets nonces too old to verify anyway.
    fn consume_nonce(&self, nonce: &str, issued_at: i64, now: i64) -> Result<(), NodeRejection> {
        let mut consumed = self
            .consumed
            .lock()
            .map_err(|_| NodeRejection::Unavailable)?;

        let horizon = self.config.nonce_ttl_millis();
        consumed.retain(|_, issued| now.saturating_sub(*issued) <= horizon);

        if consumed.insert(nonce.to_string(), issued_at).is_some() {
            return Err(NodeRejection::NonceReplayed);
        }
        Ok(())
    }

    async fn decrypt(
        &self,
        grant: &SessionGrant,
        policy: &AccessPolicy,
        binding: &BindingHash,
        ciphertext: &[u8],
    ) -> Result<NodeResponse, NodeRejection> {
        if grant.node_key != self.identity.public_key()
            || !grant.verify()
            || grant.is_expired_at(self.clock.now_millis())
        {
            return Err(NodeRejection::CredentialExpired);
        }

        let resource = ResourceDescriptor::for_document(policy, binding)
            .map_err(|_| NodeRejection::PolicyRejected)?;
        if resource != grant.scope.resource {
            return Err(NodeRejection::ScopeMismatch);
        }

        let canonical = encode_policy(policy).map_err(|_| NodeRejection::PolicyRejected)?;
        if !self.secret.verify_binding(&canonical, binding) {
            return Err(NodeRejection::BindingMismatch);
        }

        let ciphertext = ThresholdCiphertext::from_bytes(ciphertext)
            .map_err(|_| NodeRejection::InvalidCiphertext)?;
        let label = document_label(binding, &canonical);
        if ciphertext.verify(&label).is_err() {
            return Err(NodeRejection::BindingMismatch);
        }

        match evaluate_policy(self.chain.as_ref(), policy, &grant.scope.wallet).await {
            Ok(true) => {}
            Ok(false) => return Err(NodeRejection::AccessDenied),
            Err(e) => {
                warn!(node = %self.id, error = %e, "chain read failed");
                return Err(NodeRejection::Unavailable);
            }
        }

        let share = self
            .share
            .decryption_share(&ciphertext, &label)
            .map_err(|_| NodeRejection::BindingMismatch)?;
        let sealed_point = SealedShare::seal(&share.point.0, &grant.session_public, label.as_bytes())
            .map_err(|_| NodeRejection::Unavailable)?;

        self.counters.shares_released.fetch_add(1, Ordering::Relaxed);
        info!(node = %self.id, wallet = %grant.scope.wallet, "released decryption share");
        Ok(NodeResponse::Share(ShareResponse {
            share_index: share.index,
            sealed_point,
            proof: share.proof,
        }))
    }
}

impl std::fmt::Debug for KeyNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyNode")
            .field("id", &self.id)
            .field("share_index", &self.share.index())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keygate_auth::{Ability, SessionKey, UnsignedDelegation};
    use keygate_core::{single_address_policy, Chain, LocalWallet, ManualClock, WalletSigner};

    use crate::chain::MemoryChain;
    use crate::threshold::{encrypt, KeyCeremony};

    const START: i64 = 1_700_000_000_000;

    struct Fixture {
        node: KeyNode,
        clock: ManualClock,
        secret: NetworkSecret,
        keys: PublicKeySet,
        wallet: LocalWallet,
    }

    fn fixture() -> Fixture {
        let (keys, mut shares) = KeyCeremony::deal(1, 1).unwrap();
        let clock = ManualClock::new(START);
        let secret = NetworkSecret::from_seed([5; 32]);
        let node = KeyNode::new(
            Keypair::from_seed(&[1; 32]),
            shares.remove(0),
            keys.clone(),
            secret.clone(),
            Arc::new(MemoryChain::new()),
            Arc::new(clock.clone()),
            KeyNodeConfig::default(),
        );
        Fixture {
            node,
            clock,
            secret,
            keys,
            wallet: LocalWallet::from_seed([7; 32]),
        }
    }

    fn document(f: &Fixture, policy: &AccessPolicy) -> (BindingHash, Vec<u8>) {
        let canonical = encode_policy(policy).unwrap();
        let data_hash = Blake3Hash::hash(b"secret");
        let binding = BindingHash::new(data_hash, f.secret.binding_tag(&canonical, &data_hash));
        let label = document_label(&binding, &canonical);
        let ct = encrypt(&f.keys, &label, b"secret").unwrap();
        (binding, ct.to_bytes().unwrap())
    }

    fn delegation(f: &Fixture, resource: ResourceDescriptor) -> CapabilityDelegation {
        let body = UnsignedDelegation {
            domain: "localhost".into(),
            uri: "keygate://localhost".into(),
            chain_id: 1,
            ability: Ability::decryption(),
            resource,
            wallet_address: f.wallet.address(),
            nonce: f.secret.issue_nonce(START),
            issued_at: START,
            expires_at: START + 60_000,
        };
        let signature = f.wallet.sign(&body.message());
        body.into_signed(signature)
    }

    async fn grant(f: &Fixture, delegation: CapabilityDelegation, session: &SessionKey) -> SessionGrant {
        match f
            .node
            .handle(NodeRequest::Authorize {
                delegation,
                session_public: session.public_key(),
            })
            .await
        {
            NodeResponse::Authorized(grant) => grant,
            other => panic!("expected grant, got {other:?}"),
        }
    }

    fn rejection(response: NodeResponse) -> NodeRejection {
        match response {
            NodeResponse::Rejected(r) => r,
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_policy() {
        let f = fixture();
        let response = f
            .node
            .handle(NodeRequest::Bind {
                policy: single_address_policy(Chain::new("dogechain"), "0x01"),
                data_hash: Blake3Hash::hash(b"x"),
            })
            .await;
        assert_eq!(rejection(response), NodeRejection::PolicyRejected);
    }

    #[tokio::test]
    async fn test_authorize_then_replay() {
        let f = fixture();
        let policy = single_address_policy(Chain::ethereum(), &f.wallet.address().to_string());
        let (binding, _) = document(&f, &policy);
        let resource = ResourceDescriptor::for_document(&policy, &binding).unwrap();
        let delegation = delegation(&f, resource);
        let session = SessionKey::generate();

        let grant = grant(&f, delegation.clone(), &session).await;
        assert!(grant.verify());
        assert_eq!(grant.node_key, f.node.public_key());

        let replay = f
            .node
            .handle(NodeRequest::Authorize {
                delegation,
                session_public: session.public_key(),
            })
            .await;
        assert_eq!(rejection(replay), NodeRejection::NonceReplayed);
    }

    #[tokio::test]
    async fn test_authorize_rejects_tampered_signature() {
        let f = fixture();
        let mut delegation = delegation(&f, ResourceDescriptor::new("keygate-acc://a/b"));
        delegation.signature = LocalWallet::from_seed([8; 32]).sign(&delegation.message());

        let response = f
            .node
            .handle(NodeRequest::Authorize {
                delegation,
                session_public: SessionKey::generate().public_key(),
            })
            .await;
        assert_eq!(rejection(response), NodeRejection::InvalidSignature);
    }

    #[tokio::test]
    async fn test_authorize_rejects_expired_delegation() {
        let f = fixture();
        let delegation = delegation(&f, ResourceDescriptor::new("keygate-acc://a/b"));

        f.clock.advance_secs(61);
        let response = f
            .node
            .handle(NodeRequest::Authorize {
                delegation,
                session_public: SessionKey::generate().public_key(),
            })
            .await;
        assert_eq!(rejection(response), NodeRejection::DelegationExpired);
    }

    #[tokio::test]
    async fn test_decrypt_releases_sealed_share_to_authorized_wallet() {
        let f = fixture();
        let policy = single_address_policy(Chain::ethereum(), &f.wallet.address().to_string());
        let (binding, ciphertext) = document(&f, &policy);
        let resource = ResourceDescriptor::for_document(&policy, &binding).unwrap();
        let session = SessionKey::generate();
        let grant = grant(&f, delegation(&f, resource), &session).await;

        let response = f
            .node
            .handle(NodeRequest::Decrypt {
                grant,
                policy,
                binding_hash: binding,
                ciphertext,
            })
            .await;

        match response {
            NodeResponse::Share(share) => assert_eq!(share.share_index, 1),
            other => panic!("expected share, got {other:?}"),
        }
        assert_eq!(f.node.stats().shares_released, 1);
    }

    #[tokio::test]
    async fn test_decrypt_denies_other_wallet() {
        let f = fixture();
        let policy = single_address_policy(Chain::ethereum(), "0x000000000000000000000000000000000000dead");
        let (binding, ciphertext) = document(&f, &policy);
        let resource = ResourceDescriptor::for_document(&policy, &binding).unwrap();
        let session = SessionKey::generate();
        let grant = grant(&f, delegation(&f, resource), &session).await;

        let response = f
            .node
            .handle(NodeRequest::Decrypt {
                grant,
                policy,
                binding_hash: binding,
                ciphertext,
            })
            .await;
        assert_eq!(rejection(response), NodeRejection::AccessDenied);
        assert_eq!(f.node.stats().shares_released, 0);
    }

    #[tokio::test]
    async fn test_decrypt_detects_forged_binding() {
        let f = fixture();
        let policy = single_address_policy(Chain::ethereum(), &f.wallet.address().to_string());
        let (binding, ciphertext) = document(&f, &policy);
        let forged = BindingHash::new(binding.data_hash(), [0; 32]);
        let resource = ResourceDescriptor::for_document(&policy, &forged).unwrap();
        let session = SessionKey::generate();
        let grant = grant(&f, delegation(&f, resource), &session).await;

        let response = f
            .node
            .handle(NodeRequest::Decrypt {
                grant,
                policy,
                binding_hash: forged,
                ciphertext,
            })
            .await;
        assert_eq!(rejection(response), NodeRejection::BindingMismatch);
    }

    #[tokio::test]
    async fn test_decrypt_rejects_expired_grant() {
        let f = fixture();
        let policy = single_address_policy(Chain::ethereum(), &f.wallet.address().to_string());
        let (binding, ciphertext) = document(&f, &policy);
        let resource = ResourceDescriptor::for_document(&policy, &binding).unwrap();
        let session = SessionKey::generate();
        let grant = grant(&f, delegation(&f, resource), &session).await;

        f.clock.advance_secs(120);
        let response = f
            .node
            .handle(NodeRequest::Decrypt {
                grant,
                policy,
                binding_hash: binding,
                ciphertext,
            })
            .await;
        assert_eq!(rejection(response), NodeRejection::CredentialExpired);
    }
}
