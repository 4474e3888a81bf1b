//! The decryption orchestrator: upload and download flows over one client.
//!
//! Upload encrypts under a policy and stores the envelope. Download fetches
//! the envelope, has the wallet sign a fresh delegation, exchanges it for a
//! session and decrypts, strictly in that order.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use keygate_auth::{
    Ability, AuthorizationError, CapabilityDelegationBuilder, DecryptionFlow, DelegationConfig,
    FlowState, ResourceDescriptor, SessionCredential,
};
use keygate_core::{
    AccessPolicy, BindingHash, ContentAddress, WalletAddress, WalletSignature, WalletSigner,
};
use keygate_net::{NetError, SessionAuthorizer, ThresholdCryptoClient};
use keygate_store::{BlobStore, Envelope, EnvelopeStore};

use crate::error::{KeygateError, Result};

/// Optional file metadata stored alongside the ciphertext.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

impl DocumentMetadata {
    /// Metadata for a named file, with the content type inferred from its
    /// extension.
    pub fn for_file(file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        let content_type = infer_content_type(&file_name).to_string();
        Self {
            file_name: Some(file_name),
            content_type: Some(content_type),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Where an encrypted document ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub cid: ContentAddress,
    /// Public URL, when the blob store serves one.
    pub gateway_url: Option<String>,
    pub binding_hash: BindingHash,
}

/// A decrypted document and the metadata stored with it.
#[derive(Clone, PartialEq, Eq)]
pub struct DecryptedDocument {
    pub bytes: Vec<u8>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

impl std::fmt::Debug for DecryptedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedDocument")
            .field("bytes", &self.bytes.len())
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// Content type for a file name, by extension.
pub fn infer_content_type(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "json" => "application/json",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Runs the upload and download flows.
///
/// The client is shared; several orchestrators may use the same one.
pub struct DecryptionOrchestrator<B: BlobStore> {
    client: Arc<ThresholdCryptoClient>,
    authorizer: SessionAuthorizer,
    envelopes: EnvelopeStore<B>,
    delegations: CapabilityDelegationBuilder<ThresholdCryptoClient>,
}

impl<B: BlobStore> DecryptionOrchestrator<B> {
    /// Create an orchestrator. Delegations are stamped with the client's clock.
    pub fn new(client: Arc<ThresholdCryptoClient>, blobs: Arc<B>, delegation: DelegationConfig) -> Self {
        let delegations = CapabilityDelegationBuilder::new(client.clone(), delegation)
            .with_clock(client.clock().clone());
        Self {
            authorizer: SessionAuthorizer::new(client.clone()),
            envelopes: EnvelopeStore::new(blobs),
            client,
            delegations,
        }
    }

    pub fn client(&self) -> &Arc<ThresholdCryptoClient> {
        &self.client
    }

    pub fn envelopes(&self) -> &EnvelopeStore<B> {
        &self.envelopes
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Upload
    // ─────────────────────────────────────────────────────────────────────────

    /// Encrypt `plaintext` under `policy` and store the envelope.
    ///
    /// Needs no wallet signature.
    pub async fn encrypt_and_store(
        &self,
        plaintext: &[u8],
        policy: &AccessPolicy,
        metadata: DocumentMetadata,
    ) -> Result<StoredDocument> {
        let encrypted = self.client.encrypt(plaintext, policy).await?;

        let mut envelope = Envelope::new(encrypted.ciphertext, encrypted.binding_hash, policy.clone());
        if let Some(file_name) = metadata.file_name {
            envelope = envelope.with_file_name(file_name);
        }
        if let Some(content_type) = metadata.content_type {
            envelope = envelope.with_content_type(content_type);
        }

        let cid = self.envelopes.put(&envelope).await?;
        info!(cid = %cid, binding = %encrypted.binding_hash, "stored encrypted document");

        Ok(StoredDocument {
            gateway_url: self.envelopes.gateway_url(&cid),
            cid,
            binding_hash: encrypted.binding_hash,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Download
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch, authorize and decrypt the document at `cid`.
    ///
    /// `sign` is asked to sign the delegation message for `wallet`. A session
    /// request refused for a stale or replayed nonce is retried once with a
    /// fresh delegation, which means `sign` may be called twice. Signature,
    /// scope and policy failures are never retried.
    pub async fn decrypt_by_content_address<F, Fut>(
        &self,
        cid: &str,
        wallet: WalletAddress,
        sign: F,
    ) -> Result<DecryptedDocument>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = anyhow::Result<WalletSignature>>,
    {
        let address = ContentAddress::parse(cid)?;
        let envelope = self.envelopes.get(&address).await?;
        let resource = ResourceDescriptor::for_document(&envelope.policy, &envelope.binding_hash)?;

        let mut flow = DecryptionFlow::new();
        let session = self.authorize(&mut flow, wallet, resource, &sign).await?;

        flow.transition(FlowState::DecryptionInFlight)?;
        let decrypted = self
            .client
            .decrypt(&envelope.ciphertext, &envelope.binding_hash, &envelope.policy, &session)
            .await;

        match decrypted {
            Ok(bytes) => {
                flow.transition(FlowState::Decrypted)?;
                info!(cid = %address, wallet = %wallet, "document decrypted");
                Ok(DecryptedDocument {
                    bytes,
                    file_name: envelope.file_name,
                    content_type: envelope.content_type,
                })
            }
            Err(e) => {
                flow.transition(FlowState::DecryptionFailed)?;
                warn!(cid = %address, wallet = %wallet, error = %e, "decryption failed");
                Err(e.into())
            }
        }
    }

    /// [`DecryptionOrchestrator::decrypt_by_content_address`] with a
    /// [`WalletSigner`] providing both the address and the signature.
    pub async fn decrypt_with_signer<S: WalletSigner>(
        &self,
        cid: &str,
        signer: &S,
    ) -> Result<DecryptedDocument> {
        self.decrypt_by_content_address(cid, signer.address(), move |message: String| async move {
            signer
                .sign_message(&message)
                .await
                .map_err(anyhow::Error::from)
        })
        .await
    }

    /// Drive the flow from `Idle` to `SessionEstablished`.
    ///
    /// The flow reaches `DelegationBuilt` only once a delegation exists; on
    /// a nonce retry that step is the flow's single retry edge.
    async fn authorize<F, Fut>(
        &self,
        flow: &mut DecryptionFlow,
        wallet: WalletAddress,
        resource: ResourceDescriptor,
        sign: &F,
    ) -> Result<SessionCredential>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = anyhow::Result<WalletSignature>>,
    {
        let validity = self.delegations.config().default_validity;

        loop {
            let unsigned = match self
                .delegations
                .build(wallet, resource.clone(), Ability::decryption(), validity)
                .await
            {
                Ok(unsigned) => unsigned,
                Err(e) => return Err(fail_authorization(flow, e.into())),
            };
            flow.transition(FlowState::DelegationBuilt)?;

            let signature = match sign(unsigned.message()).await {
                Ok(signature) => signature,
                Err(e) => {
                    debug!(wallet = %wallet, "wallet did not sign");
                    let e = AuthorizationError::SigningFailed(format!("{e:#}"));
                    return Err(fail_authorization(flow, e.into()));
                }
            };
            flow.transition(FlowState::DelegationSigned)?;

            let delegation = unsigned.into_signed(signature);
            flow.transition(FlowState::SessionRequested)?;

            match self.authorizer.exchange(&delegation).await {
                Ok(session) => {
                    flow.transition(FlowState::SessionEstablished)?;
                    return Ok(session);
                }
                Err(NetError::Authorization(e)) if e.is_nonce_failure() && flow.can_retry_nonce() => {
                    warn!(wallet = %wallet, error = %e, "session refused for nonce, retrying");
                }
                Err(e) => return Err(fail_authorization(flow, e.into())),
            }
        }
    }
}

/// Move the flow to `AuthorizationFailed` and hand back `error`.
fn fail_authorization(flow: &mut DecryptionFlow, error: KeygateError) -> KeygateError {
    match flow.transition(FlowState::AuthorizationFailed) {
        Ok(()) => error,
        Err(e) => e.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use keygate_core::{single_address_policy, Chain, Keypair, LocalWallet, ManualClock};
    use keygate_net::{
        CryptoError, Faults, KeyCeremony, KeyNode, KeyNodeConfig, MemoryChain, MemoryTransport,
        NetworkConfig, NetworkSecret, NodeTransport,
    };
    use keygate_store::MemoryBlobStore;

    use crate::error::FailureKind;

    struct Fixture {
        orchestrator: DecryptionOrchestrator<MemoryBlobStore>,
        blobs: Arc<MemoryBlobStore>,
        faults: Vec<Faults>,
        owner: LocalWallet,
    }

    fn fixture() -> Fixture {
        let (keys, shares) = KeyCeremony::deal(2, 3).unwrap();
        let secret = NetworkSecret::from_seed([8; 32]);
        let clock = ManualClock::new(1_700_000_000_000);
        let chain = Arc::new(MemoryChain::new());

        let mut faults = Vec::new();
        let transports: Vec<Arc<dyn NodeTransport>> = shares
            .into_iter()
            .enumerate()
            .map(|(i, share)| {
                let node = KeyNode::new(
                    Keypair::from_seed(&[i as u8 + 40; 32]),
                    share,
                    keys.clone(),
                    secret.clone(),
                    chain.clone(),
                    Arc::new(clock.clone()),
                    KeyNodeConfig::default(),
                );
                let transport = MemoryTransport::new(Arc::new(node));
                faults.push(transport.faults());
                Arc::new(transport) as Arc<dyn NodeTransport>
            })
            .collect();

        let client = ThresholdCryptoClient::new(transports, NetworkConfig::default())
            .with_clock(Arc::new(clock));
        let blobs = Arc::new(MemoryBlobStore::new());
        Fixture {
            orchestrator: DecryptionOrchestrator::new(
                Arc::new(client),
                blobs.clone(),
                DelegationConfig::default(),
            ),
            blobs,
            faults,
            owner: LocalWallet::from_seed([50; 32]),
        }
    }

    fn policy_for(wallet: &LocalWallet) -> AccessPolicy {
        single_address_policy(Chain::ethereum(), &wallet.address().to_string())
    }

    #[tokio::test]
    async fn test_store_then_decrypt() {
        let f = fixture();
        let stored = f
            .orchestrator
            .encrypt_and_store(b"quarterly report", &policy_for(&f.owner), DocumentMetadata::for_file("q3.pdf"))
            .await
            .unwrap();
        assert_eq!(stored.gateway_url, None);
        assert_eq!(f.blobs.len(), 1);

        let document = f
            .orchestrator
            .decrypt_with_signer(&stored.cid.to_cid(), &f.owner)
            .await
            .unwrap();

        assert_eq!(document.bytes, b"quarterly report");
        assert_eq!(document.file_name.as_deref(), Some("q3.pdf"));
        assert_eq!(document.content_type.as_deref(), Some("application/pdf"));
    }

    #[tokio::test]
    async fn test_other_wallet_denied() {
        let f = fixture();
        let stored = f
            .orchestrator
            .encrypt_and_store(b"secret", &policy_for(&f.owner), DocumentMetadata::default())
            .await
            .unwrap();

        let stranger = LocalWallet::from_seed([51; 32]);
        let err = f
            .orchestrator
            .decrypt_with_signer(&stored.cid.to_cid(), &stranger)
            .await
            .unwrap_err();

        assert!(matches!(err, KeygateError::Crypto(CryptoError::AccessDenied)));
        assert_eq!(err.kind(), FailureKind::NotAuthorized);
    }

    #[tokio::test]
    async fn test_signing_failure_is_not_retried() {
        let f = fixture();
        let stored = f
            .orchestrator
            .encrypt_and_store(b"secret", &policy_for(&f.owner), DocumentMetadata::default())
            .await
            .unwrap();

        let calls = AtomicUsize::new(0);
        let err = f
            .orchestrator
            .decrypt_by_content_address(&stored.cid.to_cid(), f.owner.address(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<WalletSignature, _>(anyhow::anyhow!("user rejected")) }
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            KeygateError::Authorization(AuthorizationError::SigningFailed(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wrong_key_signature_is_not_retried() {
        let f = fixture();
        let stored = f
            .orchestrator
            .encrypt_and_store(b"secret", &policy_for(&f.owner), DocumentMetadata::default())
            .await
            .unwrap();

        let impostor = LocalWallet::from_seed([52; 32]);
        let calls = AtomicUsize::new(0);
        let err = f
            .orchestrator
            .decrypt_by_content_address(&stored.cid.to_cid(), f.owner.address(), |message| {
                calls.fetch_add(1, Ordering::SeqCst);
                let signature = impostor.sign(&message);
                async move { Ok(signature) }
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            KeygateError::Authorization(AuthorizationError::InvalidSignature(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unavailable_nonce_fails_before_signing() {
        let f = fixture();
        let stored = f
            .orchestrator
            .encrypt_and_store(b"secret", &policy_for(&f.owner), DocumentMetadata::default())
            .await
            .unwrap();
        for faults in &f.faults {
            faults.set_offline(true);
        }

        let calls = AtomicUsize::new(0);
        let err = f
            .orchestrator
            .decrypt_by_content_address(&stored.cid.to_cid(), f.owner.address(), |message| {
                calls.fetch_add(1, Ordering::SeqCst);
                let signature = f.owner.sign(&message);
                async move { Ok(signature) }
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            KeygateError::Authorization(AuthorizationError::NonceUnavailable(_))
        ));
        assert_eq!(err.kind(), FailureKind::Transient);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_and_malformed_addresses() {
        let f = fixture();

        let unknown = ContentAddress::for_bytes(b"never stored").to_cid();
        let err = f
            .orchestrator
            .decrypt_with_signer(&unknown, &f.owner)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::NotFound);

        let err = f
            .orchestrator
            .decrypt_with_signer("not-a-cid", &f.owner)
            .await
            .unwrap_err();
        assert!(matches!(err, KeygateError::Identifier(_)));
        assert_eq!(err.kind(), FailureKind::Invalid);
    }

    #[tokio::test]
    async fn test_store_offline() {
        let f = fixture();
        f.blobs.set_offline(true);

        let err = f
            .orchestrator
            .encrypt_and_store(b"secret", &policy_for(&f.owner), DocumentMetadata::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transient);
    }

    #[test]
    fn test_infer_content_type() {
        assert_eq!(infer_content_type("scan.PDF"), "application/pdf");
        assert_eq!(infer_content_type("logo.png"), "image/png");
        assert_eq!(infer_content_type("photo.jpg"), "image/jpeg");
        assert_eq!(infer_content_type("photo.jpeg"), "image/jpeg");
        assert_eq!(infer_content_type("data.json"), "application/json");
        assert_eq!(infer_content_type("notes.txt"), "text/plain");
        assert_eq!(infer_content_type("archive.tar.gz"), "application/octet-stream");
        assert_eq!(infer_content_type("README"), "application/octet-stream");
    }
}
