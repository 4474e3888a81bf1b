//! End-to-end tests: upload, authorize and decrypt against an in-process
//! key network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use keygate::auth::{
    Ability, AuthorizationError, CapabilityDelegationBuilder, DelegationConfig,
    ResourceDescriptor, SessionCredential,
};
use keygate::core::{
    AccessPolicy, Chain, Comparator, LocalWallet, PolicyClause, ResourceKind, WalletSignature,
    WalletSigner,
};
use keygate::net::{CryptoError, NetError, NetworkConfig, SessionAuthorizer};
use keygate::store::{Envelope, SqliteBlobStore, StorageError};
use keygate::{DocumentMetadata, FailureKind, KeygateError, StoredDocument};
use keygate_testkit::fixtures::{owner_policy, wallet, TestNetwork};
use keygate_testkit::generators::DocumentParams;
use proptest::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}

async fn upload(network: &TestNetwork, plaintext: &[u8], policy: &AccessPolicy) -> StoredDocument {
    network
        .orchestrator
        .encrypt_and_store(plaintext, policy, DocumentMetadata::default())
        .await
        .unwrap()
}

/// Establish a session for `stored` without decrypting.
async fn session_for(
    network: &TestNetwork,
    requester: &LocalWallet,
    stored: &StoredDocument,
) -> SessionCredential {
    let envelope: Envelope = network.orchestrator.envelopes().get(&stored.cid).await.unwrap();
    let resource = ResourceDescriptor::for_document(&envelope.policy, &stored.binding_hash).unwrap();

    let builder = CapabilityDelegationBuilder::new(network.client.clone(), DelegationConfig::default())
        .with_clock(network.client.clock().clone());
    let validity = builder.config().default_validity;
    let unsigned = builder
        .build(requester.address(), resource, Ability::decryption(), validity)
        .await
        .unwrap();
    let signature = requester.sign(&unsigned.message());

    SessionAuthorizer::new(network.client.clone())
        .exchange(&unsigned.into_signed(signature))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_owner_round_trip() {
    init_tracing();
    let network = TestNetwork::new(2, 3);
    let owner = wallet(1);

    let stored = network
        .orchestrator
        .encrypt_and_store(
            b"%PDF-1.7 lease agreement",
            &owner_policy(&owner),
            DocumentMetadata::for_file("lease.pdf"),
        )
        .await
        .unwrap();

    let document = network
        .orchestrator
        .decrypt_with_signer(&stored.cid.to_cid(), &owner)
        .await
        .unwrap();

    assert_eq!(document.bytes, b"%PDF-1.7 lease agreement");
    assert_eq!(document.file_name.as_deref(), Some("lease.pdf"));
    assert_eq!(document.content_type.as_deref(), Some("application/pdf"));

    let released: u64 = network
        .nodes
        .iter()
        .map(|n| n.node.stats().shares_released)
        .sum();
    assert!(released >= 2);
}

#[tokio::test]
async fn test_other_wallet_is_denied() {
    init_tracing();
    let network = TestNetwork::new(2, 3);
    let stored = upload(&network, b"owner only", &owner_policy(&wallet(1))).await;

    let err = network
        .orchestrator
        .decrypt_with_signer(&stored.cid.to_cid(), &wallet(2))
        .await
        .unwrap_err();

    assert!(matches!(err, KeygateError::Crypto(CryptoError::AccessDenied)));
    assert_eq!(err.kind(), FailureKind::NotAuthorized);
}

#[tokio::test]
async fn test_token_gated_document() {
    init_tracing();
    let network = TestNetwork::new(2, 3);
    let holder = wallet(3);
    let contract = "0x2222222222222222222222222222222222222222";
    let policy = AccessPolicy::new(vec![PolicyClause::token_balance(
        Chain::ethereum(),
        ResourceKind::Erc20,
        contract,
        Comparator::Gte,
        100,
    )]);
    let stored = upload(&network, b"members newsletter", &policy).await;
    let holder_address = holder.address().to_string();

    network
        .chain
        .set_token_balance("ethereum", contract, &holder_address, None, 250);
    let document = network
        .orchestrator
        .decrypt_with_signer(&stored.cid.to_cid(), &holder)
        .await
        .unwrap();
    assert_eq!(document.bytes, b"members newsletter");

    network
        .chain
        .set_token_balance("ethereum", contract, &holder_address, None, 50);
    let err = network
        .orchestrator
        .decrypt_with_signer(&stored.cid.to_cid(), &holder)
        .await
        .unwrap_err();
    assert!(matches!(err, KeygateError::Crypto(CryptoError::AccessDenied)));
}

#[tokio::test]
async fn test_tolerates_offline_nodes_up_to_threshold() {
    init_tracing();
    let network = TestNetwork::new(3, 5);
    let owner = wallet(4);
    let stored = upload(&network, b"board minutes", &owner_policy(&owner)).await;

    network.set_offline(0, true);
    network.set_offline(3, true);
    let document = network
        .orchestrator
        .decrypt_with_signer(&stored.cid.to_cid(), &owner)
        .await
        .unwrap();
    assert_eq!(document.bytes, b"board minutes");

    network.set_offline(4, true);
    let err = network
        .orchestrator
        .decrypt_with_signer(&stored.cid.to_cid(), &owner)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Transient);
}

#[tokio::test]
async fn test_stale_nonce_is_retried_once() {
    init_tracing();
    let network = TestNetwork::new(2, 3);
    let owner = wallet(5);

    // Connect with node 0 answering first, so the first nonce comes from it.
    network.nodes[1].faults.set_latency(Duration::from_millis(50));
    network.nodes[2].faults.set_latency(Duration::from_millis(100));
    network.client.connect().await.unwrap();
    network.nodes[1].faults.clear();
    network.nodes[2].faults.clear();

    let stored = upload(&network, b"retry me", &owner_policy(&owner)).await;

    // Node 0 runs six minutes fast: its nonces look like they come from the
    // future to the others, and their nonces look stale to it.
    network.nodes[0].clock.advance_secs(6 * 60);

    let calls = AtomicUsize::new(0);
    let document = network
        .orchestrator
        .decrypt_by_content_address(&stored.cid.to_cid(), owner.address(), |message| {
            calls.fetch_add(1, Ordering::SeqCst);
            let signature = owner.sign(&message);
            async move { Ok(signature) }
        })
        .await
        .unwrap();

    assert_eq!(document.bytes, b"retry me");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_nonce_failures_retry_only_once() {
    init_tracing();
    let network = TestNetwork::new(2, 3);
    let owner = wallet(6);
    let stored = upload(&network, b"never", &owner_policy(&owner)).await;

    // Node clocks more than a nonce lifetime apart, all inside the
    // delegation window: each nonce is only ever accepted by its issuer.
    network.nodes[0].clock.advance_secs(-20);
    network.nodes[1].clock.advance_secs(285);
    network.nodes[2].clock.advance_secs(590);

    let calls = AtomicUsize::new(0);
    let err = network
        .orchestrator
        .decrypt_by_content_address(&stored.cid.to_cid(), owner.address(), |message| {
            calls.fetch_add(1, Ordering::SeqCst);
            let signature = owner.sign(&message);
            async move { Ok(signature) }
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        KeygateError::Authorization(AuthorizationError::InvalidNonce(_))
    ));
    assert_eq!(err.kind(), FailureKind::NotAuthorized);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_expired_session_is_refused_locally() {
    init_tracing();
    let network = TestNetwork::new(2, 3);
    let owner = wallet(7);
    let policy = owner_policy(&owner);
    let stored = upload(&network, b"short lived", &policy).await;
    let session = session_for(&network, &owner, &stored).await;
    let envelope = network.orchestrator.envelopes().get(&stored.cid).await.unwrap();

    network.advance_secs(11 * 60);
    let err = network
        .client
        .decrypt(&envelope.ciphertext, &stored.binding_hash, &policy, &session)
        .await
        .unwrap_err();

    assert_eq!(err, NetError::Crypto(CryptoError::CredentialExpired));
    let released: u64 = network.nodes.iter().map(|n| n.node.stats().shares_released).sum();
    assert_eq!(released, 0);
}

#[tokio::test]
async fn test_policy_swap_is_refused() {
    init_tracing();
    let network = TestNetwork::new(2, 3);
    let owner = wallet(8);
    let stored = upload(&network, b"bound", &owner_policy(&owner)).await;
    let session = session_for(&network, &owner, &stored).await;
    let envelope = network.orchestrator.envelopes().get(&stored.cid).await.unwrap();

    let err = network
        .client
        .decrypt(
            &envelope.ciphertext,
            &stored.binding_hash,
            &owner_policy(&wallet(9)),
            &session,
        )
        .await
        .unwrap_err();

    assert_eq!(err, NetError::Crypto(CryptoError::BindingMismatch));
}

#[tokio::test]
async fn test_session_for_other_document_is_refused() {
    init_tracing();
    let network = TestNetwork::new(2, 3);
    let owner = wallet(8);
    let policy = owner_policy(&owner);
    let first = upload(&network, b"first lease", &policy).await;
    let second = upload(&network, b"second lease", &policy).await;
    let session = session_for(&network, &owner, &first).await;
    let envelope = network.orchestrator.envelopes().get(&second.cid).await.unwrap();

    let err = network
        .client
        .decrypt(&envelope.ciphertext, &second.binding_hash, &policy, &session)
        .await
        .unwrap_err();

    assert!(
        matches!(err, NetError::Authorization(AuthorizationError::ScopeMismatch(_))),
        "{err:?}"
    );
    let released: u64 = network.nodes.iter().map(|n| n.node.stats().shares_released).sum();
    assert_eq!(released, 0);
}

#[tokio::test]
async fn test_decrypt_uses_spare_granting_node() {
    init_tracing();
    let network = TestNetwork::new(2, 3);
    let owner = wallet(10);
    let policy = owner_policy(&owner);
    let stored = upload(&network, b"spare grant", &policy).await;
    let session = session_for(&network, &owner, &stored).await;
    assert_eq!(session.grants().len(), 3);

    network.set_offline(0, true);
    let envelope = network.orchestrator.envelopes().get(&stored.cid).await.unwrap();
    let plaintext = network
        .client
        .decrypt(&envelope.ciphertext, &stored.binding_hash, &policy, &session)
        .await
        .unwrap();

    assert_eq!(plaintext, b"spare grant");
}

#[tokio::test]
async fn test_stalled_network_times_out() {
    init_tracing();
    let config = NetworkConfig::default()
        .with_request_timeout(Duration::from_millis(200))
        .with_handshake_timeout(Duration::from_millis(200));
    let network = TestNetwork::with_config(2, 3, config);
    let owner = wallet(10);
    let policy = owner_policy(&owner);
    let stored = upload(&network, b"slow", &policy).await;
    let session = session_for(&network, &owner, &stored).await;
    let envelope = network.orchestrator.envelopes().get(&stored.cid).await.unwrap();

    network.stall_all();
    let err = network
        .client
        .decrypt(&envelope.ciphertext, &stored.binding_hash, &policy, &session)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        NetError::Crypto(CryptoError::QuorumTimeout { received: 0, needed: 2 })
    );
    assert_eq!(KeygateError::from(err).kind(), FailureKind::Transient);
}

#[tokio::test]
async fn test_cancelled_decrypt_leaves_client_usable() {
    init_tracing();
    let network = TestNetwork::new(2, 3);
    let owner = wallet(11);
    let stored = upload(&network, b"still here", &owner_policy(&owner)).await;
    let cid = stored.cid.to_cid();

    network.stall_all();
    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        network.orchestrator.decrypt_with_signer(&cid, &owner),
    )
    .await;
    assert!(cancelled.is_err());

    for node in &network.nodes {
        node.faults.clear();
    }
    let document = network
        .orchestrator
        .decrypt_with_signer(&cid, &owner)
        .await
        .unwrap();
    assert_eq!(document.bytes, b"still here");
}

#[tokio::test]
async fn test_signing_refusal_stops_flow() {
    init_tracing();
    let network = TestNetwork::new(2, 3);
    let owner = wallet(12);
    let stored = upload(&network, b"unsigned", &owner_policy(&owner)).await;

    let err = network
        .orchestrator
        .decrypt_by_content_address(&stored.cid.to_cid(), owner.address(), |_| async {
            Err::<WalletSignature, _>(anyhow::anyhow!("user closed the wallet"))
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        KeygateError::Authorization(AuthorizationError::SigningFailed(_))
    ));
    let grants: u64 = network.nodes.iter().map(|n| n.node.stats().grants_issued).sum();
    assert_eq!(grants, 0);
}

#[tokio::test]
async fn test_corrupted_envelope_is_refused() {
    init_tracing();
    let network = TestNetwork::new(2, 3);
    let owner = wallet(13);
    let stored = upload(&network, b"tamper", &owner_policy(&owner)).await;

    network.blobs.corrupt(&stored.cid, b"{}".to_vec());
    let err = network
        .orchestrator
        .decrypt_with_signer(&stored.cid.to_cid(), &owner)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        KeygateError::Storage(StorageError::MalformedEnvelope(_))
    ));
    assert_eq!(err.kind(), FailureKind::Invalid);
}

#[tokio::test]
async fn test_sqlite_store_survives_reopen() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("envelopes.db");
    let network = TestNetwork::new(2, 3);
    let owner = wallet(14);

    let cid = {
        let store = Arc::new(SqliteBlobStore::open(&path).unwrap());
        let orchestrator = network.orchestrator_over(store);
        orchestrator
            .encrypt_and_store(b"persisted", &owner_policy(&owner), DocumentMetadata::for_file("a.txt"))
            .await
            .unwrap()
            .cid
    };

    let store = Arc::new(SqliteBlobStore::open(&path).unwrap());
    let orchestrator = network.orchestrator_over(store);
    let document = orchestrator
        .decrypt_with_signer(&cid.to_cid(), &owner)
        .await
        .unwrap();

    assert_eq!(document.bytes, b"persisted");
    assert_eq!(document.content_type.as_deref(), Some("text/plain"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn test_any_document_round_trips(params: DocumentParams) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let decrypted = runtime.block_on(async {
            let network = TestNetwork::new(2, 3);
            let stored = network
                .orchestrator
                .encrypt_and_store(
                    &params.plaintext,
                    &params.owner_policy(),
                    DocumentMetadata::for_file(params.file_name.clone()),
                )
                .await
                .unwrap();
            network
                .orchestrator
                .decrypt_with_signer(&stored.cid.to_cid(), &params.owner)
                .await
                .unwrap()
        });

        prop_assert_eq!(&decrypted.bytes, &params.plaintext);
        prop_assert_eq!(decrypted.file_name.as_deref(), Some(params.file_name.as_str()));
    }
}
