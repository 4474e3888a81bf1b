//! Test fixtures and helpers.
//!
//! [`TestNetwork`] stands up a complete in-process key network: N key nodes
//! sharing one dealt key, an in-memory chain, a client and an orchestrator
//! over an in-memory blob store. Every node and the client run on their own
//! manual clock, and every node can be taken offline or stalled.

use std::sync::Arc;

use keygate::DecryptionOrchestrator;
use keygate_auth::DelegationConfig;
use keygate_core::{
    single_address_policy, AccessPolicy, Chain, Keypair, LocalWallet, ManualClock, WalletSigner,
};
use keygate_net::{
    Faults, KeyCeremony, KeyNode, KeyNodeConfig, MemoryChain, MemoryTransport, NetworkConfig,
    NetworkSecret, NodeTransport, PublicKeySet, ThresholdCryptoClient,
};
use keygate_store::{BlobStore, MemoryBlobStore};

/// Start time shared by all fixture clocks.
pub const FIXTURE_START_MILLIS: i64 = 1_736_870_400_000;

/// One key node and its controls.
pub struct TestNode {
    pub node: Arc<KeyNode>,
    pub faults: Faults,
    pub clock: ManualClock,
}

/// An in-process T-of-N key network with a client.
pub struct TestNetwork {
    pub nodes: Vec<TestNode>,
    pub public_keys: PublicKeySet,
    pub secret: NetworkSecret,
    pub chain: Arc<MemoryChain>,
    pub client: Arc<ThresholdCryptoClient>,
    /// The client's clock. Delegations are stamped with it.
    pub clock: ManualClock,
    pub blobs: Arc<MemoryBlobStore>,
    pub orchestrator: DecryptionOrchestrator<MemoryBlobStore>,
}

impl TestNetwork {
    /// A `threshold`-of-`total` network with default timeouts.
    pub fn new(threshold: usize, total: usize) -> Self {
        Self::with_config(
            threshold,
            total,
            NetworkConfig::default().with_threshold(threshold),
        )
    }

    /// A `threshold`-of-`total` network with the given client config.
    pub fn with_config(threshold: usize, total: usize, config: NetworkConfig) -> Self {
        let (public_keys, shares) = match KeyCeremony::deal(threshold, total) {
            Ok(dealt) => dealt,
            Err(e) => panic!("cannot deal {threshold}-of-{total}: {e}"),
        };
        let secret = NetworkSecret::from_seed([0x5e; 32]);
        let chain = Arc::new(MemoryChain::new());

        let mut nodes = Vec::with_capacity(total);
        let mut transports: Vec<Arc<dyn NodeTransport>> = Vec::with_capacity(total);
        for (i, share) in shares.into_iter().enumerate() {
            let clock = ManualClock::new(FIXTURE_START_MILLIS);
            let node = Arc::new(KeyNode::new(
                Keypair::from_seed(&node_seed(i)),
                share,
                public_keys.clone(),
                secret.clone(),
                chain.clone(),
                Arc::new(clock.clone()),
                KeyNodeConfig::default(),
            ));
            let transport = MemoryTransport::new(node.clone());
            nodes.push(TestNode {
                faults: transport.faults(),
                node,
                clock,
            });
            transports.push(Arc::new(transport));
        }

        let clock = ManualClock::new(FIXTURE_START_MILLIS);
        let client = Arc::new(
            ThresholdCryptoClient::new(transports, config).with_clock(Arc::new(clock.clone())),
        );
        let blobs = Arc::new(MemoryBlobStore::new());
        let orchestrator =
            DecryptionOrchestrator::new(client.clone(), blobs.clone(), DelegationConfig::default());

        Self {
            nodes,
            public_keys,
            secret,
            chain,
            client,
            clock,
            blobs,
            orchestrator,
        }
    }

    /// An orchestrator sharing this network's client over another store.
    pub fn orchestrator_over<B: BlobStore>(&self, blobs: Arc<B>) -> DecryptionOrchestrator<B> {
        DecryptionOrchestrator::new(self.client.clone(), blobs, DelegationConfig::default())
    }

    /// Advance the client and every node clock together.
    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance_secs(secs);
        for node in &self.nodes {
            node.clock.advance_secs(secs);
        }
    }

    /// Take node `index` offline or bring it back.
    pub fn set_offline(&self, index: usize, offline: bool) {
        self.nodes[index].faults.set_offline(offline);
    }

    /// Make every node hang until the caller gives up.
    pub fn stall_all(&self) {
        for node in &self.nodes {
            node.faults.set_stalled(true);
        }
    }
}

fn node_seed(index: usize) -> [u8; 32] {
    let mut seed = [0u8; 32];
    seed[0] = 0xa0;
    seed[1] = index as u8;
    seed
}

/// A deterministic wallet.
pub fn wallet(seed: u8) -> LocalWallet {
    LocalWallet::from_seed([seed; 32])
}

/// Policy admitting only `wallet`.
pub fn owner_policy(wallet: &LocalWallet) -> AccessPolicy {
    single_address_policy(Chain::ethereum(), &wallet.address().to_string())
}

/// Create multiple wallets for multi-party tests.
pub fn multi_party_wallets(count: usize) -> Vec<LocalWallet> {
    (0..count).map(|i| wallet(i as u8 + 1)).collect()
}
