//! Transport abstraction for talking to key nodes.
//!
//! A transport carries one request to one node and brings back its answer.
//! Implementations may use HTTPS, QUIC or anything else; the in-memory
//! transport below is used by tests and local development networks.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::messages::{NodeId, NodeRequest, NodeResponse};

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Request/response channel to a single key node.
///
/// Implementations must be thread-safe (Send + Sync) and cancel-safe:
/// dropping the future returned by `call` must leave the transport usable.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Identity of the node on the other end.
    fn node_id(&self) -> NodeId;

    /// Send a request and wait for the node's response.
    async fn call(&self, request: NodeRequest) -> Result<NodeResponse>;
}

/// An in-process transport for testing.
///
/// Frames every request and response through CBOR so that anything that
/// would not survive the wire fails here too.
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tracing::trace;

    use crate::messages::{from_frame, to_frame};
    use crate::node::KeyNode;

    /// Switches for simulating an unhealthy node. Clones share state.
    #[derive(Debug, Clone, Default)]
    pub struct Faults {
        inner: Arc<FaultState>,
    }

    #[derive(Debug, Default)]
    struct FaultState {
        offline: AtomicBool,
        stalled: AtomicBool,
        latency_ms: AtomicU64,
    }

    impl Faults {
        /// Refuse every call with [`TransportError::Unreachable`].
        pub fn set_offline(&self, offline: bool) {
            self.inner.offline.store(offline, Ordering::SeqCst);
        }

        /// Accept calls but never answer.
        pub fn set_stalled(&self, stalled: bool) {
            self.inner.stalled.store(stalled, Ordering::SeqCst);
        }

        /// Delay every answer.
        pub fn set_latency(&self, latency: Duration) {
            self.inner
                .latency_ms
                .store(latency.as_millis() as u64, Ordering::SeqCst);
        }

        /// Back to healthy.
        pub fn clear(&self) {
            self.set_offline(false);
            self.set_stalled(false);
            self.set_latency(Duration::ZERO);
        }

        fn latency(&self) -> Duration {
            Duration::from_millis(self.inner.latency_ms.load(Ordering::SeqCst))
        }
    }

    /// Transport that calls a [`KeyNode`] directly.
    pub struct MemoryTransport {
        node: Arc<KeyNode>,
        faults: Faults,
    }

    impl MemoryTransport {
        pub fn new(node: Arc<KeyNode>) -> Self {
            Self {
                node,
                faults: Faults::default(),
            }
        }

        /// Handle for injecting faults into this transport.
        pub fn faults(&self) -> Faults {
            self.faults.clone()
        }

        pub fn node(&self) -> &Arc<KeyNode> {
            &self.node
        }
    }

    #[async_trait]
    impl NodeTransport for MemoryTransport {
        fn node_id(&self) -> NodeId {
            self.node.id()
        }

        async fn call(&self, request: NodeRequest) -> Result<NodeResponse> {
            if self.faults.inner.offline.load(Ordering::SeqCst) {
                return Err(TransportError::Unreachable(format!("node {} offline", self.node.id())));
            }

            let latency = self.faults.latency();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if self.faults.inner.stalled.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }

            let frame = to_frame(&request).map_err(TransportError::Codec)?;
            trace!(node = %self.node.id(), bytes = frame.len(), kind = request.kind(), "memory call");
            let request: NodeRequest = from_frame(&frame).map_err(TransportError::Codec)?;

            let response = self.node.handle(request).await;

            let frame = to_frame(&response).map_err(TransportError::Codec)?;
            from_frame(&frame).map_err(TransportError::Codec)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryTransport;
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use keygate_core::{Keypair, SystemClock};

    use crate::binding::NetworkSecret;
    use crate::chain::MemoryChain;
    use crate::config::KeyNodeConfig;
    use crate::node::KeyNode;
    use crate::threshold::KeyCeremony;

    fn transport() -> MemoryTransport {
        let (keys, mut shares) = KeyCeremony::deal(1, 1).unwrap();
        let node = KeyNode::new(
            Keypair::generate(),
            shares.remove(0),
            keys,
            NetworkSecret::from_seed([3; 32]),
            Arc::new(MemoryChain::new()),
            Arc::new(SystemClock),
            KeyNodeConfig::default(),
        );
        MemoryTransport::new(Arc::new(node))
    }

    #[tokio::test]
    async fn test_memory_transport_handshake() {
        let transport = transport();
        let response = transport.call(NodeRequest::Handshake).await.unwrap();

        match response {
            NodeResponse::Handshake(info) => {
                assert_eq!(info.share_index, 1);
                assert_eq!(NodeId::from_identity(&info.node_key), transport.node_id());
            }
            other => panic!("expected handshake, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_offline_node_unreachable() {
        let transport = transport();
        transport.faults().set_offline(true);

        assert!(matches!(
            transport.call(NodeRequest::FetchNonce).await,
            Err(TransportError::Unreachable(_))
        ));

        transport.faults().clear();
        assert!(transport.call(NodeRequest::FetchNonce).await.is_ok());
    }

    #[tokio::test]
    async fn test_stalled_node_never_answers() {
        let transport = transport();
        transport.faults().set_stalled(true);

        let result =
            tokio::time::timeout(Duration::from_millis(50), transport.call(NodeRequest::Handshake))
                .await;
        assert!(result.is_err());
    }
}
