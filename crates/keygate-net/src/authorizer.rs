//! Exchanging signed delegations for session credentials.

use std::sync::Arc;

use tracing::{debug, info};

use keygate_auth::{
    AuthorizationError, CapabilityDelegation, SessionCredential, SessionGrant, SessionKey,
    SessionScope,
};

use crate::client::{quorum_failure, ThresholdCryptoClient};
use crate::error::{CryptoError, Result};
use crate::messages::{NodeRequest, NodeResponse};
use crate::quorum::{gather, StopRule, Verdict};

/// Turns a [`CapabilityDelegation`] into a [`SessionCredential`].
pub struct SessionAuthorizer {
    client: Arc<ThresholdCryptoClient>,
}

impl SessionAuthorizer {
    pub fn new(client: Arc<ThresholdCryptoClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<ThresholdCryptoClient> {
        &self.client
    }

    /// Exchange a signed delegation for a session.
    ///
    /// An expired delegation is refused without contacting the network.
    /// Otherwise each node checks the delegation independently. Every node
    /// that answers before the deadline is heard, so the credential holds
    /// grants from spare nodes as well as the first `threshold`.
    pub async fn exchange(&self, delegation: &CapabilityDelegation) -> Result<SessionCredential> {
        if self.client.clock().now_millis() > delegation.expires_at() {
            return Err(AuthorizationError::DelegationExpired.into());
        }

        let network = self.client.network().await?;
        let needed = network.threshold();
        let key = SessionKey::generate();
        let session_public = key.public_key();
        let scope = SessionScope::from_delegation(delegation);

        let requests = network
            .nodes
            .iter()
            .map(|node| {
                let request = NodeRequest::Authorize {
                    delegation: delegation.clone(),
                    session_public,
                };
                (node.transport.clone(), request)
            })
            .collect();

        let outcome = gather(
            requests,
            StopRule::Every(needed),
            self.client.config().request_timeout,
            |id, response| match response {
                NodeResponse::Authorized(grant) => {
                    let expected = network.node(&id).map(|n| n.node_key);
                    if expected != Some(grant.node_key) {
                        Verdict::Invalid("grant from unexpected key".into())
                    } else if grant.session_public != session_public || grant.scope != scope {
                        Verdict::Invalid("grant for a different session".into())
                    } else if !grant.verify() {
                        Verdict::Invalid("grant signature".into())
                    } else {
                        Verdict::Accept(grant)
                    }
                }
                NodeResponse::Rejected(r) => Verdict::Reject(r),
                _ => Verdict::Invalid("expected session grant".into()),
            },
        )
        .await;

        if !outcome.reached(needed) {
            debug!(
                accepted = outcome.accepted.len(),
                rejected = outcome.rejections.len(),
                needed,
                "session request failed"
            );
            return Err(quorum_failure(&outcome, needed, |o| {
                CryptoError::NetworkUnavailable(format!(
                    "{} of {} nodes granted a session",
                    o.accepted.len(),
                    needed
                ))
            }));
        }

        let grants: Vec<SessionGrant> =
            outcome.into_accepted().into_iter().map(|(_, g)| g).collect();
        info!(
            wallet = %delegation.wallet_address(),
            grants = grants.len(),
            "session established"
        );
        Ok(key.into_credential(scope, grants))
    }
}
