//! Capability delegations.
//!
//! A delegation is a wallet-signed, time-bounded statement that a session may
//! exercise exactly one ability over exactly one resource. It is rendered as a
//! Sign-In-With-Ethereum (EIP-4361) style message; the wallet signs the text
//! and key nodes re-render it from the structured fields to verify.
//!
//! Delegations are single-use: the nonce is issued by the key network and
//! consumed by every node that accepts it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use keygate_core::{
    policy_hash, AccessPolicy, BindingHash, Clock, PolicyError, SystemClock, WalletAddress,
    WalletSignature,
};

use crate::error::{AuthorizationError, Result};

const RESOURCE_SCHEME: &str = "keygate-acc://";

/// An ability a session may exercise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ability(String);

impl Ability {
    /// The only ability key nodes accept.
    pub const DECRYPTION: &'static str = "access-control-condition-decryption";

    pub fn decryption() -> Self {
        Self(Self::DECRYPTION.to_string())
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_decryption(&self) -> bool {
        self.0 == Self::DECRYPTION
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The resource a delegation covers: one policy bound to one ciphertext.
///
/// Rendered `keygate-acc://<policy hash hex>/<binding hash hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceDescriptor(String);

impl ResourceDescriptor {
    /// Resource for a policy and the binding it was encrypted under.
    pub fn for_document(
        policy: &AccessPolicy,
        binding: &BindingHash,
    ) -> std::result::Result<Self, PolicyError> {
        let hash = policy_hash(policy)?;
        Ok(Self(format!("{RESOURCE_SCHEME}{}/{}", hash.to_hex(), binding.to_hex())))
    }

    /// A resource string as given. May be a wildcard; builders reject those.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The wildcard resource.
    pub fn wildcard() -> Self {
        Self("*".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this names more than one document.
    pub fn is_wildcard(&self) -> bool {
        self.0.is_empty() || self.0.contains('*')
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A network-issued nonce. Opaque to the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkNonce(pub String);

impl NetworkNonce {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of fresh single-use nonces.
#[async_trait]
pub trait NonceSource: Send + Sync {
    async fn fetch_nonce(&self) -> Result<NetworkNonce>;
}

/// Settings for the messages a wallet is asked to sign.
#[derive(Debug, Clone)]
pub struct DelegationConfig {
    /// Domain presented to the wallet.
    pub domain: String,

    /// URI the session is requested for.
    pub uri: String,

    pub chain_id: u64,

    /// Longest validity window a builder will accept.
    pub max_validity: Duration,

    /// Window used when a caller does not ask for one.
    pub default_validity: Duration,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            uri: "keygate://session".to_string(),
            chain_id: 1,
            max_validity: Duration::hours(1),
            default_validity: Duration::minutes(10),
        }
    }
}

impl DelegationConfig {
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    pub fn with_max_validity(mut self, max_validity: Duration) -> Self {
        self.max_validity = max_validity;
        self
    }

    pub fn with_default_validity(mut self, default_validity: Duration) -> Self {
        self.default_validity = default_validity;
        self
    }
}

/// The fields a wallet signs over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedDelegation {
    pub domain: String,
    pub uri: String,
    pub chain_id: u64,
    pub ability: Ability,
    pub resource: ResourceDescriptor,
    pub wallet_address: WalletAddress,
    pub nonce: NetworkNonce,
    /// Unix milliseconds.
    pub issued_at: i64,
    /// Unix milliseconds.
    pub expires_at: i64,
}

impl UnsignedDelegation {
    /// The EIP-4361 style text the wallet signs.
    pub fn message(&self) -> String {
        format!(
            "{domain} wants you to sign in with your Ethereum account:\n\
             {address}\n\
             \n\
             I further authorize the stated URI to perform the following actions on my behalf: \
             '{ability}' for '{resource}'.\n\
             \n\
             URI: {uri}\n\
             Version: 1\n\
             Chain ID: {chain_id}\n\
             Nonce: {nonce}\n\
             Issued At: {issued_at}\n\
             Expiration Time: {expires_at}\n\
             Resources:\n\
             - {resource}",
            domain = self.domain,
            address = self.wallet_address,
            ability = self.ability,
            resource = self.resource,
            uri = self.uri,
            chain_id = self.chain_id,
            nonce = self.nonce,
            issued_at = rfc3339(self.issued_at),
            expires_at = rfc3339(self.expires_at),
        )
    }

    /// Attach the wallet's signature over [`UnsignedDelegation::message`].
    pub fn into_signed(self, signature: WalletSignature) -> CapabilityDelegation {
        CapabilityDelegation {
            body: self,
            signature,
        }
    }
}

/// A signed delegation, ready to exchange for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDelegation {
    pub body: UnsignedDelegation,
    pub signature: WalletSignature,
}

impl CapabilityDelegation {
    pub fn wallet_address(&self) -> WalletAddress {
        self.body.wallet_address
    }

    pub fn resource(&self) -> &ResourceDescriptor {
        &self.body.resource
    }

    pub fn ability(&self) -> &Ability {
        &self.body.ability
    }

    pub fn nonce(&self) -> &NetworkNonce {
        &self.body.nonce
    }

    pub fn issued_at(&self) -> i64 {
        self.body.issued_at
    }

    pub fn expires_at(&self) -> i64 {
        self.body.expires_at
    }

    /// The signed text, re-rendered from the fields.
    pub fn message(&self) -> String {
        self.body.message()
    }

    /// Signature covers the message and was made by the claimed wallet.
    pub fn verify_signature(&self) -> Result<()> {
        let signer = self.signature.signer_address();
        if signer != self.body.wallet_address {
            return Err(AuthorizationError::InvalidSignature(format!(
                "signed by {signer}, claims {}",
                self.body.wallet_address
            )));
        }
        if !self.signature.verify(&self.message(), &self.body.wallet_address) {
            return Err(AuthorizationError::InvalidSignature(
                "signature does not cover delegation".into(),
            ));
        }
        Ok(())
    }

    /// Ability and resource name exactly one decryption.
    pub fn verify_scope(&self) -> Result<()> {
        if !self.body.ability.is_decryption() {
            return Err(AuthorizationError::ScopeMismatch(format!(
                "ability {} is not {}",
                self.body.ability,
                Ability::DECRYPTION
            )));
        }
        if self.body.resource.is_wildcard() {
            return Err(AuthorizationError::ScopeMismatch(
                "wildcard resource".into(),
            ));
        }
        Ok(())
    }

    /// `now` lies in `[issued_at, expires_at]`.
    pub fn is_active_at(&self, now: i64) -> bool {
        self.body.issued_at <= now && now <= self.body.expires_at
    }
}

/// Builds unsigned delegations with network-issued nonces.
pub struct CapabilityDelegationBuilder<N> {
    nonces: Arc<N>,
    clock: Arc<dyn Clock>,
    config: DelegationConfig,
}

impl<N: NonceSource> CapabilityDelegationBuilder<N> {
    pub fn new(nonces: Arc<N>, config: DelegationConfig) -> Self {
        Self {
            nonces,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &DelegationConfig {
        &self.config
    }

    /// Build a delegation for `wallet` to exercise `ability` on `resource`.
    ///
    /// `validity_window` may be negative, producing an already expired
    /// delegation. Fails with [`PolicyError::ScopeTooBroad`] for wildcard
    /// resources, any ability other than decryption, or a window above the
    /// configured maximum.
    pub async fn build(
        &self,
        wallet: WalletAddress,
        resource: ResourceDescriptor,
        ability: Ability,
        validity_window: Duration,
    ) -> Result<UnsignedDelegation> {
        if !ability.is_decryption() {
            return Err(PolicyError::ScopeTooBroad(format!("ability {ability} not allowed")).into());
        }
        if resource.is_wildcard() {
            return Err(PolicyError::ScopeTooBroad(format!("resource {resource}")).into());
        }
        if validity_window > self.config.max_validity {
            return Err(PolicyError::ScopeTooBroad(format!(
                "validity window {}s exceeds {}s",
                validity_window.num_seconds(),
                self.config.max_validity.num_seconds()
            ))
            .into());
        }

        let nonce = self.nonces.fetch_nonce().await?;
        let issued_at = self.clock.now_millis();
        let expires_at = issued_at.saturating_add(validity_window.num_milliseconds());

        debug!(wallet = %wallet, resource = %resource, expires_at, "built delegation");

        Ok(UnsignedDelegation {
            domain: self.config.domain.clone(),
            uri: self.config.uri.clone(),
            chain_id: self.config.chain_id,
            ability,
            resource,
            wallet_address: wallet,
            nonce,
            issued_at,
            expires_at,
        })
    }
}

fn rfc3339(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| millis.to_string())
}
