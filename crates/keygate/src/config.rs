//! Top-level configuration.
//!
//! Values can be set in code or read from `KEYGATE_*` environment
//! variables:
//!
//! | Variable                         | Field                              |
//! |----------------------------------|------------------------------------|
//! | `KEYGATE_THRESHOLD`              | `network.threshold`                |
//! | `KEYGATE_REQUEST_TIMEOUT_MS`     | `network.request_timeout`          |
//! | `KEYGATE_HANDSHAKE_TIMEOUT_MS`   | `network.handshake_timeout`        |
//! | `KEYGATE_DOMAIN`                 | `delegation.domain`                |
//! | `KEYGATE_URI`                    | `delegation.uri`                   |
//! | `KEYGATE_CHAIN_ID`               | `delegation.chain_id`              |
//! | `KEYGATE_SESSION_VALIDITY_SECS`  | `delegation.default_validity`      |
//! | `KEYGATE_MAX_VALIDITY_SECS`      | `delegation.max_validity`          |
//! | `KEYGATE_GATEWAY_URL`            | `gateway.endpoint`                 |
//! | `KEYGATE_GATEWAY_API_KEY`        | `gateway.api_key`                  |

use std::str::FromStr;
use std::time::Duration;

use keygate_auth::DelegationConfig;
use keygate_net::NetworkConfig;
use keygate_store::GatewayConfig;

use crate::error::{KeygateError, Result};

/// Configuration for a Keygate client.
#[derive(Debug, Clone, Default)]
pub struct KeygateConfig {
    pub network: NetworkConfig,
    pub delegation: DelegationConfig,
    /// Pinning gateway. `None` when envelopes are stored elsewhere.
    pub gateway: Option<GatewayConfig>,
}

impl KeygateConfig {
    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    pub fn with_delegation(mut self, delegation: DelegationConfig) -> Self {
        self.delegation = delegation;
        self
    }

    pub fn with_gateway(mut self, gateway: GatewayConfig) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Defaults overridden by any `KEYGATE_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`KeygateConfig::from_env`], reading variables from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(threshold) = parse::<usize>(&lookup, "KEYGATE_THRESHOLD")? {
            if threshold == 0 {
                return Err(KeygateError::Config("KEYGATE_THRESHOLD must be at least 1".into()));
            }
            config.network.threshold = threshold;
        }
        if let Some(ms) = parse::<u64>(&lookup, "KEYGATE_REQUEST_TIMEOUT_MS")? {
            config.network.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&lookup, "KEYGATE_HANDSHAKE_TIMEOUT_MS")? {
            config.network.handshake_timeout = Duration::from_millis(ms);
        }

        if let Some(domain) = lookup("KEYGATE_DOMAIN") {
            config.delegation.domain = domain;
        }
        if let Some(uri) = lookup("KEYGATE_URI") {
            config.delegation.uri = uri;
        }
        if let Some(chain_id) = parse::<u64>(&lookup, "KEYGATE_CHAIN_ID")? {
            config.delegation.chain_id = chain_id;
        }
        if let Some(validity) = parse_secs(&lookup, "KEYGATE_SESSION_VALIDITY_SECS")? {
            config.delegation.default_validity = validity;
        }
        if let Some(validity) = parse_secs(&lookup, "KEYGATE_MAX_VALIDITY_SECS")? {
            config.delegation.max_validity = validity;
        }

        if let Some(endpoint) = lookup("KEYGATE_GATEWAY_URL") {
            let mut gateway = GatewayConfig::new(endpoint);
            if let Some(api_key) = lookup("KEYGATE_GATEWAY_API_KEY") {
                gateway = gateway.with_api_key(api_key);
            }
            config.gateway = Some(gateway);
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| KeygateError::Config(format!("{name}: cannot parse {raw:?}"))),
    }
}

fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<chrono::Duration>> {
    match parse::<i64>(lookup, name)? {
        None => Ok(None),
        Some(secs) => chrono::Duration::try_seconds(secs)
            .map(Some)
            .ok_or_else(|| KeygateError::Config(format!("{name}: {secs} seconds is out of range"))),
    }
}
