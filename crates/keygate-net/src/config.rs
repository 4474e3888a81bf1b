//! Client and node configuration.

use std::time::Duration;

/// Configuration for talking to the key network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Number of agreeing nodes needed for any operation.
    pub threshold: usize,
    /// Deadline for one quorum round (bind, authorize, decrypt).
    pub request_timeout: Duration,
    /// Deadline for the connect handshake.
    pub handshake_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            threshold: 2,
            request_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl NetworkConfig {
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

/// Configuration for a key node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNodeConfig {
    /// How long an issued nonce stays usable.
    pub nonce_ttl: Duration,
    /// Tolerated clock difference between nodes and clients.
    pub clock_skew: Duration,
}

impl Default for KeyNodeConfig {
    fn default() -> Self {
        Self {
            nonce_ttl: Duration::from_secs(5 * 60),
            clock_skew: Duration::from_secs(30),
        }
    }
}

impl KeyNodeConfig {
    pub fn with_nonce_ttl(mut self, ttl: Duration) -> Self {
        self.nonce_ttl = ttl;
        self
    }

    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    pub(crate) fn nonce_ttl_millis(&self) -> i64 {
        i64::try_from(self.nonce_ttl.as_millis()).unwrap_or(i64::MAX)
    }

    pub(crate) fn clock_skew_millis(&self) -> i64 {
        i64::try_from(self.clock_skew.as_millis()).unwrap_or(i64::MAX)
    }
}
