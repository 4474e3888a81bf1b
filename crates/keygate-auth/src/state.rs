//! Decryption flow state machine.
//!
//! One flow per decryption attempt:
//!
//! ```text
//! Idle -> DelegationBuilt -> DelegationSigned -> SessionRequested
//!      -> SessionEstablished -> DecryptionInFlight -> Decrypted | DecryptionFailed
//! ```
//!
//! A rejected session request ends in `AuthorizationFailed`, except that a
//! nonce failure may send the flow back to `DelegationBuilt` exactly once.
//! A wallet refusing to sign also ends in `AuthorizationFailed`, as does a
//! delegation that could not be built (no nonce from the network).

use tracing::debug;

use crate::error::{AuthorizationError, Result};

/// Number of times a flow may rebuild its delegation after a nonce failure.
pub const MAX_NONCE_RETRIES: u8 = 1;

/// Where a decryption flow is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowState {
    Idle,
    DelegationBuilt,
    DelegationSigned,
    SessionRequested,
    SessionEstablished,
    DecryptionInFlight,
    Decrypted,
    DecryptionFailed,
    AuthorizationFailed,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowState::Decrypted | FlowState::DecryptionFailed | FlowState::AuthorizationFailed
        )
    }

    fn allows(&self, to: FlowState) -> bool {
        use FlowState::*;
        matches!(
            (self, to),
            (Idle, DelegationBuilt)
                | (Idle, AuthorizationFailed)
                | (DelegationBuilt, DelegationSigned)
                | (DelegationBuilt, AuthorizationFailed)
                | (DelegationSigned, SessionRequested)
                | (SessionRequested, SessionEstablished)
                | (SessionRequested, AuthorizationFailed)
                | (SessionRequested, DelegationBuilt)
                | (SessionEstablished, DecryptionInFlight)
                | (DecryptionInFlight, Decrypted)
                | (DecryptionInFlight, DecryptionFailed)
        )
    }
}

/// Tracks one decryption attempt and rejects out-of-order steps.
#[derive(Debug)]
pub struct DecryptionFlow {
    state: FlowState,
    nonce_retries: u8,
}

impl Default for DecryptionFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl DecryptionFlow {
    pub fn new() -> Self {
        Self {
            state: FlowState::Idle,
            nonce_retries: 0,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn nonce_retries(&self) -> u8 {
        self.nonce_retries
    }

    /// Whether the flow may still go back for a fresh nonce.
    pub fn can_retry_nonce(&self) -> bool {
        self.state == FlowState::SessionRequested && self.nonce_retries < MAX_NONCE_RETRIES
    }

    /// Move to `to`, or fail with [`AuthorizationError::InvalidTransition`].
    pub fn transition(&mut self, to: FlowState) -> Result<()> {
        let from = self.state;
        let is_retry = from == FlowState::SessionRequested && to == FlowState::DelegationBuilt;

        if !from.allows(to) || (is_retry && self.nonce_retries >= MAX_NONCE_RETRIES) {
            return Err(AuthorizationError::InvalidTransition { from, to });
        }

        if is_retry {
            self.nonce_retries += 1;
        }
        debug!(?from, ?to, "decryption flow transition");
        self.state = to;
        Ok(())
    }
}
