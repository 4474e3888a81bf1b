//! Secrets shared by the key nodes and the tags derived from them.
//!
//! Every node holds the same [`NetworkSecret`]. It keys two MACs:
//!
//! - the binding tag over `canonical policy || data hash`, which makes a
//!   [`BindingHash`] something only the network can mint;
//! - the nonce tag, which lets any node recognise a nonce issued by any
//!   other node without coordination.

use rand::RngCore;

use keygate_auth::NetworkNonce;
use keygate_core::{Blake3Hash, BindingHash};

const NONCE_LEN: usize = 8 + 16 + 16;

/// Secret shared by all key nodes. Never leaves a node.
#[derive(Clone)]
pub struct NetworkSecret {
    binding_key: [u8; 32],
    nonce_key: [u8; 32],
}

/// Why a nonce was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceFault {
    /// Not produced by this network.
    Forged,
    /// Issued too long ago, or in the future.
    Stale,
}

impl NetworkSecret {
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            binding_key: blake3::derive_key("keygate/binding-key/v0", &seed),
            nonce_key: blake3::derive_key("keygate/nonce-key/v0", &seed),
        }
    }

    /// Tag committing `data_hash` to `canonical_policy`.
    pub fn binding_tag(&self, canonical_policy: &[u8], data_hash: &Blake3Hash) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new_keyed(&self.binding_key);
        hasher.update(&(canonical_policy.len() as u64).to_le_bytes());
        hasher.update(canonical_policy);
        hasher.update(data_hash.as_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Whether `binding` was minted by this network for `canonical_policy`.
    pub fn verify_binding(&self, canonical_policy: &[u8], binding: &BindingHash) -> bool {
        let expected = self.binding_tag(canonical_policy, &binding.data_hash());
        // blake3::Hash comparison is constant time
        blake3::Hash::from(expected) == blake3::Hash::from(binding.tag())
    }

    /// Issue a fresh nonce stamped with `now_millis`.
    pub fn issue_nonce(&self, now_millis: i64) -> NetworkNonce {
        let mut body = [0u8; NONCE_LEN];
        body[..8].copy_from_slice(&now_millis.to_be_bytes());
        rand::thread_rng().fill_bytes(&mut body[8..24]);
        let tag = self.nonce_tag(&body[..24]);
        body[24..].copy_from_slice(&tag);
        NetworkNonce(hex::encode(body))
    }

    /// Check a nonce came from this network and is within `ttl_millis` of `now_millis`.
    ///
    /// Nonces stamped up to `skew_millis` in the future are accepted.
    pub fn verify_nonce(
        &self,
        nonce: &NetworkNonce,
        now_millis: i64,
        ttl_millis: i64,
        skew_millis: i64,
    ) -> Result<i64, NonceFault> {
        let bytes = hex::decode(nonce.as_str()).map_err(|_| NonceFault::Forged)?;
        if bytes.len() != NONCE_LEN {
            return Err(NonceFault::Forged);
        }

        let expected = self.nonce_tag(&bytes[..24]);
        let mut tag = [0u8; 16];
        tag.copy_from_slice(&bytes[24..]);
        if !constant_time_eq(&expected, &tag) {
            return Err(NonceFault::Forged);
        }

        let mut stamp = [0u8; 8];
        stamp.copy_from_slice(&bytes[..8]);
        let issued_at = i64::from_be_bytes(stamp);

        if issued_at > now_millis.saturating_add(skew_millis)
            || now_millis.saturating_sub(issued_at) > ttl_millis
        {
            return Err(NonceFault::Stale);
        }
        Ok(issued_at)
    }

    fn nonce_tag(&self, body: &[u8]) -> [u8; 16] {
        let full = blake3::keyed_hash(&self.nonce_key, body);
        let mut out = [0u8; 16];
        out.copy_from_slice(&full.as_bytes()[..16]);
        out
    }
}

impl std::fmt::Debug for NetworkSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NetworkSecret(..)")
    }
}

fn constant_time_eq(a: &[u8; 16], b: &[u8; 16]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Label a ciphertext is bound to: its binding hash and canonical policy.
pub fn document_label(binding: &BindingHash, canonical_policy: &[u8]) -> Blake3Hash {
    Blake3Hash::derive("keygate/label/v0", &[binding.as_bytes(), canonical_policy])
}
