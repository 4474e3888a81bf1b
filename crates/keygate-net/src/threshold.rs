//! Threshold encryption over Ristretto.
//!
//! A labelled threshold ElGamal KEM in the style of TDH2, with a
//! ChaCha20-Poly1305 body:
//!
//! - The network secret `x` is Shamir-shared; node `i` holds `x_i` and
//!   publishes `h_i = x_i·G`. The network public key is `h = x·G`.
//! - A ciphertext carries `u = r·G`, `ū = r·Ḡ` and a proof `(e, f)` that both
//!   use the same `r`, bound to a 32-byte label. Nodes refuse to release a
//!   share for a ciphertext whose proof fails under the expected label, so a
//!   ciphertext cannot be replayed under a different policy.
//! - A decryption share is `u_i = x_i·u` plus a Chaum-Pedersen proof that
//!   `log_G h_i = log_u u_i`.
//! - Any `t` valid shares recombine to `x·u = r·h` by Lagrange interpolation.

use std::sync::OnceLock;

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use keygate_auth::{EncryptionKey, EncryptionNonce};
use keygate_core::Blake3Hash;

/// Errors from the threshold scheme.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThresholdError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("invalid group element")]
    InvalidPoint,

    #[error("invalid scalar")]
    InvalidScalar,

    #[error("proof does not verify")]
    InvalidProof,

    #[error("not enough shares: need {needed}, got {got}")]
    NotEnoughShares { needed: usize, got: usize },

    #[error("ciphertext failed authentication")]
    Integrity,

    #[error("encoding error: {0}")]
    Encoding(String),
}

type Result<T> = std::result::Result<T, ThresholdError>;

// ─────────────────────────────────────────────────────────────────────────────
// Encodings
// ─────────────────────────────────────────────────────────────────────────────

/// A compressed Ristretto point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PointBytes(pub [u8; 32]);

impl PointBytes {
    fn from_point(point: &RistrettoPoint) -> Self {
        Self(point.compress().to_bytes())
    }

    fn decompress(&self) -> Result<RistrettoPoint> {
        CompressedRistretto(self.0)
            .decompress()
            .ok_or(ThresholdError::InvalidPoint)
    }
}

/// A canonical scalar encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarBytes(pub [u8; 32]);

impl ScalarBytes {
    fn from_scalar(scalar: &Scalar) -> Self {
        Self(scalar.to_bytes())
    }

    fn to_scalar(self) -> Result<Scalar> {
        Option::<Scalar>::from(Scalar::from_canonical_bytes(self.0))
            .ok_or(ThresholdError::InvalidScalar)
    }
}

fn random_scalar() -> Scalar {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut bytes);
    Scalar::from_bytes_mod_order_wide(&bytes)
}

fn hash_to_scalar(context: &str, parts: &[&[u8]]) -> Scalar {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    let mut wide = [0u8; 64];
    hasher.finalize_xof().fill(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Second generator with unknown discrete log relative to `G`.
fn g_bar() -> &'static RistrettoPoint {
    static G_BAR: OnceLock<RistrettoPoint> = OnceLock::new();
    G_BAR.get_or_init(|| {
        let mut wide = [0u8; 64];
        blake3::Hasher::new_derive_key("keygate/tdh2-generator/v0")
            .finalize_xof()
            .fill(&mut wide);
        RistrettoPoint::from_uniform_bytes(&wide)
    })
}

fn kem_key(shared: &RistrettoPoint, label: &Blake3Hash) -> EncryptionKey {
    let digest = Blake3Hash::derive(
        "keygate/tdh2-kem/v0",
        &[shared.compress().as_bytes(), label.as_bytes()],
    );
    EncryptionKey::from_bytes(*digest.as_bytes())
}

// ─────────────────────────────────────────────────────────────────────────────
// Key material
// ─────────────────────────────────────────────────────────────────────────────

/// Public side of the network key: what every client and node may know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeySet {
    pub threshold: u32,
    pub public_key: PointBytes,
    /// `verification_keys[i - 1]` belongs to the share with index `i`.
    pub verification_keys: Vec<PointBytes>,
}

impl PublicKeySet {
    pub fn threshold(&self) -> usize {
        self.threshold as usize
    }

    pub fn total(&self) -> usize {
        self.verification_keys.len()
    }

    pub fn verification_key(&self, index: u32) -> Option<&PointBytes> {
        index
            .checked_sub(1)
            .and_then(|i| self.verification_keys.get(i as usize))
    }

    /// Check a decryption share was honestly derived from `ciphertext`.
    pub fn verify_share(
        &self,
        share: &DecryptionShare,
        ciphertext: &ThresholdCiphertext,
    ) -> Result<()> {
        let h_i = self
            .verification_key(share.index)
            .ok_or_else(|| ThresholdError::InvalidParameters(format!("no share {}", share.index)))?
            .decompress()?;
        let u = ciphertext.u.decompress()?;
        let u_i = share.point.decompress()?;
        let c = share.proof.c.to_scalar()?;
        let z = share.proof.z.to_scalar()?;

        let a1 = RISTRETTO_BASEPOINT_POINT * z - h_i * c;
        let a2 = u * z - u_i * c;

        if dleq_challenge(share.index, &h_i, &u, &u_i, &a1, &a2) != c {
            return Err(ThresholdError::InvalidProof);
        }
        Ok(())
    }
}

/// One node's Shamir share of the network secret.
pub struct KeyShare {
    index: u32,
    secret: Scalar,
}

impl KeyShare {
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Public verification key `x_i·G`.
    pub fn verification_key(&self) -> PointBytes {
        PointBytes::from_point(&(RISTRETTO_BASEPOINT_POINT * self.secret))
    }

    /// Derive this node's share for `ciphertext`.
    ///
    /// Fails if the ciphertext proof does not hold under `label`.
    pub fn decryption_share(
        &self,
        ciphertext: &ThresholdCiphertext,
        label: &Blake3Hash,
    ) -> Result<DecryptionShare> {
        ciphertext.verify(label)?;

        let u = ciphertext.u.decompress()?;
        let u_i = u * self.secret;
        let h_i = RISTRETTO_BASEPOINT_POINT * self.secret;

        let k = random_scalar();
        let a1 = RISTRETTO_BASEPOINT_POINT * k;
        let a2 = u * k;
        let c = dleq_challenge(self.index, &h_i, &u, &u_i, &a1, &a2);
        let z = k + c * self.secret;

        Ok(DecryptionShare {
            index: self.index,
            point: PointBytes::from_point(&u_i),
            proof: DleqProof {
                c: ScalarBytes::from_scalar(&c),
                z: ScalarBytes::from_scalar(&z),
            },
        })
    }
}

impl std::fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyShare(index={})", self.index)
    }
}

/// Trusted-dealer setup for development and test networks.
///
/// The dealer sees the full secret while dealing and must discard it.
pub struct KeyCeremony;

impl KeyCeremony {
    /// Deal a `threshold`-of-`total` sharing of a fresh secret.
    pub fn deal(threshold: usize, total: usize) -> Result<(PublicKeySet, Vec<KeyShare>)> {
        if threshold == 0 || threshold > total {
            return Err(ThresholdError::InvalidParameters(format!(
                "threshold {threshold} of {total}"
            )));
        }
        let threshold_u32 = u32::try_from(threshold)
            .map_err(|_| ThresholdError::InvalidParameters("threshold too large".into()))?;
        let total_u32 = u32::try_from(total)
            .map_err(|_| ThresholdError::InvalidParameters("too many shares".into()))?;

        let coefficients: Vec<Scalar> = (0..threshold).map(|_| random_scalar()).collect();
        let public_key = RISTRETTO_BASEPOINT_POINT * coefficients[0];

        let shares: Vec<KeyShare> = (1..=total_u32)
            .map(|index| KeyShare {
                index,
                secret: evaluate_polynomial(&coefficients, index),
            })
            .collect();

        let keys = PublicKeySet {
            threshold: threshold_u32,
            public_key: PointBytes::from_point(&public_key),
            verification_keys: shares.iter().map(KeyShare::verification_key).collect(),
        };
        Ok((keys, shares))
    }
}

fn evaluate_polynomial(coefficients: &[Scalar], x: u32) -> Scalar {
    let x = Scalar::from(u64::from(x));
    coefficients
        .iter()
        .rev()
        .fold(Scalar::ZERO, |acc, coefficient| acc * x + coefficient)
}

// ─────────────────────────────────────────────────────────────────────────────
// Ciphertexts and shares
// ─────────────────────────────────────────────────────────────────────────────

/// A labelled threshold ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdCiphertext {
    pub u: PointBytes,
    pub u_bar: PointBytes,
    pub e: ScalarBytes,
    pub f: ScalarBytes,
    pub nonce: EncryptionNonce,
    pub body: Vec<u8>,
}

impl ThresholdCiphertext {
    /// Check the ciphertext is well formed and bound to `label`.
    pub fn verify(&self, label: &Blake3Hash) -> Result<()> {
        let u = self.u.decompress()?;
        let u_bar = self.u_bar.decompress()?;
        let e = self.e.to_scalar()?;
        let f = self.f.to_scalar()?;

        let w = RISTRETTO_BASEPOINT_POINT * f - u * e;
        let w_bar = g_bar() * f - u_bar * e;

        if ciphertext_challenge(label, &self.u, &self.u_bar, &self.nonce, &self.body, &w, &w_bar) != e {
            return Err(ThresholdError::InvalidProof);
        }
        Ok(())
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| ThresholdError::Encoding(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| ThresholdError::Encoding(e.to_string()))
    }
}

/// Chaum-Pedersen proof of equal discrete logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DleqProof {
    pub c: ScalarBytes,
    pub z: ScalarBytes,
}

/// A node's contribution to decrypting one ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionShare {
    pub index: u32,
    pub point: PointBytes,
    pub proof: DleqProof,
}

/// Encrypt `plaintext` to the network under `label`.
pub fn encrypt(
    keys: &PublicKeySet,
    label: &Blake3Hash,
    plaintext: &[u8],
) -> Result<ThresholdCiphertext> {
    let h = keys.public_key.decompress()?;
    let r = random_scalar();
    let s = random_scalar();

    let u = PointBytes::from_point(&(RISTRETTO_BASEPOINT_POINT * r));
    let u_bar = PointBytes::from_point(&(g_bar() * r));
    let w = RISTRETTO_BASEPOINT_POINT * s;
    let w_bar = g_bar() * s;

    let nonce = EncryptionNonce::generate();
    let body = kem_key(&(h * r), label)
        .encrypt(plaintext, label.as_bytes(), &nonce)
        .map_err(|_| ThresholdError::Integrity)?;

    let e = ciphertext_challenge(label, &u, &u_bar, &nonce, &body, &w, &w_bar);
    let f = s + r * e;

    Ok(ThresholdCiphertext {
        u,
        u_bar,
        e: ScalarBytes::from_scalar(&e),
        f: ScalarBytes::from_scalar(&f),
        nonce,
        body,
    })
}

/// Recombine `threshold` verified shares and open the body.
///
/// Shares must already have passed [`PublicKeySet::verify_share`]. Extra
/// shares beyond the threshold are ignored.
pub fn combine(
    keys: &PublicKeySet,
    ciphertext: &ThresholdCiphertext,
    label: &Blake3Hash,
    shares: &[DecryptionShare],
) -> Result<Vec<u8>> {
    let needed = keys.threshold();
    let mut selected: Vec<&DecryptionShare> = Vec::with_capacity(needed);
    for share in shares {
        if selected.len() == needed {
            break;
        }
        if !selected.iter().any(|s| s.index == share.index) {
            selected.push(share);
        }
    }
    if selected.len() < needed {
        return Err(ThresholdError::NotEnoughShares {
            needed,
            got: selected.len(),
        });
    }

    let indices: Vec<u32> = selected.iter().map(|s| s.index).collect();
    let mut shared = RistrettoPoint::identity();
    for share in &selected {
        shared += share.point.decompress()? * lagrange_at_zero(share.index, &indices);
    }

    kem_key(&shared, label)
        .decrypt(&ciphertext.body, label.as_bytes(), &ciphertext.nonce)
        .map_err(|_| ThresholdError::Integrity)
}

fn lagrange_at_zero(index: u32, indices: &[u32]) -> Scalar {
    let x_i = Scalar::from(u64::from(index));
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;
    for &j in indices.iter().filter(|&&j| j != index) {
        let x_j = Scalar::from(u64::from(j));
        numerator *= x_j;
        denominator *= x_j - x_i;
    }
    numerator * denominator.invert()
}

fn ciphertext_challenge(
    label: &Blake3Hash,
    u: &PointBytes,
    u_bar: &PointBytes,
    nonce: &EncryptionNonce,
    body: &[u8],
    w: &RistrettoPoint,
    w_bar: &RistrettoPoint,
) -> Scalar {
    hash_to_scalar(
        "keygate/tdh2-challenge/v0",
        &[
            label.as_bytes(),
            &u.0,
            &u_bar.0,
            nonce.as_bytes(),
            Blake3Hash::hash(body).as_bytes(),
            w.compress().as_bytes(),
            w_bar.compress().as_bytes(),
        ],
    )
}

fn dleq_challenge(
    index: u32,
    h_i: &RistrettoPoint,
    u: &RistrettoPoint,
    u_i: &RistrettoPoint,
    a1: &RistrettoPoint,
    a2: &RistrettoPoint,
) -> Scalar {
    hash_to_scalar(
        "keygate/tdh2-dleq/v0",
        &[
            &index.to_le_bytes(),
            h_i.compress().as_bytes(),
            u.compress().as_bytes(),
            u_i.compress().as_bytes(),
            a1.compress().as_bytes(),
            a2.compress().as_bytes(),
        ],
    )
}
