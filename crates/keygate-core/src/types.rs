//! Strong type definitions for Keygate.
//!
//! All identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::crypto::Blake3Hash;
use crate::error::IdentifierError;

/// CIDv1 prefix: version 1, `json` multicodec (0x0200 as varint), BLAKE3 multihash, 32 bytes.
const CID_PREFIX: [u8; 5] = [0x01, 0x80, 0x04, 0x1e, 0x20];

/// Content address of a stored envelope.
///
/// Computed as BLAKE3 over the serialized envelope bytes and rendered as a
/// CIDv1 (multibase base32-lower, `b` prefix). Two identical envelopes always
/// have the same address.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentAddress(pub [u8; 32]);

impl ContentAddress {
    /// Address the given bytes.
    pub fn for_bytes(data: &[u8]) -> Self {
        Self(*Blake3Hash::hash(data).as_bytes())
    }

    /// Create from a raw digest.
    pub const fn from_digest(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    /// Get the raw digest.
    pub const fn digest(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check that `data` hashes to this address.
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::for_bytes(data) == *self
    }

    /// Render as a CIDv1 string.
    pub fn to_cid(&self) -> String {
        let mut cid_bytes = Vec::with_capacity(CID_PREFIX.len() + 32);
        cid_bytes.extend_from_slice(&CID_PREFIX);
        cid_bytes.extend_from_slice(&self.0);
        format!("b{}", base32_encode(&cid_bytes))
    }

    /// Parse a CIDv1 string produced by [`ContentAddress::to_cid`].
    pub fn parse(cid: &str) -> Result<Self, IdentifierError> {
        let body = cid
            .strip_prefix('b')
            .ok_or_else(|| IdentifierError::InvalidContentAddress("missing multibase prefix".into()))?;
        let bytes = base32_decode(body)
            .ok_or_else(|| IdentifierError::InvalidContentAddress("invalid base32".into()))?;
        if bytes.len() != CID_PREFIX.len() + 32 || bytes[..CID_PREFIX.len()] != CID_PREFIX {
            return Err(IdentifierError::InvalidContentAddress(
                "unsupported CID codec or hash".into(),
            ));
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes[CID_PREFIX.len()..]);
        Ok(Self(digest))
    }
}

impl fmt::Debug for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentAddress({})", self.to_cid())
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_cid())
    }
}

impl FromStr for ContentAddress {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Commitment linking a ciphertext to its policy, issued by the key network.
///
/// Layout: `data_hash (32) || tag (32)` where `data_hash` is BLAKE3 of the
/// plaintext and `tag` is a MAC over the canonical policy and `data_hash`
/// keyed with a secret only the key nodes hold. Rendered as 128 hex chars.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingHash(pub [u8; 64]);

impl BindingHash {
    /// Assemble from its two halves.
    pub fn new(data_hash: Blake3Hash, tag: [u8; 32]) -> Self {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(data_hash.as_bytes());
        bytes[32..].copy_from_slice(&tag);
        Self(bytes)
    }

    /// Hash of the plaintext this binding commits to.
    pub fn data_hash(&self) -> Blake3Hash {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0[..32]);
        Blake3Hash(out)
    }

    /// Network-issued tag.
    pub fn tag(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0[32..]);
        out
    }

    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, IdentifierError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 64 {
            return Err(IdentifierError::InvalidLength {
                expected: 64,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 64];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for BindingHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BindingHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for BindingHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for BindingHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BindingHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A 20-byte wallet address, rendered `0x`-prefixed lowercase hex.
///
/// Parsing is case-insensitive, so mixed-case checksummed input compares
/// equal to its lowercase form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WalletAddress(pub [u8; 20]);

impl WalletAddress {
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn parse(s: &str) -> Result<Self, IdentifierError> {
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| IdentifierError::InvalidAddress(s.to_string()))?;
        let bytes = hex::decode(body.to_ascii_lowercase())
            .map_err(|_| IdentifierError::InvalidAddress(s.to_string()))?;
        if bytes.len() != 20 {
            return Err(IdentifierError::InvalidAddress(s.to_string()));
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletAddress({})", self)
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for WalletAddress {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for WalletAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for WalletAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

// RFC 4648 Base32 encoding (lowercase, no padding)
fn base32_encode(data: &[u8]) -> String {
    let mut result = String::with_capacity((data.len() * 8 + 4) / 5);
    let mut buffer: u64 = 0;
    let mut bits = 0;

    for &byte in data {
        buffer = (buffer << 8) | byte as u64;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let index = ((buffer >> bits) & 0x1f) as usize;
            result.push(BASE32_ALPHABET[index] as char);
        }
    }

    if bits > 0 {
        let index = ((buffer << (5 - bits)) & 0x1f) as usize;
        result.push(BASE32_ALPHABET[index] as char);
    }

    result
}

fn base32_decode(s: &str) -> Option<Vec<u8>> {
    let mut result = Vec::with_capacity(s.len() * 5 / 8);
    let mut buffer: u64 = 0;
    let mut bits = 0;

    for c in s.bytes() {
        let value = BASE32_ALPHABET.iter().position(|&a| a == c)? as u64;
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            result.push(((buffer >> bits) & 0xff) as u8);
        }
    }

    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cid_format() {
        let address = ContentAddress::for_bytes(b"envelope");
        let cid = address.to_cid();

        assert!(cid.starts_with('b'));
        assert_eq!(cid, cid.to_lowercase());
        assert_eq!(ContentAddress::parse(&cid).unwrap(), address);
    }

    #[test]
    fn test_cid_rejects_foreign_prefix() {
        assert!(ContentAddress::parse("Qmfoo").is_err());
        assert!(ContentAddress::parse("bmzxw6ytboi").is_err());
    }

    #[test]
    fn test_base32_encode() {
        assert_eq!(base32_encode(b""), "");
        assert_eq!(base32_encode(b"f"), "my");
        assert_eq!(base32_encode(b"fo"), "mzxq");
        assert_eq!(base32_encode(b"foo"), "mzxw6");
        assert_eq!(base32_encode(b"foobar"), "mzxw6ytboi");
        assert_eq!(base32_decode("mzxw6ytboi").unwrap(), b"foobar");
    }

    #[test]
    fn test_binding_hash_hex_roundtrip() {
        let binding = BindingHash::new(Blake3Hash::hash(b"data"), [0x42; 32]);
        let recovered = BindingHash::from_hex(&binding.to_hex()).unwrap();

        assert_eq!(binding, recovered);
        assert_eq!(recovered.data_hash(), Blake3Hash::hash(b"data"));
        assert_eq!(recovered.tag(), [0x42; 32]);
    }

    #[test]
    fn test_wallet_address_case_insensitive() {
        let lower = WalletAddress::parse("0x29fb8276dda3fe8a841552ca6bf7518d0fa9ee25").unwrap();
        let mixed = WalletAddress::parse("0x29FB8276DdA3Fe8a841552CA6BF7518D0Fa9eE25").unwrap();

        assert_eq!(lower, mixed);
        assert_eq!(mixed.to_string(), "0x29fb8276dda3fe8a841552ca6bf7518d0fa9ee25");
        assert!(WalletAddress::parse("0xABC").is_err());
        assert!(WalletAddress::parse("29fb8276dda3fe8a841552ca6bf7518d0fa9ee25").is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_cid_parse_inverts_to_cid(digest in any::<[u8; 32]>()) {
                let address = ContentAddress(digest);
                prop_assert_eq!(ContentAddress::parse(&address.to_cid()).unwrap(), address);
            }

            #[test]
            fn test_address_parse_ignores_case(bytes in any::<[u8; 20]>()) {
                let lower = WalletAddress::from_bytes(bytes).to_string();
                let upper = format!("0x{}", lower[2..].to_ascii_uppercase());

                prop_assert_eq!(WalletAddress::parse(&upper).unwrap(), WalletAddress::from_bytes(bytes));
            }

            #[test]
            fn test_arbitrary_cids_never_panic(input in "\\PC{0,80}") {
                let _ = ContentAddress::parse(&input);
            }
        }
    }
}
