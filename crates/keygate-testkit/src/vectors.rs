//! Golden test vectors for deterministic verification.
//!
//! The canonical policy bytes, the policy hash and the envelope CID are all
//! part of the wire format: a binding made by one implementation must verify
//! in another. These vectors pin them down.

use keygate_core::{
    encode_policy, policy_hash, single_address_policy, AccessPolicy, Blake3Hash, BindingHash,
    Chain, Comparator, PolicyClause,
};
use keygate_store::Envelope;

/// A golden policy encoding.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Builds the policy under test.
    pub policy: fn() -> AccessPolicy,
    /// Expected canonical JSON.
    pub expected_json: &'static str,
    /// Expected BLAKE3 of the canonical JSON (hex).
    pub expected_hash: &'static str,
}

/// Address used by the single-address vector.
pub const VECTOR_ADDRESS: &str = "0x00000000000000000000000000000000000000a1";

/// NFT contract used by the compound vector.
pub const VECTOR_CONTRACT: &str = "0x1111111111111111111111111111111111111111";

fn single_address() -> AccessPolicy {
    single_address_policy(Chain::ethereum(), VECTOR_ADDRESS)
}

fn nft_and_balance() -> AccessPolicy {
    AccessPolicy::new(vec![PolicyClause::nft_owner(
        Chain::new("polygon"),
        VECTOR_CONTRACT,
        42,
    )])
    .and(PolicyClause::native_balance(
        Chain::new("polygon"),
        Comparator::Gte,
        1_000_000_000_000_000_000,
    ))
}

/// Get all golden policy vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "single wallet address",
            policy: single_address,
            expected_json: concat!(
                r#"[{"contractAddress":"","standardContractType":"","chain":"ethereum","#,
                r#""method":"","parameters":[":userAddress"],"#,
                r#""returnValueTest":{"comparator":"=","value":"0x00000000000000000000000000000000000000a1"}}]"#,
            ),
            expected_hash: "6353bb4ba219851eb13fb19c29e464586cc1a274de40cef05cadb34276305482",
        },
        GoldenVector {
            name: "nft owner and native balance",
            policy: nft_and_balance,
            expected_json: concat!(
                r#"[{"contractAddress":"0x1111111111111111111111111111111111111111","#,
                r#""standardContractType":"ERC721","chain":"polygon","method":"ownerOf","#,
                r#""parameters":["42"],"returnValueTest":{"comparator":"=","value":":userAddress"}},"#,
                r#"{"contractAddress":"","standardContractType":"","chain":"polygon","#,
                r#""method":"eth_getBalance","parameters":[":userAddress","latest"],"#,
                r#""returnValueTest":{"comparator":">=","value":"1000000000000000000"}}]"#,
            ),
            expected_hash: "ebb19214725fb7b1c81f0bff402e502ad6a2439de932754ae1709b1f0acc296f",
        },
    ]
}

/// The envelope behind [`ENVELOPE_CID`].
pub fn golden_envelope() -> Envelope {
    Envelope::new(
        vec![1, 2, 3, 4],
        BindingHash::new(Blake3Hash::hash(b"hello"), [0x11; 32]),
        single_address(),
    )
    .with_file_name("hello.txt")
    .with_content_type("text/plain")
}

/// Expected CID of [`golden_envelope`].
pub const ENVELOPE_CID: &str = "bagaaihra4vezbhzjwa5prmbe7os6okqkedzfbtockpy227zh44mv2b3hqbma";

/// Check every vector; returns `(name, matches, actual hash)` per vector.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|v| {
            let policy = (v.policy)();
            let json = encode_policy(&policy).map(String::from_utf8);
            let hash = policy_hash(&policy).map(|h| h.to_hex()).unwrap_or_default();

            let matches = matches!(json, Ok(Ok(ref j)) if j == v.expected_json)
                && hash == v.expected_hash;
            (v.name.to_string(), matches, hash)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keygate_core::{decode_policy, ContentAddress};

    #[test]
    fn test_policy_vectors() {
        for vector in all_vectors() {
            let bytes = encode_policy(&(vector.policy)()).unwrap();
            assert_eq!(
                std::str::from_utf8(&bytes).unwrap(),
                vector.expected_json,
                "Vector '{}' encoded differently",
                vector.name
            );
        }

        for (name, matches, hash) in verify_all_vectors() {
            assert!(matches, "Vector '{name}' hashed to {hash}");
        }
    }

    #[test]
    fn test_vectors_decode_to_same_policy() {
        for vector in all_vectors() {
            let decoded = decode_policy(vector.expected_json.as_bytes()).unwrap();
            assert_eq!(decoded, (vector.policy)(), "Vector '{}'", vector.name);
        }
    }

    #[test]
    fn test_envelope_cid() {
        let envelope = golden_envelope();
        let cid = envelope.content_address().unwrap();

        assert_eq!(cid.to_cid(), ENVELOPE_CID);
        assert_eq!(ContentAddress::parse(ENVELOPE_CID).unwrap(), cid);
    }

    #[test]
    fn test_envelope_json_field_names() {
        let json: serde_json::Value =
            serde_json::from_slice(&golden_envelope().to_json_bytes().unwrap()).unwrap();

        assert_eq!(json["cipherText"], "AQIDBA==");
        assert_eq!(
            json["dataToEncryptHash"],
            format!("{}{}", Blake3Hash::hash(b"hello").to_hex(), hex::encode([0x11; 32]))
        );
        assert_eq!(json["accessControlConditions"][0]["chain"], "ethereum");
        assert_eq!(json["fileName"], "hello.txt");
        assert_eq!(json["contentType"], "text/plain");
    }
}
