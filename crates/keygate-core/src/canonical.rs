//! Canonical policy encoding.
//!
//! Policies travel as a JSON array of access control conditions:
//!
//! ```json
//! [{
//!   "contractAddress": "",
//!   "standardContractType": "",
//!   "chain": "ethereum",
//!   "method": "",
//!   "parameters": [":userAddress"],
//!   "returnValueTest": { "comparator": "=", "value": "0x..." }
//! }]
//! ```
//!
//! Field order is fixed by the wire structs below and serde_json emits no
//! insignificant whitespace, so the same policy always encodes to the same
//! bytes. The policy hash and the binding tag are computed over these bytes.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::Blake3Hash;
use crate::error::{PolicyError, Result};
use crate::policy::{
    AccessPolicy, Chain, Comparator, Parameter, PolicyClause, PredicateMethod, ResourceKind,
};

/// Wire form of one clause. Field order is part of the format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCondition {
    contract_address: String,
    standard_contract_type: String,
    chain: String,
    method: String,
    parameters: Vec<String>,
    return_value_test: WireReturnValueTest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireReturnValueTest {
    comparator: String,
    value: String,
}

impl From<&PolicyClause> for WireCondition {
    fn from(clause: &PolicyClause) -> Self {
        Self {
            contract_address: clause.resource_ref.clone(),
            standard_contract_type: clause.resource_kind.as_str().to_string(),
            chain: clause.chain.as_str().to_string(),
            method: clause.predicate_method.as_str().to_string(),
            parameters: clause
                .parameters
                .iter()
                .map(|p| p.as_wire().to_string())
                .collect(),
            return_value_test: WireReturnValueTest {
                comparator: clause.comparator.as_str().to_string(),
                value: clause.expected_value.as_wire().to_string(),
            },
        }
    }
}

impl TryFrom<WireCondition> for PolicyClause {
    type Error = PolicyError;

    fn try_from(wire: WireCondition) -> Result<Self> {
        let resource_kind = ResourceKind::parse(&wire.standard_contract_type).ok_or_else(|| {
            PolicyError::MalformedPolicy(format!(
                "unknown standardContractType {:?}",
                wire.standard_contract_type
            ))
        })?;
        let comparator = Comparator::parse(&wire.return_value_test.comparator).ok_or_else(|| {
            PolicyError::MalformedPolicy(format!(
                "unknown comparator {:?}",
                wire.return_value_test.comparator
            ))
        })?;
        let parameters = wire
            .parameters
            .iter()
            .map(|p| parse_wire_parameter(p))
            .collect::<Result<Vec<_>>>()?;
        let expected_value = parse_wire_parameter(&wire.return_value_test.value)?;

        Ok(PolicyClause {
            resource_ref: wire.contract_address,
            resource_kind,
            chain: Chain::new(wire.chain),
            predicate_method: PredicateMethod::new(wire.method),
            parameters,
            comparator,
            expected_value,
        })
    }
}

fn parse_wire_parameter(s: &str) -> Result<Parameter> {
    Parameter::parse(s).map_err(|e| match e {
        PolicyError::InvalidPolicy(msg) => PolicyError::MalformedPolicy(msg),
        other => other,
    })
}

impl Serialize for AccessPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let wire: Vec<WireCondition> = self.clauses().iter().map(WireCondition::from).collect();
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AccessPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = Vec::<WireCondition>::deserialize(deserializer)?;
        let clauses = wire
            .into_iter()
            .map(PolicyClause::try_from)
            .collect::<Result<Vec<_>>>()
            .map_err(serde::de::Error::custom)?;
        Ok(AccessPolicy::new(clauses))
    }
}

/// Encode a policy to its canonical bytes.
///
/// The policy must validate: non-empty, supported chains and methods, and
/// well-shaped clauses.
pub fn encode_policy(policy: &AccessPolicy) -> Result<Vec<u8>> {
    policy.validate()?;
    serde_json::to_vec(policy).map_err(|e| PolicyError::InvalidPolicy(e.to_string()))
}

/// Decode canonical bytes back into a policy.
///
/// Only the schema is checked here. Whether the network can evaluate the
/// policy is a separate question answered by [`AccessPolicy::validate`].
pub fn decode_policy(bytes: &[u8]) -> Result<AccessPolicy> {
    serde_json::from_slice(bytes).map_err(|e| PolicyError::MalformedPolicy(e.to_string()))
}

/// BLAKE3 of the canonical encoding.
pub fn policy_hash(policy: &AccessPolicy) -> Result<Blake3Hash> {
    Ok(Blake3Hash::hash(&encode_policy(policy)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::single_address_policy;

    const ADDRESS: &str = "0x29fb8276dda3fe8a841552ca6bf7518d0fa9ee25";

    #[test]
    fn test_canonical_encoding_deterministic() {
        let policy = single_address_policy(Chain::ethereum(), ADDRESS);
        let a = encode_policy(&policy).unwrap();
        let b = encode_policy(&policy.clone()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wire_field_order() {
        let policy = single_address_policy(Chain::ethereum(), ADDRESS);
        let encoded = String::from_utf8(encode_policy(&policy).unwrap()).unwrap();
        let expected = format!(
            concat!(
                r#"[{{"contractAddress":"","standardContractType":"","chain":"ethereum","#,
                r#""method":"","parameters":[":userAddress"],"#,
                r#""returnValueTest":{{"comparator":"=","value":"{}"}}}}]"#
            ),
            ADDRESS
        );
        assert_eq!(encoded, expected);
    }

    #[test]
    fn test_roundtrip() {
        let policy = single_address_policy(Chain::new("sepolia"), ADDRESS)
            .and(PolicyClause::native_balance(Chain::ethereum(), Comparator::Gte, 1_000))
            .and(PolicyClause::nft_owner(Chain::new("base"), "0xfeed", 7));

        let decoded = decode_policy(&encode_policy(&policy).unwrap()).unwrap();
        assert_eq!(decoded, policy);
    }

    #[test]
    fn test_encode_rejects_unsupported() {
        let policy = single_address_policy(Chain::new("solana"), ADDRESS);
        assert!(matches!(encode_policy(&policy), Err(PolicyError::InvalidPolicy(_))));
        assert!(matches!(
            encode_policy(&AccessPolicy::new(vec![])),
            Err(PolicyError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn test_decode_rejects_schema_violations() {
        let cases: &[&[u8]] = &[
            b"not json",
            b"{}",
            br#"[{"chain":"ethereum"}]"#,
            br#"[{"contractAddress":"","standardContractType":"","chain":"ethereum","method":"","parameters":[":userAddress"],"returnValueTest":{"comparator":"~","value":"0x01"}}]"#,
            br#"[{"contractAddress":"","standardContractType":"","chain":"ethereum","method":"","parameters":[":walletBalance"],"returnValueTest":{"comparator":"=","value":"0x01"}}]"#,
            br#"[{"contractAddress":"","standardContractType":"ERC9999","chain":"ethereum","method":"","parameters":[":userAddress"],"returnValueTest":{"comparator":"=","value":"0x01"}}]"#,
        ];

        for case in cases {
            assert!(
                matches!(decode_policy(case), Err(PolicyError::MalformedPolicy(_))),
                "expected MalformedPolicy for {}",
                String::from_utf8_lossy(case)
            );
        }
    }

    #[test]
    fn test_policy_hash_distinguishes_policies() {
        let a = policy_hash(&single_address_policy(Chain::ethereum(), "0x01")).unwrap();
        let b = policy_hash(&single_address_policy(Chain::ethereum(), "0x02")).unwrap();
        assert_ne!(a, b);
    }
}
