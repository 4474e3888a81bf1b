//! Proptest generators for property-based testing.

use proptest::prelude::*;

use keygate_core::policy::SUPPORTED_CHAINS;
use keygate_core::{
    single_address_policy, AccessPolicy, Chain, Comparator, LocalWallet, PolicyClause,
    ResourceKind, WalletAddress, WalletSigner,
};

/// Generate a deterministic wallet.
pub fn wallet() -> impl Strategy<Value = LocalWallet> {
    any::<[u8; 32]>().prop_map(LocalWallet::from_seed)
}

/// Generate a wallet address.
pub fn wallet_address() -> impl Strategy<Value = WalletAddress> {
    any::<[u8; 20]>().prop_map(WalletAddress::from_bytes)
}

/// Generate a contract address string.
pub fn contract_address() -> impl Strategy<Value = String> {
    wallet_address().prop_map(|a| a.to_string())
}

/// Generate a chain the key nodes support.
pub fn chain() -> impl Strategy<Value = Chain> {
    prop::sample::select(SUPPORTED_CHAINS).prop_map(|name| Chain::new(name))
}

/// Generate a comparator.
pub fn comparator() -> impl Strategy<Value = Comparator> {
    prop_oneof![
        Just(Comparator::Eq),
        Just(Comparator::Ne),
        Just(Comparator::Gt),
        Just(Comparator::Gte),
        Just(Comparator::Lt),
        Just(Comparator::Lte),
    ]
}

/// Generate a fungible token contract kind.
pub fn token_kind() -> impl Strategy<Value = ResourceKind> {
    prop_oneof![Just(ResourceKind::Erc20), Just(ResourceKind::Erc1155)]
}

/// Generate a clause that validates.
pub fn clause() -> impl Strategy<Value = PolicyClause> {
    prop_oneof![
        (chain(), wallet_address())
            .prop_map(|(chain, address)| PolicyClause::wallet_is(chain, &address.to_string())),
        (chain(), comparator(), any::<u64>())
            .prop_map(|(chain, cmp, value)| PolicyClause::native_balance(chain, cmp, value.into())),
        (chain(), token_kind(), contract_address(), comparator(), any::<u64>()).prop_map(
            |(chain, kind, contract, cmp, value)| {
                PolicyClause::token_balance(chain, kind, contract, cmp, value.into())
            }
        ),
        (chain(), contract_address(), any::<u32>())
            .prop_map(|(chain, contract, id)| PolicyClause::nft_owner(chain, contract, id.into())),
    ]
}

/// Generate a valid policy of one to `max_clauses` clauses.
pub fn policy(max_clauses: usize) -> impl Strategy<Value = AccessPolicy> {
    prop::collection::vec(clause(), 1..=max_clauses.max(1)).prop_map(AccessPolicy::new)
}

/// Generate plaintext bytes of up to `max_len` bytes.
pub fn plaintext(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Parameters for one upload by one wallet.
#[derive(Debug, Clone)]
pub struct DocumentParams {
    pub owner: LocalWallet,
    pub plaintext: Vec<u8>,
    pub file_name: String,
}

impl DocumentParams {
    /// Policy admitting only the owner.
    pub fn owner_policy(&self) -> AccessPolicy {
        single_address_policy(Chain::ethereum(), &self.owner.address().to_string())
    }
}

impl Arbitrary for DocumentParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            wallet(),
            plaintext(512),
            "[a-z][a-z0-9_-]{0,15}\\.(pdf|png|jpg|json|txt|bin)",
        )
            .prop_map(|(owner, plaintext, file_name)| DocumentParams {
                owner,
                plaintext,
                file_name,
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keygate_core::{decode_policy, encode_policy, policy_hash, Parameter, PolicyError};

    proptest! {
        #[test]
        fn test_generated_policies_validate(policy in policy(4)) {
            prop_assert!(policy.validate().is_ok());
        }

        #[test]
        fn test_canonical_encoding_is_stable(policy in policy(4)) {
            let bytes = encode_policy(&policy).unwrap();
            let decoded = decode_policy(&bytes).unwrap();

            prop_assert_eq!(&decoded, &policy);
            prop_assert_eq!(encode_policy(&decoded).unwrap(), bytes);
        }

        #[test]
        fn test_clause_order_changes_hash(a in clause(), b in clause()) {
            prop_assume!(a != b);

            let ab = AccessPolicy::new(vec![a.clone(), b.clone()]);
            let ba = AccessPolicy::new(vec![b, a]);

            prop_assert_ne!(policy_hash(&ab).unwrap(), policy_hash(&ba).unwrap());
        }

        #[test]
        fn test_unknown_tokens_rejected(name in "[a-zA-Z]{1,12}") {
            prop_assume!(name != "userAddress");

            let result = Parameter::parse(&format!(":{name}"));
            prop_assert!(matches!(result, Err(PolicyError::InvalidPolicy(_))));
        }
    }
}
