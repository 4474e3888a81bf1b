//! Access policies.
//!
//! An [`AccessPolicy`] is a conjunction of [`PolicyClause`]s, each a predicate
//! over on-chain state. Policies are evaluated by the key nodes at decryption
//! time; anything evaluated on the client is advisory only.
//!
//! Parameters are a closed set: either a whitelisted substitution token
//! (currently only `:userAddress`) or a literal that does not start with `:`.

use std::fmt;

use crate::error::{PolicyError, Result};

/// Chains a key node knows how to read.
pub const SUPPORTED_CHAINS: &[&str] = &[
    "ethereum", "sepolia", "polygon", "base", "arbitrum", "optimism", "test",
];

/// Predicate methods a key node knows how to evaluate.
///
/// The empty method compares the requesting wallet address directly.
pub const SUPPORTED_METHODS: &[&str] = &["", "eth_getBalance", "balanceOf", "ownerOf"];

/// Reserved substitution tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubstitutionToken {
    /// Replaced by the requesting wallet address at evaluation time.
    UserAddress,
}

impl SubstitutionToken {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SubstitutionToken::UserAddress => ":userAddress",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            ":userAddress" => Some(SubstitutionToken::UserAddress),
            _ => None,
        }
    }
}

/// A clause parameter or expected value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Parameter {
    Token(SubstitutionToken),
    Literal(String),
}

impl Parameter {
    /// The requesting wallet address.
    pub const fn user_address() -> Self {
        Parameter::Token(SubstitutionToken::UserAddress)
    }

    /// A literal value. Fails if it looks like a token but is not a known one.
    pub fn literal(value: impl Into<String>) -> Result<Self> {
        Self::parse(&value.into())
    }

    /// Parse the wire form.
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(token) = SubstitutionToken::parse(s) {
            return Ok(Parameter::Token(token));
        }
        if s.starts_with(':') {
            return Err(PolicyError::InvalidPolicy(format!(
                "unresolved substitution token {s:?}"
            )));
        }
        Ok(Parameter::Literal(s.to_string()))
    }

    /// The wire form.
    pub fn as_wire(&self) -> &str {
        match self {
            Parameter::Token(token) => token.as_str(),
            Parameter::Literal(s) => s,
        }
    }

    /// Substitute tokens for a concrete requester.
    pub fn resolve(&self, requester: &str) -> String {
        match self {
            Parameter::Token(SubstitutionToken::UserAddress) => requester.to_string(),
            Parameter::Literal(s) => s.clone(),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// A chain name. Validated against [`SUPPORTED_CHAINS`] on encode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Chain(String);

impl Chain {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn ethereum() -> Self {
        Self::new("ethereum")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_supported(&self) -> bool {
        SUPPORTED_CHAINS.contains(&self.0.as_str())
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Chain {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A predicate method name. Validated against [`SUPPORTED_METHODS`] on encode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PredicateMethod(String);

impl PredicateMethod {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Compare the requesting wallet address directly.
    pub fn wallet_address() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_supported(&self) -> bool {
        SUPPORTED_METHODS.contains(&self.0.as_str())
    }

    pub fn is_wallet_address(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PredicateMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Standard contract type the clause targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// No contract (native balance or wallet address).
    None,
    Erc20,
    Erc721,
    Erc1155,
}

impl ResourceKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::None => "",
            ResourceKind::Erc20 => "ERC20",
            ResourceKind::Erc721 => "ERC721",
            ResourceKind::Erc1155 => "ERC1155",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "" => Some(ResourceKind::None),
            "ERC20" => Some(ResourceKind::Erc20),
            "ERC721" => Some(ResourceKind::Erc721),
            "ERC1155" => Some(ResourceKind::Erc1155),
            _ => None,
        }
    }
}

/// Return value comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

impl Comparator {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Ne => "!=",
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
            Comparator::Contains => "contains",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "=" | "==" => Some(Comparator::Eq),
            "!=" => Some(Comparator::Ne),
            ">" => Some(Comparator::Gt),
            ">=" => Some(Comparator::Gte),
            "<" => Some(Comparator::Lt),
            "<=" => Some(Comparator::Lte),
            "contains" => Some(Comparator::Contains),
            _ => None,
        }
    }

    /// Compare an observed value against the expected one.
    ///
    /// Numeric comparison is used when both sides parse as unsigned integers.
    /// `0x` values compare case-insensitively. Ordering comparators on
    /// non-numeric values never hold.
    pub fn holds(&self, actual: &str, expected: &str) -> bool {
        let numeric = match (actual.trim().parse::<u128>(), expected.trim().parse::<u128>()) {
            (Ok(a), Ok(e)) => Some((a, e)),
            _ => None,
        };

        match self {
            Comparator::Eq => match numeric {
                Some((a, e)) => a == e,
                None => text_eq(actual, expected),
            },
            Comparator::Ne => match numeric {
                Some((a, e)) => a != e,
                None => !text_eq(actual, expected),
            },
            Comparator::Gt => numeric.is_some_and(|(a, e)| a > e),
            Comparator::Gte => numeric.is_some_and(|(a, e)| a >= e),
            Comparator::Lt => numeric.is_some_and(|(a, e)| a < e),
            Comparator::Lte => numeric.is_some_and(|(a, e)| a <= e),
            Comparator::Contains => actual
                .split(',')
                .map(str::trim)
                .any(|item| text_eq(item, expected)),
        }
    }
}

fn text_eq(a: &str, b: &str) -> bool {
    if a.starts_with("0x") || b.starts_with("0x") {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

/// A single predicate over chain state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicyClause {
    /// Contract address, or empty when no contract is involved.
    pub resource_ref: String,
    pub resource_kind: ResourceKind,
    pub chain: Chain,
    pub predicate_method: PredicateMethod,
    pub parameters: Vec<Parameter>,
    pub comparator: Comparator,
    pub expected_value: Parameter,
}

impl PolicyClause {
    /// Clause requiring the requesting wallet to be `address`.
    pub fn wallet_is(chain: Chain, address: &str) -> Self {
        Self {
            resource_ref: String::new(),
            resource_kind: ResourceKind::None,
            chain,
            predicate_method: PredicateMethod::wallet_address(),
            parameters: vec![Parameter::user_address()],
            comparator: Comparator::Eq,
            expected_value: Parameter::Literal(address.to_string()),
        }
    }

    /// Clause requiring the requester's native balance to satisfy `comparator value`.
    pub fn native_balance(chain: Chain, comparator: Comparator, value: u128) -> Self {
        Self {
            resource_ref: String::new(),
            resource_kind: ResourceKind::None,
            chain,
            predicate_method: PredicateMethod::new("eth_getBalance"),
            parameters: vec![Parameter::user_address(), Parameter::Literal("latest".into())],
            comparator,
            expected_value: Parameter::Literal(value.to_string()),
        }
    }

    /// Clause requiring the requester to hold `comparator value` of a token contract.
    pub fn token_balance(
        chain: Chain,
        kind: ResourceKind,
        contract: impl Into<String>,
        comparator: Comparator,
        value: u128,
    ) -> Self {
        Self {
            resource_ref: contract.into(),
            resource_kind: kind,
            chain,
            predicate_method: PredicateMethod::new("balanceOf"),
            parameters: vec![Parameter::user_address()],
            comparator,
            expected_value: Parameter::Literal(value.to_string()),
        }
    }

    /// Clause requiring the requester to own NFT `token_id`.
    pub fn nft_owner(chain: Chain, contract: impl Into<String>, token_id: u128) -> Self {
        Self {
            resource_ref: contract.into(),
            resource_kind: ResourceKind::Erc721,
            chain,
            predicate_method: PredicateMethod::new("ownerOf"),
            parameters: vec![Parameter::Literal(token_id.to_string())],
            comparator: Comparator::Eq,
            expected_value: Parameter::user_address(),
        }
    }

    /// Check the clause can be evaluated by a key node.
    pub fn validate(&self) -> Result<()> {
        if !self.chain.is_supported() {
            return Err(PolicyError::InvalidPolicy(format!(
                "unsupported chain {:?}",
                self.chain.as_str()
            )));
        }
        if !self.predicate_method.is_supported() {
            return Err(PolicyError::InvalidPolicy(format!(
                "unsupported predicate method {:?}",
                self.predicate_method.as_str()
            )));
        }

        match self.predicate_method.as_str() {
            "" => {
                if self.parameters != [Parameter::user_address()] {
                    return Err(PolicyError::InvalidPolicy(
                        "wallet address clause takes exactly one :userAddress parameter".into(),
                    ));
                }
                if !self.resource_ref.is_empty() {
                    return Err(PolicyError::InvalidPolicy(
                        "wallet address clause must not name a contract".into(),
                    ));
                }
            }
            "eth_getBalance" => {
                if self.parameters.is_empty() {
                    return Err(PolicyError::InvalidPolicy(
                        "eth_getBalance needs an address parameter".into(),
                    ));
                }
            }
            _ => {
                if self.resource_ref.is_empty() {
                    return Err(PolicyError::InvalidPolicy(format!(
                        "{} needs a contract address",
                        self.predicate_method
                    )));
                }
                if self.parameters.is_empty() {
                    return Err(PolicyError::InvalidPolicy(format!(
                        "{} needs at least one parameter",
                        self.predicate_method
                    )));
                }
            }
        }

        Ok(())
    }

    /// Parameters with tokens substituted for `requester`.
    pub fn resolved_parameters(&self, requester: &str) -> Vec<String> {
        self.parameters.iter().map(|p| p.resolve(requester)).collect()
    }
}

/// An ordered conjunction of clauses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessPolicy {
    clauses: Vec<PolicyClause>,
}

impl AccessPolicy {
    pub fn new(clauses: Vec<PolicyClause>) -> Self {
        Self { clauses }
    }

    pub fn clauses(&self) -> &[PolicyClause] {
        &self.clauses
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Append a clause.
    pub fn and(mut self, clause: PolicyClause) -> Self {
        self.clauses.push(clause);
        self
    }

    /// Check every clause can be evaluated. An empty policy is rejected.
    pub fn validate(&self) -> Result<()> {
        if self.clauses.is_empty() {
            return Err(PolicyError::InvalidPolicy("policy has no clauses".into()));
        }
        self.clauses.iter().try_for_each(PolicyClause::validate)
    }
}

/// Policy admitting only the wallet `address` on `chain`.
pub fn single_address_policy(chain: Chain, address: &str) -> AccessPolicy {
    AccessPolicy::new(vec![PolicyClause::wallet_is(chain, address)])
}
