//! Chain state as seen by key nodes.
//!
//! Nodes evaluate every clause of a policy against chain state before they
//! release a decryption share. Clients never read chain state themselves.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;
use tracing::trace;

use keygate_core::{AccessPolicy, PolicyClause, ResourceKind, WalletAddress};

/// Failure to read chain state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("chain {0} not reachable")]
    Unreachable(String),

    #[error("bad chain query: {0}")]
    BadQuery(String),
}

/// Read-only view of the chains a node can evaluate policies against.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Native balance of `account`, in the chain's smallest unit.
    async fn native_balance(&self, chain: &str, account: &str) -> Result<u128, ChainError>;

    /// Token balance of `owner` in `contract`. `token_id` is set for ERC1155.
    async fn token_balance(
        &self,
        chain: &str,
        contract: &str,
        owner: &str,
        token_id: Option<&str>,
    ) -> Result<u128, ChainError>;

    /// Current owner of NFT `token_id`, if minted.
    async fn owner_of(
        &self,
        chain: &str,
        contract: &str,
        token_id: &str,
    ) -> Result<Option<String>, ChainError>;
}

/// Whether `requester` satisfies every clause of `policy`.
///
/// Clauses are evaluated in order and evaluation stops at the first one
/// that does not hold.
pub async fn evaluate_policy<R: ChainReader + ?Sized>(
    reader: &R,
    policy: &AccessPolicy,
    requester: &WalletAddress,
) -> Result<bool, ChainError> {
    let requester = requester.to_string();
    for clause in policy.clauses() {
        if !evaluate_clause(reader, clause, &requester).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

async fn evaluate_clause<R: ChainReader + ?Sized>(
    reader: &R,
    clause: &PolicyClause,
    requester: &str,
) -> Result<bool, ChainError> {
    let chain = clause.chain.as_str();
    let params = clause.resolved_parameters(requester);
    let first = |what: &str| {
        params
            .first()
            .cloned()
            .ok_or_else(|| ChainError::BadQuery(format!("{what} needs a parameter")))
    };

    let actual = match clause.predicate_method.as_str() {
        "" => first("wallet address")?,
        "eth_getBalance" => reader
            .native_balance(chain, &first("eth_getBalance")?)
            .await?
            .to_string(),
        "balanceOf" => {
            let owner = first("balanceOf")?;
            let token_id = match clause.resource_kind {
                ResourceKind::Erc1155 => Some(params.get(1).map(String::as_str).ok_or_else(
                    || ChainError::BadQuery("ERC1155 balanceOf needs a token id".into()),
                )?),
                _ => None,
            };
            reader
                .token_balance(chain, &clause.resource_ref, &owner, token_id)
                .await?
                .to_string()
        }
        "ownerOf" => reader
            .owner_of(chain, &clause.resource_ref, &first("ownerOf")?)
            .await?
            .unwrap_or_default(),
        other => return Err(ChainError::BadQuery(format!("unsupported method {other:?}"))),
    };

    let expected = clause.expected_value.resolve(requester);
    let holds = clause.comparator.holds(&actual, &expected);
    trace!(chain, method = %clause.predicate_method, holds, "evaluated clause");
    Ok(holds)
}

fn key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("/")
}

/// In-memory chain state for tests and local networks.
#[derive(Debug, Default)]
pub struct MemoryChain {
    balances: RwLock<HashMap<String, u128>>,
    tokens: RwLock<HashMap<String, u128>>,
    owners: RwLock<HashMap<String, String>>,
    offline: RwLock<bool>,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_native_balance(&self, chain: &str, account: &str, balance: u128) {
        if let Ok(mut balances) = self.balances.write() {
            balances.insert(key(&[chain, account]), balance);
        }
    }

    pub fn set_token_balance(
        &self,
        chain: &str,
        contract: &str,
        owner: &str,
        token_id: Option<&str>,
        balance: u128,
    ) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.insert(key(&[chain, contract, owner, token_id.unwrap_or("")]), balance);
        }
    }

    pub fn set_owner(&self, chain: &str, contract: &str, token_id: &str, owner: &str) {
        if let Ok(mut owners) = self.owners.write() {
            owners.insert(key(&[chain, contract, token_id]), owner.to_string());
        }
    }

    /// Make every read fail with [`ChainError::Unreachable`].
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut flag) = self.offline.write() {
            *flag = offline;
        }
    }

    fn check_online(&self, chain: &str) -> Result<(), ChainError> {
        match self.offline.read() {
            Ok(flag) if !*flag => Ok(()),
            _ => Err(ChainError::Unreachable(chain.to_string())),
        }
    }
}

#[async_trait]
impl ChainReader for MemoryChain {
    async fn native_balance(&self, chain: &str, account: &str) -> Result<u128, ChainError> {
        self.check_online(chain)?;
        let balances = self
            .balances
            .read()
            .map_err(|_| ChainError::Unreachable(chain.to_string()))?;
        Ok(balances.get(&key(&[chain, account])).copied().unwrap_or(0))
    }

    async fn token_balance(
        &self,
        chain: &str,
        contract: &str,
        owner: &str,
        token_id: Option<&str>,
    ) -> Result<u128, ChainError> {
        self.check_online(chain)?;
        let tokens = self
            .tokens
            .read()
            .map_err(|_| ChainError::Unreachable(chain.to_string()))?;
        Ok(tokens
            .get(&key(&[chain, contract, owner, token_id.unwrap_or("")]))
            .copied()
            .unwrap_or(0))
    }

    async fn owner_of(
        &self,
        chain: &str,
        contract: &str,
        token_id: &str,
    ) -> Result<Option<String>, ChainError> {
        self.check_online(chain)?;
        let owners = self
            .owners
            .read()
            .map_err(|_| ChainError::Unreachable(chain.to_string()))?;
        Ok(owners.get(&key(&[chain, contract, token_id])).cloned())
    }
}
