//! On-demand retrieval of chain data for light clients.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use ess_chain::BlockChain;
use ess_types::{Address, Block, Hash, Header, Receipt};

#[derive(Debug, Error)]
pub enum OdrError {
    #[error("{what} not found for block {hash}")]
    NotFound { what: &'static str, hash: Hash },

    #[error("retrieval failed: {0}")]
    Network(String),
}

/// Account fields readable through state proofs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccountState {
    pub nonce: u64,
    pub balance: u128,
}

/// Fetches chain data a light client does not store, verified against
/// headers it already has.
#[async_trait]
pub trait OdrBackend: Send + Sync {
    async fn retrieve_block(&self, hash: &Hash, number: u64) -> Result<Block, OdrError>;

    async fn retrieve_receipts(&self, hash: &Hash, number: u64) -> Result<Vec<Receipt>, OdrError>;

    /// The account of `address` in the state committed to by `header`.
    async fn retrieve_account(
        &self,
        header: &Header,
        address: &Address,
    ) -> Result<Option<AccountState>, OdrError>;
}

/// Answers retrievals from a local chain, as a serving peer would.
pub struct ChainOdr {
    chain: Arc<BlockChain>,
    accounts: RwLock<HashMap<Address, AccountState>>,
}

impl ChainOdr {
    pub fn new(chain: Arc<BlockChain>) -> Self {
        Self {
            chain,
            accounts: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_account(&self, address: Address, account: AccountState) {
        self.accounts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address, account);
    }

    fn canonical(&self, hash: &Hash, number: u64) -> Result<bool, OdrError> {
        let header = self
            .chain
            .get_header_by_number(number)
            .map_err(|e| OdrError::Network(e.to_string()))?;
        Ok(header.is_some_and(|h| h.hash() == *hash))
    }
}

#[async_trait]
impl OdrBackend for ChainOdr {
    async fn retrieve_block(&self, hash: &Hash, number: u64) -> Result<Block, OdrError> {
        if !self.canonical(hash, number)? {
            return Err(OdrError::NotFound { what: "block", hash: *hash });
        }
        self.chain
            .get_block_by_hash(hash)
            .map_err(|e| OdrError::Network(e.to_string()))?
            .ok_or(OdrError::NotFound { what: "block", hash: *hash })
    }

    async fn retrieve_receipts(&self, hash: &Hash, number: u64) -> Result<Vec<Receipt>, OdrError> {
        if !self.canonical(hash, number)? {
            return Err(OdrError::NotFound { what: "receipts", hash: *hash });
        }
        self.chain
            .get_receipts_by_hash(hash)
            .map_err(|e| OdrError::Network(e.to_string()))?
            .ok_or(OdrError::NotFound { what: "receipts", hash: *hash })
    }

    async fn retrieve_account(
        &self,
        header: &Header,
        address: &Address,
    ) -> Result<Option<AccountState>, OdrError> {
        let hash = header.hash();
        if !self.canonical(&hash, header.number)? {
            return Err(OdrError::NotFound { what: "state", hash });
        }
        Ok(self
            .accounts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(address)
            .copied())
    }
}

/// Account state at one header, read lazily through ODR.
pub struct ProofState<O> {
    header: Header,
    odr: Arc<O>,
}

impl<O: OdrBackend> ProofState<O> {
    pub fn new(header: Header, odr: Arc<O>) -> Self {
        Self { header, odr }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub async fn account(&self, address: &Address) -> Result<AccountState, OdrError> {
        Ok(self
            .odr
            .retrieve_account(&self.header, address)
            .await?
            .unwrap_or_default())
    }

    pub async fn nonce(&self, address: &Address) -> Result<u64, OdrError> {
        Ok(self.account(address).await?.nonce)
    }

    pub async fn balance(&self, address: &Address) -> Result<u128, OdrError> {
        Ok(self.account(address).await?.balance)
    }
}
