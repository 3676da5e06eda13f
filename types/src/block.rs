//! Block headers and blocks.

use serde::{Deserialize, Serialize};

use crate::{Address, Bloom, Hash, Transaction};

/// A block header.
///
/// The hash of a header is the Blake2b-256 digest of its bincode encoding.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub parent_hash: Hash,
    pub coinbase: Address,
    pub state_root: Hash,
    pub tx_root: Hash,
    pub receipt_root: Hash,
    pub bloom: Bloom,
    pub difficulty: u64,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra: Vec<u8>,
    pub mix_digest: Hash,
    pub nonce: u64,
}

impl Header {
    pub fn hash(&self) -> Hash {
        Hash::digest(&self.encode())
    }

    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("Header is always serializable")
    }
}

/// A block: header plus the transactions it includes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Assemble a block, deriving the header's transaction root.
    pub fn new(mut header: Header, transactions: Vec<Transaction>) -> Self {
        header.tx_root = Self::derive_tx_root(&transactions);
        Self {
            header,
            transactions,
        }
    }

    /// A block made of a header alone (as served to light clients).
    pub fn with_header(header: Header) -> Self {
        Self {
            header,
            transactions: Vec::new(),
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn derive_tx_root(transactions: &[Transaction]) -> Hash {
        if transactions.is_empty() {
            return Hash::ZERO;
        }
        let mut buf = Vec::with_capacity(transactions.len() * 32);
        for tx in transactions {
            buf.extend_from_slice(tx.hash().as_bytes());
        }
        Hash::digest(&buf)
    }
}

/// Block selector used by the query APIs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockNumber {
    Latest,
    Pending,
    Earliest,
    Number(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_hash_changes_with_nonce() {
        let mut header = Header {
            number: 7,
            ..Default::default()
        };
        let before = header.hash();
        header.nonce = 1;
        assert_ne!(header.hash(), before);
    }

    #[test]
    fn empty_block_has_zero_tx_root() {
        let block = Block::new(Header::default(), Vec::new());
        assert!(block.header.tx_root.is_zero());
    }

    #[test]
    fn tx_root_commits_to_transactions() {
        let tx = Transaction {
            nonce: 1,
            ..Default::default()
        };
        let block = Block::new(Header::default(), vec![tx]);
        assert!(!block.header.tx_root.is_zero());
    }
}
