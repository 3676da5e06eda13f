//! Transactions, receipts and logs.
//!
//! Execution is opaque to the node core: receipts are stored as produced by
//! whoever built the block, never recomputed here.

use serde::{Deserialize, Serialize};

use crate::{Address, Bloom, Hash};

/// A transaction as carried in blocks and the pool.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: Address,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas: u64,
    pub to: Option<Address>,
    pub value: u128,
    pub data: Vec<u8>,
}

impl Transaction {
    pub fn hash(&self) -> Hash {
        Hash::digest(&bincode::serialize(self).expect("Transaction is always serializable"))
    }
}

/// A log entry emitted during execution.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
}

/// The outcome of a transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: Hash,
    pub success: bool,
    pub cumulative_gas_used: u64,
    pub logs: Vec<Log>,
    pub bloom: Bloom,
}

impl Receipt {
    /// Build a receipt, deriving its bloom from the logs.
    pub fn new(tx_hash: Hash, success: bool, cumulative_gas_used: u64, logs: Vec<Log>) -> Self {
        let bloom = Bloom::from_logs(&logs);
        Self {
            tx_hash,
            success,
            cumulative_gas_used,
            logs,
            bloom,
        }
    }
}
