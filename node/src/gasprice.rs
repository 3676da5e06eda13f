//! Gas price suggestions from recent blocks.

use std::sync::{Arc, Mutex};

use ess_chain::BlockChain;
use ess_types::Hash;

use crate::config::GpoConfig;

/// Suggests a gas price from the transactions in the most recent blocks.
pub struct GasPriceOracle {
    chain: Arc<BlockChain>,
    blocks: usize,
    percentile: u8,
    default: u128,
    last: Mutex<Option<(Hash, u128)>>,
}

impl GasPriceOracle {
    /// `fallback` is used when the config carries no default price.
    pub fn new(chain: Arc<BlockChain>, config: &GpoConfig, fallback: u128) -> Self {
        Self {
            chain,
            blocks: config.blocks.max(1),
            percentile: config.percentile.min(100),
            default: config.default.map(u128::from).unwrap_or(fallback),
            last: Mutex::new(None),
        }
    }

    pub fn default_price(&self) -> u128 {
        self.default
    }

    /// The configured percentile of the gas prices over the last blocks,
    /// or the default price when none of them carries transactions.
    pub fn suggest_price(&self) -> u128 {
        let head = self.chain.current_header();
        let head_hash = head.hash();
        if let Some((hash, price)) = *self.last.lock().unwrap_or_else(|e| e.into_inner()) {
            if hash == head_hash {
                return price;
            }
        }

        let mut prices = Vec::new();
        let first = head.number.saturating_sub(self.blocks as u64 - 1);
        for number in first..=head.number {
            match self.chain.get_block_by_number(number) {
                Ok(Some(block)) => prices.extend(block.transactions.iter().map(|tx| tx.gas_price)),
                Ok(None) => {}
                Err(e) => tracing::debug!(number, error = %e, "gas price oracle skipped block"),
            }
        }

        let price = if prices.is_empty() {
            self.default
        } else {
            prices.sort_unstable();
            prices[(prices.len() - 1) * self.percentile as usize / 100]
        };
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some((head_hash, price));
        price
    }
}
