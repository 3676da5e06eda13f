//! Chain parameters and fork schedule.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Proof-of-authority parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliqueConfig {
    /// Minimum seconds between consecutive blocks.
    pub period: u64,
    /// Blocks between checkpoints that list the full signer set.
    pub epoch: u64,
}

impl Default for CliqueConfig {
    fn default() -> Self {
        Self {
            period: 15,
            epoch: 30_000,
        }
    }
}

/// Consensus-critical configuration of a chain, persisted under its genesis
/// hash.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homestead_block: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byzantium_block: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constantinople_block: Option<u64>,
    /// Present when the chain is sealed by proof-of-authority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clique: Option<CliqueConfig>,
}

/// A stored chain configuration that cannot be swapped for a new one without
/// rewinding the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigCompatError {
    pub what: &'static str,
    pub stored: Option<u64>,
    pub new: Option<u64>,
    /// Block to rewind to so the new configuration applies cleanly.
    pub rewind_to: u64,
}

impl fmt::Display for ConfigCompatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mismatching {} in database (have {:?}, want {:?}, rewindto {})",
            self.what, self.stored, self.new, self.rewind_to
        )
    }
}

impl std::error::Error for ConfigCompatError {}

fn is_forked(fork: Option<u64>, head: u64) -> bool {
    fork.is_some_and(|f| f <= head)
}

fn is_fork_incompatible(stored: Option<u64>, new: Option<u64>, head: u64) -> bool {
    (is_forked(stored, head) || is_forked(new, head)) && stored != new
}

impl ChainConfig {
    /// The mainnet configuration.
    pub fn mainnet() -> Self {
        Self {
            chain_id: 1,
            homestead_block: Some(1_150_000),
            byzantium_block: Some(4_370_000),
            constantinople_block: None,
            clique: None,
        }
    }

    /// A configuration with every fork active from genesis, used for
    /// developer and test chains.
    pub fn all_forks(chain_id: u64) -> Self {
        Self {
            chain_id,
            homestead_block: Some(0),
            byzantium_block: Some(0),
            constantinople_block: Some(0),
            clique: None,
        }
    }

    pub fn is_clique(&self) -> bool {
        self.clique.is_some()
    }

    /// Check whether `new` can replace `self` on a chain whose head is at
    /// `head`. Returns the earliest incompatibility found.
    pub fn check_compatible(&self, new: &ChainConfig, head: u64) -> Option<ConfigCompatError> {
        let forks = [
            ("homestead fork block", self.homestead_block, new.homestead_block),
            ("byzantium fork block", self.byzantium_block, new.byzantium_block),
            (
                "constantinople fork block",
                self.constantinople_block,
                new.constantinople_block,
            ),
        ];
        let mut found: Option<ConfigCompatError> = None;
        for (what, stored, new) in forks {
            if !is_fork_incompatible(stored, new, head) {
                continue;
            }
            let rewind_to = match (stored, new) {
                (Some(a), Some(b)) => a.min(b),
                (Some(a), None) | (None, Some(a)) => a,
                (None, None) => 0,
            }
            .saturating_sub(1);
            if found.as_ref().map_or(true, |f| rewind_to < f.rewind_to) {
                found = Some(ConfigCompatError {
                    what,
                    stored,
                    new,
                    rewind_to,
                });
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_configs_are_compatible() {
        let cfg = ChainConfig::mainnet();
        assert!(cfg.check_compatible(&cfg.clone(), 5_000_000).is_none());
    }

    #[test]
    fn future_fork_change_is_compatible() {
        let stored = ChainConfig::mainnet();
        let mut new = stored.clone();
        new.constantinople_block = Some(9_000_000);
        assert!(stored.check_compatible(&new, 5_000_000).is_none());
    }

    #[test]
    fn past_fork_change_requires_rewind() {
        let stored = ChainConfig::all_forks(7);
        let mut new = stored.clone();
        new.byzantium_block = Some(10);
        let err = stored.check_compatible(&new, 20).unwrap();
        assert_eq!(err.what, "byzantium fork block");
        assert_eq!(err.stored, Some(0));
        assert_eq!(err.new, Some(10));
        assert_eq!(err.rewind_to, 0);
    }

    #[test]
    fn rewind_lands_before_earliest_fork() {
        let mut stored = ChainConfig::all_forks(7);
        stored.byzantium_block = Some(50);
        let mut new = stored.clone();
        new.byzantium_block = Some(40);
        let err = stored.check_compatible(&new, 100).unwrap();
        assert_eq!(err.rewind_to, 39);
    }

    #[test]
    fn clique_section_round_trips_through_json() {
        let mut cfg = ChainConfig::all_forks(1337);
        cfg.clique = Some(CliqueConfig {
            period: 0,
            epoch: 100,
        });
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ChainConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
        assert!(back.is_clique());
    }
}
