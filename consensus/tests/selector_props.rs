use std::path::{Path, PathBuf};
use std::sync::Arc;

use proptest::prelude::*;

use ess_consensus::{create_consensus_engine, EthashConfig, EthashMode, PathResolver, PowMode};
use ess_nullables::NullStore;
use ess_types::{ChainConfig, CliqueConfig};

struct Ephemeral;

impl PathResolver for Ephemeral {
    fn resolve_path(&self, _path: &Path) -> PathBuf {
        PathBuf::new()
    }
}

fn mode_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("normal".to_string()),
        Just("shared".to_string()),
        Just("test".to_string()),
        Just("fake".to_string()),
        "[a-z]{0,8}",
    ]
}

proptest! {
    /// The engine variant is a pure function of (clique present, pow mode).
    #[test]
    fn selection_is_total_and_deterministic(mode in mode_strategy(), clique in any::<bool>()) {
        let config = EthashConfig { pow_mode: PowMode::from(mode.as_str()), ..EthashConfig::default() };
        let mut chain = ChainConfig::all_forks(1);
        if clique {
            chain.clique = Some(CliqueConfig::default());
        }
        let engine = create_consensus_engine(&Ephemeral, &config, &chain, Arc::new(NullStore::new()));

        if clique {
            prop_assert!(engine.is_clique());
        } else {
            let expected = match mode.as_str() {
                "fake" => EthashMode::Fake,
                "test" => EthashMode::Test,
                "shared" => EthashMode::Shared,
                _ => EthashMode::Normal,
            };
            let ethash = engine.as_ethash().unwrap();
            prop_assert_eq!(ethash.mode(), expected);
            if expected == EthashMode::Normal {
                prop_assert_eq!(ethash.threads(), -1);
            }
        }
    }
}
