//! Engine selection from configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ess_ethash::{Ethash, EthashConfig, PowMode};
use ess_store::ChainDatabase;
use ess_types::ChainConfig;

use crate::{Clique, ConsensusEngine};

/// Resolves paths relative to the node's data directory.
pub trait PathResolver {
    /// An empty path when the node has no data directory.
    fn resolve_path(&self, path: &Path) -> PathBuf;
}

/// Pick the consensus engine for a chain.
///
/// A clique section in the chain configuration always selects
/// proof-of-authority. Otherwise the proof-of-work mode decides; any mode
/// other than fake, test or shared (including unrecognized values) builds a
/// full engine with local CPU sealing disabled.
pub fn create_consensus_engine(
    resolver: &dyn PathResolver,
    config: &EthashConfig,
    chain_config: &ChainConfig,
    db: Arc<dyn ChainDatabase>,
) -> Arc<ConsensusEngine> {
    if let Some(clique) = chain_config.clique {
        tracing::info!(period = clique.period, epoch = clique.epoch, "using clique consensus");
        return Arc::new(ConsensusEngine::Clique(Clique::new(clique, db)));
    }

    let engine = match &config.pow_mode {
        PowMode::Fake => {
            tracing::warn!("Ethash used in fake mode");
            Ethash::new_faker()
        }
        PowMode::Test => {
            tracing::warn!("Ethash used in test mode");
            Ethash::new_tester()
        }
        PowMode::Shared => {
            tracing::warn!("Ethash used in shared mode");
            Ethash::new_shared()
        }
        PowMode::Normal | PowMode::Other(_) => {
            if let PowMode::Other(mode) = &config.pow_mode {
                tracing::debug!(mode = %mode, "unrecognized pow mode, using normal ethash");
            }
            let engine = Ethash::new(EthashConfig {
                cache_dir: resolver.resolve_path(&config.cache_dir),
                ..config.clone()
            });
            engine.set_threads(-1);
            engine
        }
    };
    Arc::new(ConsensusEngine::Ethash(engine))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ess_ethash::EthashMode;
    use ess_nullables::NullStore;
    use ess_types::CliqueConfig;

    struct Ephemeral;

    impl PathResolver for Ephemeral {
        fn resolve_path(&self, _path: &Path) -> PathBuf {
            PathBuf::new()
        }
    }

    struct DataDir(PathBuf);

    impl PathResolver for DataDir {
        fn resolve_path(&self, path: &Path) -> PathBuf {
            self.0.join(path)
        }
    }

    fn select(mode: &str, clique: bool) -> Arc<ConsensusEngine> {
        let config = EthashConfig {
            pow_mode: PowMode::from(mode),
            ..EthashConfig::default()
        };
        let mut chain = ChainConfig::all_forks(1);
        if clique {
            chain.clique = Some(CliqueConfig::default());
        }
        create_consensus_engine(&Ephemeral, &config, &chain, Arc::new(NullStore::new()))
    }

    fn mode_of(engine: &ConsensusEngine) -> Option<EthashMode> {
        engine.as_ethash().map(|e| e.mode())
    }

    #[test]
    fn clique_wins_over_fake() {
        let engine = select("fake", true);
        assert!(engine.is_clique());
    }

    #[test]
    fn pow_modes() {
        assert_eq!(mode_of(&select("fake", false)), Some(EthashMode::Fake));
        assert_eq!(mode_of(&select("test", false)), Some(EthashMode::Test));
        assert_eq!(mode_of(&select("shared", false)), Some(EthashMode::Shared));
        assert_eq!(mode_of(&select("normal", false)), Some(EthashMode::Normal));
    }

    #[test]
    fn normal_engine_has_local_sealing_disabled() {
        let engine = select("normal", false);
        assert_eq!(engine.threads(), -1);
    }

    #[test]
    fn unknown_mode_falls_through_to_normal() {
        let engine = select("bogus", false);
        assert_eq!(mode_of(&engine), Some(EthashMode::Normal));
        assert_eq!(engine.threads(), -1);
    }

    #[test]
    fn cache_dir_resolved_against_data_dir() {
        let engine = create_consensus_engine(
            &DataDir(PathBuf::from("/data")),
            &EthashConfig::default(),
            &ChainConfig::all_forks(1),
            Arc::new(NullStore::new()),
        );
        let ethash = engine.as_ethash().unwrap();
        assert_eq!(ethash.config().cache_dir, PathBuf::from("/data/ethash"));
    }

    #[test]
    fn engines_contribute_their_namespace() {
        assert_eq!(select("fake", false).apis()[0].namespace, "ethash");
        assert_eq!(select("fake", true).apis()[0].namespace, "clique");
    }
}
