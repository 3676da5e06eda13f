//! Genesis block construction and chain configuration reconciliation.

use serde::{Deserialize, Serialize};

use ess_store::ChainDatabase;
use ess_types::{Address, Block, ChainConfig, CliqueConfig, ConfigCompatError, Hash, Header};

use crate::blockchain::write_block;
use crate::GenesisError;

/// Chain id of developer chains.
pub const DEV_CHAIN_ID: u64 = 1337;

/// Specification of the first block of a chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    #[serde(default)]
    pub config: Option<ChainConfig>,
    #[serde(default)]
    pub nonce: u64,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub extra_data: Vec<u8>,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_difficulty")]
    pub difficulty: u64,
    #[serde(default)]
    pub mix_digest: Hash,
    #[serde(default)]
    pub coinbase: Address,
}

fn default_gas_limit() -> u64 {
    4_712_388
}

fn default_difficulty() -> u64 {
    131_072
}

/// Outcome of reconciling the database with the configured genesis.
#[derive(Debug)]
pub struct GenesisSetup {
    /// Chain configuration the node runs with.
    pub config: ChainConfig,
    /// Hash of the genesis block in the database.
    pub hash: Hash,
    /// Set when the stored chain must be rewound before the new
    /// configuration can take effect.
    pub compat: Option<ConfigCompatError>,
}

impl Genesis {
    /// The main network genesis.
    pub fn mainnet() -> Self {
        Self {
            config: Some(ChainConfig::mainnet()),
            nonce: 66,
            timestamp: 0,
            extra_data: b"essentia mainnet genesis".to_vec(),
            gas_limit: 5000,
            difficulty: 17_179_869_184,
            mix_digest: Hash::ZERO,
            coinbase: Address::ZERO,
        }
    }

    /// A proof-of-authority developer chain sealed by `signer`.
    pub fn developer(period: u64, signer: Address) -> Self {
        let mut config = ChainConfig::all_forks(DEV_CHAIN_ID);
        config.clique = Some(CliqueConfig {
            period,
            epoch: CliqueConfig::default().epoch,
        });
        Self {
            config: Some(config),
            nonce: 0,
            timestamp: 0,
            extra_data: ess_consensus::clique::genesis_extra(&[], &[signer]),
            gas_limit: 6_283_185,
            difficulty: 1,
            mix_digest: Hash::ZERO,
            coinbase: Address::ZERO,
        }
    }

    pub fn to_block(&self) -> Block {
        let header = Header {
            number: 0,
            nonce: self.nonce,
            timestamp: self.timestamp,
            extra: self.extra_data.clone(),
            gas_limit: self.gas_limit,
            difficulty: self.difficulty,
            mix_digest: self.mix_digest,
            coinbase: self.coinbase,
            ..Default::default()
        };
        Block::new(header, Vec::new())
    }

    pub fn hash(&self) -> Hash {
        self.to_block().hash()
    }

    /// Write the genesis block and its configuration as the canonical head.
    pub fn commit(&self, db: &dyn ChainDatabase) -> Result<Block, GenesisError> {
        let config = self.config.as_ref().ok_or(GenesisError::NoConfig)?;
        let block = self.to_block();
        write_block(db, &block, &[]).map_err(|e| match e {
            crate::ChainError::Store(e) => GenesisError::Store(e),
            other => GenesisError::Json(other.to_string()),
        })?;
        db.put_canonical_hash(0, &block.hash())?;
        db.put_head_header_hash(&block.hash())?;
        write_chain_config(db, &block.hash(), config)?;
        Ok(block)
    }
}

/// Persist `config` as JSON under the genesis hash.
pub fn write_chain_config(
    db: &dyn ChainDatabase,
    genesis: &Hash,
    config: &ChainConfig,
) -> Result<(), GenesisError> {
    let bytes = serde_json::to_vec(config).map_err(|e| GenesisError::Json(e.to_string()))?;
    db.put_chain_config(genesis, &bytes)?;
    Ok(())
}

pub fn read_chain_config(
    db: &dyn ChainDatabase,
    genesis: &Hash,
) -> Result<Option<ChainConfig>, GenesisError> {
    match db.get_chain_config(genesis)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| GenesisError::Json(e.to_string())),
        None => Ok(None),
    }
}

/// Reconcile the database with the configured genesis.
///
/// | database | genesis    | result                                              |
/// |----------|------------|-----------------------------------------------------|
/// | empty    | none       | main network genesis committed                      |
/// | empty    | given      | given genesis committed                             |
/// | genesis  | none       | stored configuration kept (main network upgraded)   |
/// | genesis  | given      | must match, configuration upgraded if compatible    |
///
/// An upgrade that would change already-activated forks is not written;
/// instead the returned [`GenesisSetup::compat`] tells the caller how far to
/// rewind first.
pub fn setup_genesis_block(
    db: &dyn ChainDatabase,
    genesis: Option<&Genesis>,
) -> Result<GenesisSetup, GenesisError> {
    if let Some(g) = genesis {
        if g.config.is_none() {
            return Err(GenesisError::NoConfig);
        }
    }

    let Some(stored) = db.get_canonical_hash(0)? else {
        let block = match genesis {
            Some(g) => {
                tracing::info!("writing custom genesis block");
                g.commit(db)?;
                g.to_block()
            }
            None => {
                tracing::info!("writing default main-net genesis block");
                Genesis::mainnet().commit(db)?
            }
        };
        let config = match genesis {
            Some(g) => g.config.clone().ok_or(GenesisError::NoConfig)?,
            None => ChainConfig::mainnet(),
        };
        return Ok(GenesisSetup {
            config,
            hash: block.hash(),
            compat: None,
        });
    };

    if let Some(g) = genesis {
        let hash = g.hash();
        if hash != stored {
            return Err(GenesisError::Mismatch { stored, new: hash });
        }
    }

    let mainnet_hash = Genesis::mainnet().hash();
    let new_config = match genesis {
        Some(g) => g.config.clone().ok_or(GenesisError::NoConfig)?,
        None if stored == mainnet_hash => ChainConfig::mainnet(),
        None => ChainConfig::default(),
    };

    let Some(stored_config) = read_chain_config(db, &stored)? else {
        tracing::warn!("found genesis block without chain config");
        write_chain_config(db, &stored, &new_config)?;
        return Ok(GenesisSetup {
            config: new_config,
            hash: stored,
            compat: None,
        });
    };

    // A private chain started without a genesis keeps its own configuration.
    if genesis.is_none() && stored != mainnet_hash {
        return Ok(GenesisSetup {
            config: stored_config,
            hash: stored,
            compat: None,
        });
    }

    let head = db
        .get_head_header_hash()?
        .ok_or_else(|| ess_store::StoreError::Corruption("missing head header hash".into()))?;
    let height = db.get_header_number(&head)?.ok_or_else(|| {
        ess_store::StoreError::Corruption(format!("missing block number for head header {head}"))
    })?;

    if let Some(compat) = stored_config.check_compatible(&new_config, height) {
        if height != 0 && compat.rewind_to != 0 {
            return Ok(GenesisSetup {
                config: new_config,
                hash: stored,
                compat: Some(compat),
            });
        }
    }

    write_chain_config(db, &stored, &new_config)?;
    Ok(GenesisSetup {
        config: new_config,
        hash: stored,
        compat: None,
    })
}
