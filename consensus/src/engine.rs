//! The closed set of consensus engines a node can run.

use std::sync::atomic::AtomicBool;

use ess_ethash::Ethash;
use ess_types::{Address, Hash, Header};

use crate::{ChainHeaderReader, Clique, ConsensusError, EngineApi};

/// A consensus engine, chosen once at startup and shared for the node's
/// lifetime.
pub enum ConsensusEngine {
    Ethash(Ethash),
    Clique(Clique),
}

impl ConsensusEngine {
    pub fn is_clique(&self) -> bool {
        matches!(self, ConsensusEngine::Clique(_))
    }

    pub fn as_clique(&self) -> Option<&Clique> {
        match self {
            ConsensusEngine::Clique(c) => Some(c),
            ConsensusEngine::Ethash(_) => None,
        }
    }

    pub fn as_ethash(&self) -> Option<&Ethash> {
        match self {
            ConsensusEngine::Ethash(e) => Some(e),
            ConsensusEngine::Clique(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConsensusEngine::Ethash(_) => "ethash",
            ConsensusEngine::Clique(_) => "clique",
        }
    }

    /// Account that sealed `header`.
    pub fn author(&self, header: &Header) -> Result<Address, ConsensusError> {
        match self {
            ConsensusEngine::Ethash(e) => Ok(e.author(header)),
            ConsensusEngine::Clique(c) => c.author(header),
        }
    }

    /// Hash signed or mined over when sealing `header`.
    pub fn seal_hash(&self, header: &Header) -> Hash {
        match self {
            ConsensusEngine::Ethash(e) => e.seal_hash(header),
            ConsensusEngine::Clique(_) => crate::clique::seal_hash(header),
        }
    }

    /// Check a header against the consensus rules of the engine.
    pub fn verify_header(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &Header,
        check_seal: bool,
    ) -> Result<(), ConsensusError> {
        match self {
            ConsensusEngine::Ethash(e) => {
                if header.number == 0 {
                    return Ok(());
                }
                let parent = chain
                    .header_by_hash(&header.parent_hash)
                    .filter(|p| p.number + 1 == header.number)
                    .ok_or(ConsensusError::UnknownAncestor)?;
                Ok(e.verify_header(&parent, header, check_seal)?)
            }
            ConsensusEngine::Clique(c) => c.verify_header(chain, header, check_seal),
        }
    }

    /// Initialize the consensus fields of a header about to be sealed.
    pub fn prepare(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &mut Header,
    ) -> Result<(), ConsensusError> {
        match self {
            ConsensusEngine::Ethash(e) => {
                let parent = chain
                    .header_by_hash(&header.parent_hash)
                    .filter(|p| p.number + 1 == header.number)
                    .ok_or(ConsensusError::UnknownAncestor)?;
                e.prepare(&parent, header);
                Ok(())
            }
            ConsensusEngine::Clique(c) => c.prepare(chain, header),
        }
    }

    /// Produce a sealed copy of `header`. Blocking.
    ///
    /// `start_nonce` seeds the proof-of-work search and is ignored by
    /// proof-of-authority.
    pub fn seal(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &Header,
        start_nonce: u64,
        abort: &AtomicBool,
    ) -> Result<Header, ConsensusError> {
        match self {
            ConsensusEngine::Ethash(e) => Ok(e.seal(header, start_nonce, abort)?),
            ConsensusEngine::Clique(c) => c.seal(chain, header, abort),
        }
    }

    /// Local sealing threads; `-1` disables local proof-of-work sealing.
    pub fn set_threads(&self, threads: i32) {
        if let ConsensusEngine::Ethash(e) = self {
            e.set_threads(threads);
        }
    }

    pub fn threads(&self) -> i32 {
        match self {
            ConsensusEngine::Ethash(e) => e.threads(),
            ConsensusEngine::Clique(_) => 0,
        }
    }

    /// RPC namespaces contributed by the engine.
    pub fn apis(&self) -> Vec<EngineApi> {
        match self {
            ConsensusEngine::Ethash(_) => vec![EngineApi {
                namespace: "ethash",
                version: "1.0",
                public: true,
            }],
            ConsensusEngine::Clique(_) => vec![EngineApi {
                namespace: "clique",
                version: "1.0",
                public: true,
            }],
        }
    }
}
