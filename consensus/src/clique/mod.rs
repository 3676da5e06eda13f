//! Proof-of-authority engine.
//!
//! A fixed set of authorized signers takes turns sealing blocks. Each header's
//! `extra` field is laid out as:
//!
//! ```text
//! vanity (32 bytes) || signers (checkpoints only, 20 bytes each) || seal (96 bytes)
//! ```
//!
//! where the seal is the signer's Ed25519 public key followed by its
//! signature over [`seal_hash`]. The in-turn signer seals with difficulty 2,
//! everyone else with difficulty 1, and no signer may seal more than once
//! within `signers / 2 + 1` consecutive blocks.

mod snapshot;

pub use snapshot::Snapshot;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ess_crypto::{derive_address, verify_signature};
use ess_store::ChainDatabase;
use ess_types::{Address, CliqueConfig, Hash, Header, PublicKey, Signature};

use crate::{ChainHeaderReader, ConsensusError};

/// Fixed number of extra-data prefix bytes reserved for signer vanity.
pub const EXTRA_VANITY: usize = 32;

/// Fixed number of extra-data suffix bytes reserved for the signer seal.
pub const EXTRA_SEAL: usize = 96;

/// Blocks after which a snapshot is persisted to the database.
pub const CHECKPOINT_INTERVAL: u64 = 1024;

/// Snapshots kept in memory.
const INMEMORY_SNAPSHOTS: usize = 128;

pub const DIFF_IN_TURN: u64 = 2;
pub const DIFF_NO_TURN: u64 = 1;

/// Signs a digest on behalf of an account, returning the public key the
/// signature verifies under.
pub type SignerFn =
    Arc<dyn Fn(Address, &[u8]) -> Result<(PublicKey, Signature), String> + Send + Sync>;

/// Hash of the header without its 96-byte seal. This is what signers sign.
pub fn seal_hash(header: &Header) -> Hash {
    let mut unsealed = header.clone();
    let keep = unsealed.extra.len().saturating_sub(EXTRA_SEAL);
    unsealed.extra.truncate(keep);
    unsealed.hash()
}

/// Extract and verify the account that sealed `header`.
pub fn ecrecover(header: &Header) -> Result<Address, ConsensusError> {
    if header.extra.len() < EXTRA_SEAL {
        return Err(ConsensusError::MissingSignature);
    }
    let seal = &header.extra[header.extra.len() - EXTRA_SEAL..];
    let mut public = [0u8; 32];
    public.copy_from_slice(&seal[..32]);
    let mut sig = [0u8; 64];
    sig.copy_from_slice(&seal[32..]);
    let public = PublicKey(public);

    if !verify_signature(seal_hash(header).as_bytes(), &Signature(sig), &public) {
        return Err(ConsensusError::InvalidSignature);
    }
    Ok(derive_address(&public))
}

/// Signers listed between vanity and seal; empty on non-checkpoint headers.
pub(crate) fn parse_checkpoint_signers(header: &Header) -> Result<Vec<Address>, ConsensusError> {
    if header.extra.len() < EXTRA_VANITY + EXTRA_SEAL {
        return Err(ConsensusError::MissingSignature);
    }
    let list = &header.extra[EXTRA_VANITY..header.extra.len() - EXTRA_SEAL];
    if list.len() % 20 != 0 {
        return Err(ConsensusError::InvalidCheckpointSigners);
    }
    list.chunks(20)
        .map(|chunk| {
            Address::from_slice(chunk).map_err(|_| ConsensusError::InvalidCheckpointSigners)
        })
        .collect()
}

/// Build a genesis `extra` field listing the initial signers.
pub fn genesis_extra(vanity: &[u8], signers: &[Address]) -> Vec<u8> {
    let mut extra = vanity.to_vec();
    extra.resize(EXTRA_VANITY, 0);
    let mut sorted = signers.to_vec();
    sorted.sort();
    for signer in sorted {
        extra.extend_from_slice(signer.as_bytes());
    }
    extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
    extra
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The proof-of-authority engine.
pub struct Clique {
    config: CliqueConfig,
    db: Arc<dyn ChainDatabase>,
    recents: Mutex<HashMap<Hash, Snapshot>>,
    signer: RwLock<Option<(Address, SignerFn)>>,
}

impl Clique {
    pub fn new(config: CliqueConfig, db: Arc<dyn ChainDatabase>) -> Self {
        let mut config = config;
        if config.epoch == 0 {
            config.epoch = CliqueConfig::default().epoch;
        }
        Self {
            config,
            db,
            recents: Mutex::new(HashMap::new()),
            signer: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &CliqueConfig {
        &self.config
    }

    /// Install the local signing key used by [`Clique::seal`].
    pub fn authorize(&self, signer: Address, sign_fn: SignerFn) {
        tracing::info!(%signer, "clique signer authorized");
        *self.signer.write().unwrap_or_else(|e| e.into_inner()) = Some((signer, sign_fn));
    }

    /// The currently authorized signer, if any.
    pub fn signer(&self) -> Option<Address> {
        self.signer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|(addr, _)| *addr)
    }

    pub fn author(&self, header: &Header) -> Result<Address, ConsensusError> {
        ecrecover(header)
    }

    fn is_checkpoint(&self, number: u64) -> bool {
        number % self.config.epoch == 0
    }

    /// Signer snapshot after block `number` with hash `hash`.
    pub fn snapshot(
        &self,
        chain: &dyn ChainHeaderReader,
        number: u64,
        hash: Hash,
    ) -> Result<Snapshot, ConsensusError> {
        let mut headers = Vec::new();
        let mut number = number;
        let mut hash = hash;

        let base = loop {
            if let Some(snap) = self
                .recents
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(&hash)
            {
                break snap.clone();
            }
            if number % CHECKPOINT_INTERVAL == 0 {
                if let Some(snap) = Snapshot::load(self.db.as_ref(), &hash)? {
                    tracing::trace!(number, %hash, "loaded voting snapshot from disk");
                    break snap;
                }
            }
            if number == 0 {
                let genesis = chain
                    .header_by_number(0)
                    .ok_or(ConsensusError::UnknownAncestor)?;
                let signers = parse_checkpoint_signers(&genesis)?;
                let snap = Snapshot::new(0, genesis.hash(), signers);
                snap.store(self.db.as_ref())?;
                tracing::info!(number, hash = %snap.hash, "stored checkpoint snapshot to disk");
                break snap;
            }
            let header = chain
                .header_by_hash(&hash)
                .filter(|h| h.number == number)
                .ok_or(ConsensusError::UnknownAncestor)?;
            hash = header.parent_hash;
            number -= 1;
            headers.push(header);
        };

        headers.reverse();
        let snap = base.apply(&headers, self.config.epoch)?;

        {
            let mut recents = self.recents.lock().unwrap_or_else(|e| e.into_inner());
            if recents.len() >= INMEMORY_SNAPSHOTS {
                recents.clear();
            }
            recents.insert(snap.hash, snap.clone());
        }

        if snap.number % CHECKPOINT_INTERVAL == 0 && !headers.is_empty() {
            snap.store(self.db.as_ref())?;
            tracing::debug!(number = snap.number, hash = %snap.hash, "stored voting snapshot to disk");
        }
        Ok(snap)
    }

    pub fn verify_header(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &Header,
        check_seal: bool,
    ) -> Result<(), ConsensusError> {
        if header.number == 0 {
            return Ok(());
        }
        if header.extra.len() < EXTRA_VANITY {
            return Err(ConsensusError::MissingVanity);
        }
        if header.extra.len() < EXTRA_VANITY + EXTRA_SEAL {
            return Err(ConsensusError::MissingSignature);
        }
        let checkpoint = self.is_checkpoint(header.number);
        let signers_bytes = header.extra.len() - EXTRA_VANITY - EXTRA_SEAL;
        if !checkpoint && signers_bytes != 0 {
            return Err(ConsensusError::ExtraSigners);
        }
        if header.difficulty != DIFF_IN_TURN && header.difficulty != DIFF_NO_TURN {
            return Err(ConsensusError::WrongDifficulty {
                expected: DIFF_IN_TURN,
                actual: header.difficulty,
            });
        }

        let parent = chain
            .header_by_hash(&header.parent_hash)
            .filter(|p| p.number + 1 == header.number)
            .ok_or(ConsensusError::UnknownAncestor)?;
        if parent.timestamp + self.config.period > header.timestamp {
            return Err(ConsensusError::InvalidTimestamp);
        }

        let snap = self.snapshot(chain, parent.number, header.parent_hash)?;
        if checkpoint && parse_checkpoint_signers(header)? != snap.signers() {
            return Err(ConsensusError::InvalidCheckpointSigners);
        }
        if check_seal {
            self.verify_seal(&snap, header)?;
        }
        Ok(())
    }

    fn verify_seal(&self, snap: &Snapshot, header: &Header) -> Result<(), ConsensusError> {
        let signer = ecrecover(header)?;
        if !snap.signers.contains(&signer) {
            return Err(ConsensusError::UnauthorizedSigner(signer));
        }
        if snap.signed_recently(header.number, &signer) {
            return Err(ConsensusError::RecentlySigned);
        }
        let expected = if snap.in_turn(header.number, &signer) {
            DIFF_IN_TURN
        } else {
            DIFF_NO_TURN
        };
        if header.difficulty != expected {
            return Err(ConsensusError::WrongDifficulty {
                expected,
                actual: header.difficulty,
            });
        }
        Ok(())
    }

    /// Fill in difficulty, extra-data layout and timestamp for sealing.
    pub fn prepare(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &mut Header,
    ) -> Result<(), ConsensusError> {
        let parent = chain
            .header_by_hash(&header.parent_hash)
            .filter(|p| p.number + 1 == header.number)
            .ok_or(ConsensusError::UnknownAncestor)?;
        let snap = self.snapshot(chain, parent.number, header.parent_hash)?;

        let signer = self.signer().unwrap_or_default();
        header.difficulty = if snap.in_turn(header.number, &signer) {
            DIFF_IN_TURN
        } else {
            DIFF_NO_TURN
        };

        header.extra.truncate(EXTRA_VANITY);
        header.extra.resize(EXTRA_VANITY, 0);
        if self.is_checkpoint(header.number) {
            for s in snap.signers() {
                header.extra.extend_from_slice(s.as_bytes());
            }
        }
        header.extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
        header.mix_digest = Hash::ZERO;
        header.timestamp = header.timestamp.max(parent.timestamp + self.config.period);
        Ok(())
    }

    /// Sign a prepared header with the authorized key.
    ///
    /// Blocks until the header's timestamp is reached; raising `abort` ends
    /// the wait with [`ConsensusError::Aborted`].
    pub fn seal(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &Header,
        abort: &AtomicBool,
    ) -> Result<Header, ConsensusError> {
        if header.number == 0 {
            return Err(ConsensusError::UnknownBlock);
        }
        let (signer, sign_fn) = self
            .signer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(ConsensusError::Unauthorized)?;

        let snap = self.snapshot(chain, header.number - 1, header.parent_hash)?;
        if !snap.signers.contains(&signer) {
            return Err(ConsensusError::UnauthorizedSigner(signer));
        }
        if snap.signed_recently(header.number, &signer) {
            return Err(ConsensusError::RecentlySigned);
        }
        if header.extra.len() < EXTRA_VANITY + EXTRA_SEAL {
            return Err(ConsensusError::MissingSignature);
        }

        while unix_now() < header.timestamp {
            if abort.load(Ordering::Relaxed) {
                return Err(ConsensusError::Aborted);
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        let digest = seal_hash(header);
        let (public, signature) =
            sign_fn(signer, digest.as_bytes()).map_err(ConsensusError::Signing)?;
        if derive_address(&public) != signer {
            return Err(ConsensusError::Signing(
                "signing key does not belong to the authorized signer".into(),
            ));
        }

        let mut sealed = header.clone();
        let at = sealed.extra.len() - EXTRA_SEAL;
        sealed.extra[at..at + 32].copy_from_slice(&public.0);
        sealed.extra[at + 32..].copy_from_slice(&signature.0);
        Ok(sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ess_crypto::{generate_keypair, keypair_from_seed, sign_message};
    use ess_nullables::NullStore;
    use ess_store::MetaStore;
    use ess_types::{ChainConfig, KeyPair};

    pub(crate) struct TestChain {
        config: ChainConfig,
        headers: Mutex<HashMap<Hash, Header>>,
        canonical: Mutex<HashMap<u64, Hash>>,
    }

    impl TestChain {
        fn new(genesis: Header) -> Self {
            let chain = Self {
                config: ChainConfig::all_forks(1),
                headers: Mutex::new(HashMap::new()),
                canonical: Mutex::new(HashMap::new()),
            };
            chain.insert(genesis);
            chain
        }

        fn insert(&self, header: Header) {
            let hash = header.hash();
            self.canonical.lock().unwrap().insert(header.number, hash);
            self.headers.lock().unwrap().insert(hash, header);
        }
    }

    impl ChainHeaderReader for TestChain {
        fn config(&self) -> &ChainConfig {
            &self.config
        }

        fn current_header(&self) -> Option<Header> {
            let canonical = self.canonical.lock().unwrap();
            let top = canonical.keys().max()?;
            self.headers.lock().unwrap().get(&canonical[top]).cloned()
        }

        fn header_by_hash(&self, hash: &Hash) -> Option<Header> {
            self.headers.lock().unwrap().get(hash).cloned()
        }

        fn header_by_number(&self, number: u64) -> Option<Header> {
            let hash = *self.canonical.lock().unwrap().get(&number)?;
            self.header_by_hash(&hash)
        }
    }

    fn signer_fn(kp: KeyPair) -> SignerFn {
        Arc::new(
            move |_addr: Address, digest: &[u8]| -> Result<(PublicKey, Signature), String> {
                Ok((kp.public, sign_message(digest, &kp.private)))
            },
        )
    }

    fn setup(signers: &[Address]) -> (Arc<NullStore>, Clique, TestChain) {
        let db = Arc::new(NullStore::new());
        let clique = Clique::new(CliqueConfig { period: 0, epoch: 30_000 }, db.clone());
        let genesis = Header {
            extra: genesis_extra(b"ess", signers),
            difficulty: 1,
            ..Default::default()
        };
        (db, clique, TestChain::new(genesis))
    }

    fn next_header(chain: &TestChain) -> Header {
        let parent = chain.current_header().unwrap();
        Header {
            parent_hash: parent.hash(),
            number: parent.number + 1,
            timestamp: parent.timestamp,
            ..Default::default()
        }
    }

    #[test]
    fn seal_then_verify() {
        let kp = keypair_from_seed(&[1u8; 32]);
        let signer = derive_address(&kp.public);
        let (db, clique, chain) = setup(&[signer]);
        clique.authorize(signer, signer_fn(kp));

        let mut header = next_header(&chain);
        clique.prepare(&chain, &mut header).unwrap();
        // A lone signer is always in turn.
        assert_eq!(header.difficulty, DIFF_IN_TURN);
        let sealed = clique.seal(&chain, &header, &AtomicBool::new(false)).unwrap();

        clique.verify_header(&chain, &sealed, true).unwrap();
        assert_eq!(clique.author(&sealed).unwrap(), signer);
        // Genesis checkpoint snapshot is persisted.
        let genesis_hash = chain.header_by_number(0).unwrap().hash();
        assert!(db.get_meta(&format!("clique-{genesis_hash}")).unwrap().is_some());
    }

    #[test]
    fn sealing_without_authorization_fails() {
        let kp = generate_keypair();
        let (_db, clique, chain) = setup(&[derive_address(&kp.public)]);
        let mut header = next_header(&chain);
        clique.prepare(&chain, &mut header).unwrap();
        let result = clique.seal(&chain, &header, &AtomicBool::new(false));
        assert!(matches!(result, Err(ConsensusError::Unauthorized)));
    }

    #[test]
    fn outsider_cannot_seal() {
        let member = generate_keypair();
        let outsider = keypair_from_seed(&[9u8; 32]);
        let outsider_addr = derive_address(&outsider.public);
        let (_db, clique, chain) = setup(&[derive_address(&member.public)]);
        clique.authorize(outsider_addr, signer_fn(outsider));

        let mut header = next_header(&chain);
        clique.prepare(&chain, &mut header).unwrap();
        let result = clique.seal(&chain, &header, &AtomicBool::new(false));
        assert!(matches!(result, Err(ConsensusError::UnauthorizedSigner(a)) if a == outsider_addr));
    }

    #[test]
    fn signer_must_wait_its_turn() {
        let a = keypair_from_seed(&[1u8; 32]);
        let b = keypair_from_seed(&[2u8; 32]);
        let c = keypair_from_seed(&[3u8; 32]);
        let addr_a = derive_address(&a.public);
        let signers = [addr_a, derive_address(&b.public), derive_address(&c.public)];
        let (_db, clique, chain) = setup(&signers);
        clique.authorize(addr_a, signer_fn(a));

        let mut first = next_header(&chain);
        clique.prepare(&chain, &mut first).unwrap();
        let sealed = clique.seal(&chain, &first, &AtomicBool::new(false)).unwrap();
        clique.verify_header(&chain, &sealed, true).unwrap();
        chain.insert(sealed);

        let mut second = next_header(&chain);
        clique.prepare(&chain, &mut second).unwrap();
        let result = clique.seal(&chain, &second, &AtomicBool::new(false));
        assert!(matches!(result, Err(ConsensusError::RecentlySigned)));
    }

    #[test]
    fn tampered_seal_is_rejected() {
        let kp = keypair_from_seed(&[4u8; 32]);
        let signer = derive_address(&kp.public);
        let (_db, clique, chain) = setup(&[signer]);
        clique.authorize(signer, signer_fn(kp));

        let mut header = next_header(&chain);
        clique.prepare(&chain, &mut header).unwrap();
        let mut sealed = clique.seal(&chain, &header, &AtomicBool::new(false)).unwrap();
        sealed.gas_used = 1;
        assert!(matches!(
            clique.verify_header(&chain, &sealed, true),
            Err(ConsensusError::InvalidSignature)
        ));
    }

    #[test]
    fn short_extra_is_rejected() {
        let (_db, clique, chain) = setup(&[]);
        let mut header = next_header(&chain);
        header.difficulty = DIFF_IN_TURN;
        header.extra = vec![0u8; 10];
        assert!(matches!(
            clique.verify_header(&chain, &header, false),
            Err(ConsensusError::MissingVanity)
        ));
        header.extra = vec![0u8; EXTRA_VANITY + 10];
        assert!(matches!(
            clique.verify_header(&chain, &header, false),
            Err(ConsensusError::MissingSignature)
        ));
    }

    #[test]
    fn genesis_extra_layout() {
        let signers = [Address::new([2; 20]), Address::new([1; 20])];
        let extra = genesis_extra(b"vanity", &signers);
        assert_eq!(extra.len(), EXTRA_VANITY + 40 + EXTRA_SEAL);
        let header = Header { extra, ..Default::default() };
        let parsed = parse_checkpoint_signers(&header).unwrap();
        assert_eq!(parsed, vec![Address::new([1; 20]), Address::new([2; 20])]);
    }
}
