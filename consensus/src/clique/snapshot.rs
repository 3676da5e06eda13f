//! Signer snapshots: the authorized signer set and recent signers at a block.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use ess_store::MetaStore;
use ess_types::{Address, Hash, Header};

use super::{ecrecover, parse_checkpoint_signers};
use crate::ConsensusError;

/// The state of the authorization set at a given block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub number: u64,
    pub hash: Hash,
    pub signers: BTreeSet<Address>,
    /// Block number → signer of that block, for the spam-protection window.
    pub recents: BTreeMap<u64, Address>,
}

fn snapshot_key(hash: &Hash) -> String {
    format!("clique-{hash}")
}

impl Snapshot {
    pub fn new(number: u64, hash: Hash, signers: impl IntoIterator<Item = Address>) -> Self {
        Self {
            number,
            hash,
            signers: signers.into_iter().collect(),
            recents: BTreeMap::new(),
        }
    }

    pub fn load<S: MetaStore + ?Sized>(db: &S, hash: &Hash) -> Result<Option<Self>, ConsensusError> {
        match db.get_meta(&snapshot_key(hash))? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| ConsensusError::Snapshot(e.to_string())),
            None => Ok(None),
        }
    }

    pub fn store<S: MetaStore + ?Sized>(&self, db: &S) -> Result<(), ConsensusError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| ConsensusError::Snapshot(e.to_string()))?;
        db.put_meta(&snapshot_key(&self.hash), &bytes)?;
        Ok(())
    }

    /// Signers in ascending order.
    pub fn signers(&self) -> Vec<Address> {
        self.signers.iter().copied().collect()
    }

    /// Whether `signer` is the designated in-turn signer at `number`.
    pub fn in_turn(&self, number: u64, signer: &Address) -> bool {
        if self.signers.is_empty() {
            return false;
        }
        match self.signers.iter().position(|s| s == signer) {
            Some(offset) => number % self.signers.len() as u64 == offset as u64,
            None => false,
        }
    }

    /// Number of consecutive blocks within which a signer may sign once.
    pub fn recent_limit(&self) -> u64 {
        self.signers.len() as u64 / 2 + 1
    }

    /// Whether `signer` is barred from signing block `number`.
    pub fn signed_recently(&self, number: u64, signer: &Address) -> bool {
        let limit = self.recent_limit();
        self.recents
            .iter()
            .any(|(seen, recent)| recent == signer && number < seen + limit)
    }

    /// Apply a contiguous run of headers on top of this snapshot.
    pub fn apply(&self, headers: &[Header], epoch: u64) -> Result<Snapshot, ConsensusError> {
        let mut snap = self.clone();
        for header in headers {
            if header.number != snap.number + 1 {
                return Err(ConsensusError::Snapshot(format!(
                    "non-contiguous header {} after {}",
                    header.number, snap.number
                )));
            }
            let number = header.number;
            let limit = snap.recent_limit();
            if number >= limit {
                snap.recents.remove(&(number - limit));
            }

            let signer = ecrecover(header)?;
            if !snap.signers.contains(&signer) {
                return Err(ConsensusError::UnauthorizedSigner(signer));
            }
            if snap.recents.values().any(|s| *s == signer) {
                return Err(ConsensusError::RecentlySigned);
            }
            snap.recents.insert(number, signer);

            if epoch > 0 && number % epoch == 0 {
                let signers = parse_checkpoint_signers(header)?;
                if !signers.is_empty() {
                    snap.signers = signers.into_iter().collect();
                    let limit = snap.recent_limit();
                    snap.recents.retain(|seen, _| number < seen + limit);
                }
            }

            snap.number = number;
            snap.hash = header.hash();
        }
        Ok(snap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ess_nullables::NullStore;

    fn addr(b: u8) -> Address {
        Address::new([b; 20])
    }

    #[test]
    fn in_turn_rotates_through_sorted_signers() {
        let snap = Snapshot::new(0, Hash::ZERO, [addr(3), addr(1), addr(2)]);
        assert!(snap.in_turn(0, &addr(1)));
        assert!(snap.in_turn(1, &addr(2)));
        assert!(snap.in_turn(5, &addr(3)));
        assert!(!snap.in_turn(5, &addr(1)));
        assert!(!snap.in_turn(0, &addr(9)));
    }

    #[test]
    fn recent_window() {
        let mut snap = Snapshot::new(0, Hash::ZERO, [addr(1), addr(2), addr(3)]);
        assert_eq!(snap.recent_limit(), 2);
        snap.recents.insert(10, addr(1));
        assert!(snap.signed_recently(11, &addr(1)));
        assert!(!snap.signed_recently(12, &addr(1)));
        assert!(!snap.signed_recently(11, &addr(2)));
    }

    #[test]
    fn persisted_as_json_under_hash() {
        let db = NullStore::new();
        let hash = Hash::digest(b"checkpoint");
        let mut snap = Snapshot::new(1024, hash, [addr(1)]);
        snap.recents.insert(1024, addr(1));
        snap.store(&db).unwrap();

        let raw = db.get_meta(&snapshot_key(&hash)).unwrap().unwrap();
        assert!(serde_json::from_slice::<serde_json::Value>(&raw).is_ok());
        assert_eq!(Snapshot::load(&db, &hash).unwrap(), Some(snap));
        assert_eq!(Snapshot::load(&db, &Hash::ZERO).unwrap(), None);
    }
}
