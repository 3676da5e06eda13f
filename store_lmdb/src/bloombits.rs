//! LMDB implementation of BloomBitsStore.

use ess_store::{BloomBitsStore, StoreError};
use ess_types::Hash;

use crate::{LmdbError, LmdbStore};

/// `bit (u16 BE) || section (u64 BE) || head hash`
fn bloom_bits_key(bit: u32, section: u64, head: &Hash) -> [u8; 42] {
    let mut key = [0u8; 42];
    key[..2].copy_from_slice(&(bit as u16).to_be_bytes());
    key[2..10].copy_from_slice(&section.to_be_bytes());
    key[10..].copy_from_slice(head.as_bytes());
    key
}

impl BloomBitsStore for LmdbStore {
    fn put_bloom_bits(
        &self,
        bit: u32,
        section: u64,
        head: &Hash,
        bits: &[u8],
    ) -> Result<(), StoreError> {
        self.put(self.bloom_bits_db, &bloom_bits_key(bit, section, head), bits)
    }

    fn get_bloom_bits(
        &self,
        bit: u32,
        section: u64,
        head: &Hash,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.get(self.bloom_bits_db, &bloom_bits_key(bit, section, head))
    }

    fn put_section_head(&self, section: u64, head: &Hash) -> Result<(), StoreError> {
        self.put(self.section_heads_db, &section.to_be_bytes(), head.as_bytes())
    }

    fn get_section_head(&self, section: u64) -> Result<Option<Hash>, StoreError> {
        match self.get(self.section_heads_db, &section.to_be_bytes())? {
            Some(bytes) => {
                let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                    LmdbError::Corruption("section head has unexpected byte length".into())
                })?;
                Ok(Some(Hash::new(arr)))
            }
            None => Ok(None),
        }
    }

    fn delete_section_head(&self, section: u64) -> Result<(), StoreError> {
        self.delete(self.section_heads_db, &section.to_be_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::DEFAULT_MAX_DBS;

    #[test]
    fn bloom_bits_are_keyed_by_section_head() {
        let dir = tempfile::tempdir().unwrap();
        let store = LmdbStore::open(dir.path(), DEFAULT_MAX_DBS, 10 * 1024 * 1024).unwrap();
        let head = Hash::digest(b"head-0");
        let other = Hash::digest(b"head-0-reorged");

        store.put_bloom_bits(2047, 0, &head, &[0xff; 512]).unwrap();
        store.put_section_head(0, &head).unwrap();

        assert_eq!(store.get_bloom_bits(2047, 0, &head).unwrap().unwrap().len(), 512);
        assert!(store.get_bloom_bits(2047, 0, &other).unwrap().is_none());
        assert!(store.get_bloom_bits(2046, 0, &head).unwrap().is_none());
        assert_eq!(store.get_section_head(0).unwrap(), Some(head));

        store.delete_section_head(0).unwrap();
        assert!(store.get_section_head(0).unwrap().is_none());
    }
}
