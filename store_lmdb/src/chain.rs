//! LMDB implementation of ChainStore.

use ess_store::{ChainStore, StoreError};
use ess_types::Hash;

use crate::{LmdbError, LmdbStore};

const HEAD_HEADER_KEY: &[u8] = b"LastHeader";

fn decode_hash(bytes: Vec<u8>) -> Result<Hash, StoreError> {
    let arr: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| LmdbError::Corruption(format!("hash of {} bytes", bytes.len())))?;
    Ok(Hash::new(arr))
}

impl ChainStore for LmdbStore {
    fn put_header(&self, hash: &Hash, number: u64, header: &[u8]) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        self.headers_db
            .put(&mut wtxn, hash.as_bytes(), header)
            .map_err(LmdbError::from)?;
        self.header_numbers_db
            .put(&mut wtxn, hash.as_bytes(), &number.to_be_bytes())
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn get_header(&self, hash: &Hash) -> Result<Option<Vec<u8>>, StoreError> {
        self.get(self.headers_db, hash.as_bytes())
    }

    fn get_header_number(&self, hash: &Hash) -> Result<Option<u64>, StoreError> {
        match self.get(self.header_numbers_db, hash.as_bytes())? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    LmdbError::Corruption("header number has unexpected byte length".into())
                })?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    fn put_body(&self, hash: &Hash, body: &[u8]) -> Result<(), StoreError> {
        self.put(self.bodies_db, hash.as_bytes(), body)
    }

    fn get_body(&self, hash: &Hash) -> Result<Option<Vec<u8>>, StoreError> {
        self.get(self.bodies_db, hash.as_bytes())
    }

    fn put_receipts(&self, hash: &Hash, receipts: &[u8]) -> Result<(), StoreError> {
        self.put(self.receipts_db, hash.as_bytes(), receipts)
    }

    fn get_receipts(&self, hash: &Hash) -> Result<Option<Vec<u8>>, StoreError> {
        self.get(self.receipts_db, hash.as_bytes())
    }

    fn put_canonical_hash(&self, number: u64, hash: &Hash) -> Result<(), StoreError> {
        self.put(self.canonical_db, &number.to_be_bytes(), hash.as_bytes())
    }

    fn get_canonical_hash(&self, number: u64) -> Result<Option<Hash>, StoreError> {
        self.get(self.canonical_db, &number.to_be_bytes())?
            .map(decode_hash)
            .transpose()
    }

    fn delete_canonical_hash(&self, number: u64) -> Result<(), StoreError> {
        self.delete(self.canonical_db, &number.to_be_bytes())
    }

    fn put_head_header_hash(&self, hash: &Hash) -> Result<(), StoreError> {
        self.put(self.meta_db, HEAD_HEADER_KEY, hash.as_bytes())
    }

    fn get_head_header_hash(&self) -> Result<Option<Hash>, StoreError> {
        self.get(self.meta_db, HEAD_HEADER_KEY)?
            .map(decode_hash)
            .transpose()
    }

    fn put_chain_config(&self, genesis: &Hash, config: &[u8]) -> Result<(), StoreError> {
        self.put(self.chain_config_db, genesis.as_bytes(), config)
    }

    fn get_chain_config(&self, genesis: &Hash) -> Result<Option<Vec<u8>>, StoreError> {
        self.get(self.chain_config_db, genesis.as_bytes())
    }
}
