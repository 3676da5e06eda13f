//! Chain storage trait: headers, bodies, receipts, canonical index.

use ess_types::Hash;

use crate::StoreError;

/// Storage for chain data.
///
/// Values are opaque encoded bytes; the chain crate owns their format.
pub trait ChainStore {
    /// Store an encoded header together with its number index.
    fn put_header(&self, hash: &Hash, number: u64, header: &[u8]) -> Result<(), StoreError>;

    fn get_header(&self, hash: &Hash) -> Result<Option<Vec<u8>>, StoreError>;

    /// Block number of a stored header.
    fn get_header_number(&self, hash: &Hash) -> Result<Option<u64>, StoreError>;

    fn put_body(&self, hash: &Hash, body: &[u8]) -> Result<(), StoreError>;

    fn get_body(&self, hash: &Hash) -> Result<Option<Vec<u8>>, StoreError>;

    fn put_receipts(&self, hash: &Hash, receipts: &[u8]) -> Result<(), StoreError>;

    fn get_receipts(&self, hash: &Hash) -> Result<Option<Vec<u8>>, StoreError>;

    /// Assign the canonical block hash at `number`.
    fn put_canonical_hash(&self, number: u64, hash: &Hash) -> Result<(), StoreError>;

    fn get_canonical_hash(&self, number: u64) -> Result<Option<Hash>, StoreError>;

    fn delete_canonical_hash(&self, number: u64) -> Result<(), StoreError>;

    /// Hash of the current head header.
    fn put_head_header_hash(&self, hash: &Hash) -> Result<(), StoreError>;

    fn get_head_header_hash(&self) -> Result<Option<Hash>, StoreError>;

    /// Store the encoded chain configuration of the chain rooted at `genesis`.
    fn put_chain_config(&self, genesis: &Hash, config: &[u8]) -> Result<(), StoreError>;

    fn get_chain_config(&self, genesis: &Hash) -> Result<Option<Vec<u8>>, StoreError>;
}
