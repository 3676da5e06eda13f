//! Bloom-bits storage trait.

use ess_types::Hash;

use crate::StoreError;

/// Storage for bloom sections.
///
/// A section is stored as one bit vector per bloom bit, keyed by the hash of
/// the section's last header so that vectors of a section that was later
/// reorganised away are never served.
pub trait BloomBitsStore {
    fn put_bloom_bits(&self, bit: u32, section: u64, head: &Hash, bits: &[u8])
        -> Result<(), StoreError>;

    fn get_bloom_bits(&self, bit: u32, section: u64, head: &Hash)
        -> Result<Option<Vec<u8>>, StoreError>;

    /// Record the hash of the last header of a completed section.
    fn put_section_head(&self, section: u64, head: &Hash) -> Result<(), StoreError>;

    fn get_section_head(&self, section: u64) -> Result<Option<Hash>, StoreError>;

    fn delete_section_head(&self, section: u64) -> Result<(), StoreError>;
}
