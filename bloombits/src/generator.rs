//! Rotation of one section of header blooms into per-bit vectors.

use ess_types::{Bloom, BLOOM_BIT_LENGTH};

use crate::BloomError;

/// Takes a section of sequential blooms and produces one bit vector per bloom
/// bit. Bit `i` (MSB first) of vector `b` is set when block `i` of the section
/// has bloom bit `b` set.
pub struct BloomBitsGenerator {
    section_size: u64,
    blooms: Vec<Vec<u8>>,
    next: u64,
}

impl BloomBitsGenerator {
    pub fn new(section_size: u64) -> Result<Self, BloomError> {
        if section_size == 0 || section_size % 8 != 0 {
            return Err(BloomError::InvalidSectionSize(section_size));
        }
        let bytes = (section_size / 8) as usize;
        Ok(Self {
            section_size,
            blooms: vec![vec![0u8; bytes]; BLOOM_BIT_LENGTH],
            next: 0,
        })
    }

    /// Add the bloom of the block at `index` within the section. Indexes
    /// must arrive in order.
    pub fn add_bloom(&mut self, index: u64, bloom: &Bloom) -> Result<(), BloomError> {
        if self.next >= self.section_size {
            return Err(BloomError::SectionFull);
        }
        if index != self.next {
            return Err(BloomError::OutOfOrder {
                expected: self.next,
                got: index,
            });
        }
        let byte = (index / 8) as usize;
        let mask = 1u8 << (7 - index % 8);
        for bit in 0..BLOOM_BIT_LENGTH as u32 {
            if bloom.is_set(bit) {
                self.blooms[bit as usize][byte] |= mask;
            }
        }
        self.next += 1;
        Ok(())
    }

    /// The bit vector of bloom bit `bit`; only once the section is complete.
    pub fn bitset(&self, bit: u32) -> Result<&[u8], BloomError> {
        if self.next != self.section_size {
            return Err(BloomError::SectionIncomplete);
        }
        self.blooms
            .get(bit as usize)
            .map(Vec::as_slice)
            .ok_or(BloomError::BitOutOfRange(bit))
    }
}
