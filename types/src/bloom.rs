//! 2048-bit log bloom filters.
//!
//! Every log address and topic sets three bits in its block's bloom. Bit `i`
//! lives in byte `BLOOM_BYTE_LENGTH - 1 - i / 8` under mask `1 << (i % 8)`; the
//! bloom-bits generator and the matcher rely on this layout.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::hash::blake2b_256;
use crate::transaction::Log;

/// Number of bytes in a bloom filter.
pub const BLOOM_BYTE_LENGTH: usize = 256;
/// Number of bits in a bloom filter.
pub const BLOOM_BIT_LENGTH: usize = 8 * BLOOM_BYTE_LENGTH;

/// A 2048-bit bloom filter over log addresses and topics.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Bloom([u8; BLOOM_BYTE_LENGTH]);

impl Default for Bloom {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Bloom {
    pub const EMPTY: Self = Self([0u8; BLOOM_BYTE_LENGTH]);

    pub fn new(bytes: [u8; BLOOM_BYTE_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; BLOOM_BYTE_LENGTH] {
        &self.0
    }

    /// The three bit indexes (each `< BLOOM_BIT_LENGTH`) that `data` sets.
    pub fn bit_indexes(data: &[u8]) -> [u32; 3] {
        let h = blake2b_256(data);
        let mut idxs = [0u32; 3];
        for (i, idx) in idxs.iter_mut().enumerate() {
            let pair = u16::from_be_bytes([h[2 * i], h[2 * i + 1]]);
            *idx = u32::from(pair) & (BLOOM_BIT_LENGTH as u32 - 1);
        }
        idxs
    }

    /// Whether bit `bit` is set.
    pub fn is_set(&self, bit: u32) -> bool {
        let bit = bit as usize;
        self.0[BLOOM_BYTE_LENGTH - 1 - bit / 8] & (1 << (bit % 8)) != 0
    }

    fn set(&mut self, bit: u32) {
        let bit = bit as usize;
        self.0[BLOOM_BYTE_LENGTH - 1 - bit / 8] |= 1 << (bit % 8);
    }

    /// Add `data` to the filter.
    pub fn accrue(&mut self, data: &[u8]) {
        for bit in Self::bit_indexes(data) {
            self.set(bit);
        }
    }

    /// Whether `data` may be in the filter.
    pub fn test(&self, data: &[u8]) -> bool {
        Self::bit_indexes(data).iter().all(|&bit| self.is_set(bit))
    }

    /// Merge another filter into this one.
    pub fn accrue_bloom(&mut self, other: &Bloom) {
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a |= b;
        }
    }

    /// Build the bloom of a set of logs (address and every topic).
    pub fn from_logs<'a>(logs: impl IntoIterator<Item = &'a Log>) -> Self {
        let mut bloom = Self::EMPTY;
        for log in logs {
            bloom.accrue(log.address.as_bytes());
            for topic in &log.topics {
                bloom.accrue(topic.as_bytes());
            }
        }
        bloom
    }
}

impl fmt::Debug for Bloom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = self.0.iter().map(|b| b.count_ones()).sum::<u32>();
        write!(f, "Bloom({set} bits set)")
    }
}

impl Serialize for Bloom {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        crate::bytes::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Bloom {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        crate::bytes::deserialize::<D, BLOOM_BYTE_LENGTH>(deserializer).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Address, Hash};

    #[test]
    fn accrued_data_tests_positive() {
        let mut bloom = Bloom::default();
        bloom.accrue(b"hello");
        assert!(bloom.test(b"hello"));
        for bit in Bloom::bit_indexes(b"hello") {
            assert!(bloom.is_set(bit));
        }
    }

    #[test]
    fn empty_bloom_tests_negative() {
        assert!(!Bloom::EMPTY.test(b"anything"));
    }

    #[test]
    fn bit_layout_is_big_endian_by_byte() {
        let mut bloom = Bloom::default();
        bloom.set(0);
        assert_eq!(bloom.as_bytes()[BLOOM_BYTE_LENGTH - 1], 1);
        bloom.set(2047);
        assert_eq!(bloom.as_bytes()[0], 0x80);
    }

    #[test]
    fn from_logs_covers_address_and_topics() {
        let log = Log {
            address: Address::new([9; 20]),
            topics: vec![Hash::new([1; 32]), Hash::new([2; 32])],
            data: Vec::new(),
        };
        let bloom = Bloom::from_logs([&log]);
        assert!(bloom.test(&[9; 20]));
        assert!(bloom.test(&[1; 32]));
        assert!(bloom.test(&[2; 32]));
    }

    #[test]
    fn bincode_roundtrip() {
        let mut bloom = Bloom::default();
        bloom.accrue(b"roundtrip");
        let encoded = bincode::serialize(&bloom).unwrap();
        let decoded: Bloom = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded, bloom);
    }
}
