use proptest::prelude::*;

use ess_types::{Address, Bloom, Hash, Header, BLOOM_BIT_LENGTH};

proptest! {
    /// Hash bincode serialization roundtrip.
    #[test]
    fn hash_bincode_roundtrip(bytes in prop::array::uniform32(0u8..)) {
        let hash = Hash::new(bytes);
        let encoded = bincode::serialize(&hash).unwrap();
        let decoded: Hash = bincode::deserialize(&encoded).unwrap();
        prop_assert_eq!(decoded, hash);
    }

    /// Address display output parses back to the same address.
    #[test]
    fn address_display_parses(bytes in prop::array::uniform20(0u8..)) {
        let addr = Address::new(bytes);
        let parsed: Address = addr.to_string().parse().unwrap();
        prop_assert_eq!(parsed, addr);
    }

    /// Bloom bit indexes are always within the filter.
    #[test]
    fn bloom_indexes_in_range(data in prop::collection::vec(any::<u8>(), 0..64)) {
        for bit in Bloom::bit_indexes(&data) {
            prop_assert!((bit as usize) < BLOOM_BIT_LENGTH);
        }
    }

    /// Anything accrued into a bloom always tests positive.
    #[test]
    fn bloom_has_no_false_negatives(items in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..32), 1..16)) {
        let mut bloom = Bloom::default();
        for item in &items {
            bloom.accrue(item);
        }
        for item in &items {
            prop_assert!(bloom.test(item));
        }
    }

    /// Headers with different numbers never share a hash.
    #[test]
    fn header_hash_distinguishes_numbers(a in any::<u64>(), b in any::<u64>()) {
        prop_assume!(a != b);
        let ha = Header { number: a, ..Default::default() }.hash();
        let hb = Header { number: b, ..Default::default() }.hash();
        prop_assert_ne!(ha, hb);
    }
}
