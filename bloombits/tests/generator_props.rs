use proptest::prelude::*;

use ess_bloombits::BloomBitsGenerator;
use ess_types::{Bloom, BLOOM_BIT_LENGTH};

proptest! {
    /// Rotating a section and reading it back reproduces every bloom bit.
    #[test]
    fn rotation_preserves_bits(seeds in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..4), 8)) {
        let blooms: Vec<Bloom> = seeds
            .iter()
            .map(|items| {
                let mut bloom = Bloom::EMPTY;
                for item in items {
                    bloom.accrue(&[*item]);
                }
                bloom
            })
            .collect();

        let mut gen = BloomBitsGenerator::new(8).unwrap();
        for (i, bloom) in blooms.iter().enumerate() {
            gen.add_bloom(i as u64, bloom).unwrap();
        }
        for bit in 0..BLOOM_BIT_LENGTH as u32 {
            let vector = gen.bitset(bit).unwrap();
            for (i, bloom) in blooms.iter().enumerate() {
                let set = vector[i / 8] & (1 << (7 - i % 8)) != 0;
                prop_assert_eq!(set, bloom.is_set(bit));
            }
        }
    }
}
