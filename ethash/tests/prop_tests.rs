use std::sync::atomic::AtomicBool;

use proptest::prelude::*;

use ess_ethash::{mix_digest, work_target, work_value, Ethash, EpochCache};
use ess_types::{Hash, Header};

proptest! {
    /// A tester seal always passes its own verification.
    #[test]
    fn tester_seal_always_valid(
        number in 0u64..100_000,
        start_nonce in any::<u64>(),
        extra in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        let engine = Ethash::new_tester();
        let header = Header { number, difficulty: 1, extra, ..Default::default() };
        let sealed = engine.seal(&header, start_nonce, &AtomicBool::new(false)).unwrap();
        prop_assert!(engine.verify_seal(&sealed).is_ok());
    }

    /// Raising the difficulty never lowers the target.
    #[test]
    fn target_is_monotonic(a in 1u64.., b in 1u64..) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(work_target(lo).unwrap() <= work_target(hi).unwrap());
    }

    /// Work value and mix digest are deterministic.
    #[test]
    fn work_is_deterministic(bytes in prop::array::uniform32(0u8..), nonce in any::<u64>(), epoch in 0u64..8) {
        let seal = Hash::new(bytes);
        let seed = EpochCache::new(1, 0, None).seed(epoch);
        prop_assert_eq!(work_value(&seal, &seed, nonce), work_value(&seal, &seed, nonce));
        prop_assert_eq!(mix_digest(&seal, &seed), mix_digest(&seal, &seed));
    }
}
