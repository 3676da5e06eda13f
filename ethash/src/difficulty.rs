//! Difficulty adjustment.
//!
//! Blocks arriving faster than [`DURATION_LIMIT`] after their parent raise the
//! difficulty by `parent / DIFFICULTY_BOUND_DIVISOR`; slower blocks lower it by
//! the same step, never below [`MINIMUM_DIFFICULTY`].

use ess_types::Header;

pub const MINIMUM_DIFFICULTY: u64 = 131_072;
pub const DIFFICULTY_BOUND_DIVISOR: u64 = 2048;
pub const DURATION_LIMIT: u64 = 13;

/// Difficulty a child of `parent` created at `time` must carry.
pub fn calc_difficulty(time: u64, parent: &Header) -> u64 {
    let step = parent.difficulty / DIFFICULTY_BOUND_DIVISOR;
    let next = if time.saturating_sub(parent.timestamp) < DURATION_LIMIT {
        parent.difficulty.saturating_add(step)
    } else {
        parent.difficulty.saturating_sub(step)
    };
    next.max(MINIMUM_DIFFICULTY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent(difficulty: u64, timestamp: u64) -> Header {
        Header {
            difficulty,
            timestamp,
            ..Default::default()
        }
    }

    #[test]
    fn fast_block_raises_difficulty() {
        let p = parent(1_000_000, 100);
        assert_eq!(calc_difficulty(105, &p), 1_000_000 + 1_000_000 / 2048);
    }

    #[test]
    fn slow_block_lowers_difficulty() {
        let p = parent(1_000_000, 100);
        assert_eq!(calc_difficulty(200, &p), 1_000_000 - 1_000_000 / 2048);
    }

    #[test]
    fn never_below_minimum() {
        let p = parent(MINIMUM_DIFFICULTY, 0);
        assert_eq!(calc_difficulty(1_000, &p), MINIMUM_DIFFICULTY);
        assert_eq!(calc_difficulty(1_000, &parent(1, 0)), MINIMUM_DIFFICULTY);
    }
}
