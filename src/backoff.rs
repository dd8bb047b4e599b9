//! Retry delay ladders for reconnection backoff.
//!
//! Delays advance monotonically within a ladder and saturate at the top
//! tier. The reset value sits one millisecond below the first tier so that
//! the very next advance lands on the first tier again.

use std::time::Duration;

/// Tier ladder for ordinary transient failures.
pub const NORMAL_TIERS: [u64; 7] = [250, 500, 1000, 2000, 4000, 8000, 10_000];

/// Tier ladder for server-signalled rate limits.
pub const SLOW_TIERS: [u64; 4] = [2000, 30_000, 60_000, 300_000];

/// First tier strictly greater than `current`, saturating at the top.
pub fn advance(ladder: &[u64], current: Duration) -> Duration {
    let current_ms = current.as_millis() as u64;
    let next = ladder
        .iter()
        .copied()
        .find(|&tier| tier > current_ms)
        .unwrap_or_else(|| *ladder.last().expect("ladder is non-empty"));
    Duration::from_millis(next)
}

/// Delay value that makes the next [`advance`] yield the ladder's first
/// tier.
pub fn reset(ladder: &[u64]) -> Duration {
    Duration::from_millis(ladder.first().expect("ladder is non-empty") - 1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn advances_through_every_normal_tier() {
        let mut delay = reset(&NORMAL_TIERS);
        let mut seen = Vec::new();
        for _ in 0..NORMAL_TIERS.len() {
            delay = advance(&NORMAL_TIERS, delay);
            seen.push(delay.as_millis() as u64);
        }
        assert_eq!(seen, NORMAL_TIERS);
    }

    #[test]
    fn saturates_at_top_tier() {
        let top = Duration::from_millis(*NORMAL_TIERS.last().unwrap());
        assert_eq!(advance(&NORMAL_TIERS, top), top);
        assert_eq!(
            advance(&NORMAL_TIERS, Duration::from_millis(999_999)),
            top
        );
    }

    #[test]
    fn reset_is_one_below_first_tier() {
        assert_eq!(reset(&NORMAL_TIERS), Duration::from_millis(249));
        assert_eq!(reset(&SLOW_TIERS), Duration::from_millis(1999));
    }

    #[test]
    fn mid_tier_values_advance_to_next_tier() {
        assert_eq!(
            advance(&NORMAL_TIERS, Duration::from_millis(300)),
            Duration::from_millis(500)
        );
        assert_eq!(
            advance(&SLOW_TIERS, Duration::from_millis(2000)),
            Duration::from_millis(30_000)
        );
    }
}
