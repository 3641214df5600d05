//! Retry backoff calculation for the Delivery Engine.

use std::time::Duration;

/// `delay = min(initial * multiplier^retry_count, ceiling)`.
///
/// Doubling is computed iteratively, clamping to `ceiling` on every step,
/// so a large `retry_count` can never overflow the duration arithmetic.
pub fn compute_backoff(
    retry_count: u32,
    initial: Duration,
    multiplier: f64,
    ceiling: Duration,
) -> Duration {
    let mut delay = initial.min(ceiling);
    for _ in 0..retry_count {
        let scaled = delay.as_secs_f64() * multiplier;
        delay = Duration::from_secs_f64(scaled.min(ceiling.as_secs_f64()));
        if delay >= ceiling {
            return ceiling;
        }
    }
    delay.min(ceiling)
}
