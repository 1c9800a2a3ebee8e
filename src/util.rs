// src/util.rs
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use std::time::Duration;

/// Deterministic per-flow jitter in `[0, 1)` seconds, applied to a
/// connection's start time to decorrelate clients sharing one capture
/// (spec.md §6, `jitter_seed`). Re-seeding per connection index rather
/// than sharing one `StdRng` across connections keeps extraction and
/// replay order-independent: the jitter for connection *k* never
/// depends on how many connections were drawn before it.
pub fn start_time_jitter(jitter_seed: u64, connection_index: u64) -> Duration {
    let mut rng = StdRng::seed_from_u64(jitter_seed ^ connection_index.wrapping_mul(0x9E3779B97F4A7C15));
    Duration::from_secs_f64(rng.gen_range(0.0..1.0))
}

/// How long a buffer of `bytes` takes to drain at `data_rate` bytes/second
/// (spec.md §6, "data_rate: bytes/second used to compute buffer-drain
/// waits").
pub fn drain_wait(bytes: u64, data_rate: u64) -> Duration {
    if data_rate == 0 || bytes == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(bytes as f64 / data_rate as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_is_deterministic_for_same_seed_and_index() {
        let a = start_time_jitter(42, 3);
        let b = start_time_jitter(42, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn jitter_differs_across_connections() {
        let a = start_time_jitter(42, 1);
        let b = start_time_jitter(42, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn jitter_stays_within_one_second() {
        for i in 0..64 {
            let d = start_time_jitter(7, i);
            assert!(d < Duration::from_secs(1));
        }
    }

    #[test]
    fn drain_wait_scales_with_bytes() {
        assert_eq!(drain_wait(1_000_000, 1_000_000), Duration::from_secs(1));
        assert_eq!(drain_wait(0, 1_000_000), Duration::ZERO);
        assert_eq!(drain_wait(100, 0), Duration::ZERO);
    }
}
