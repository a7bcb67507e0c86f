//! Pure capacity math: busy rating → usable units, and denial backoff.

use rand::Rng;

/// Fraction of total capacity usable at each integer busy rating.
///
/// Conservative by construction: the curve drops fast past busy 5 and hits
/// zero at 10, so a saturated host never grants new leases.
pub const BUSY_TO_PERCENT: [f64; 11] = [
    1.00, 1.00, 1.00, 0.80, 0.65, 0.50, 0.35, 0.25, 0.15, 0.10, 0.00,
];

/// Maximum retry-after handed to a denied worker.
pub const RETRY_AFTER_CAP_MS: u64 = 30_000;

/// Round a raw busy rating to the integer bucket used for capacity lookup.
pub fn round_busy(busy: f64) -> u8 {
    busy.clamp(0.0, 10.0).round() as u8
}

/// Usable capacity at a given busy rating.
///
/// `usable = floor(total * percent[busy]) - reserve`, floored at 0.
pub fn usable_capacity_units(busy: u8, total_units: u32, reserve_units: u32) -> u32 {
    let busy = busy.min(10) as usize;
    let usable = (total_units as f64 * BUSY_TO_PERCENT[busy]).floor() as i64 - reserve_units as i64;
    usable.max(0) as u32
}

/// Denial backoff: doubles per busy point above 3, capped, with ±10% jitter.
pub fn retry_after_ms(busy: u8, base_ms: u64) -> u64 {
    let exp = busy.min(10).saturating_sub(3) as u32;
    let raw = base_ms.saturating_mul(1u64 << exp.min(16)).min(RETRY_AFTER_CAP_MS);
    let jitter = rand::thread_rng().gen_range(0.9..=1.1);
    ((raw as f64) * jitter).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usable_follows_table() {
        assert_eq!(usable_capacity_units(0, 100, 0), 100);
        assert_eq!(usable_capacity_units(3, 100, 0), 80);
        assert_eq!(usable_capacity_units(5, 100, 0), 50);
        assert_eq!(usable_capacity_units(10, 100, 0), 0);
    }

    #[test]
    fn reserve_is_subtracted_and_floored() {
        assert_eq!(usable_capacity_units(0, 100, 5), 95);
        assert_eq!(usable_capacity_units(9, 100, 20), 0);
        assert_eq!(usable_capacity_units(10, 100, 0), 0);
    }

    #[test]
    fn usable_is_monotonic_in_busy() {
        for total in [1u32, 10, 100, 1000] {
            for reserve in [0u32, 1, 5] {
                let mut prev = u32::MAX;
                for busy in 0..=10u8 {
                    let usable = usable_capacity_units(busy, total, reserve);
                    assert!(usable <= prev, "usable must not increase with busy");
                    prev = usable;
                }
            }
        }
    }

    #[test]
    fn round_busy_clamps() {
        assert_eq!(round_busy(-3.0), 0);
        assert_eq!(round_busy(4.4), 4);
        assert_eq!(round_busy(4.6), 5);
        assert_eq!(round_busy(25.0), 10);
    }

    #[test]
    fn retry_after_scales_with_pressure() {
        // busy <= 3 stays at base, busy 5 is 4x base, always within jitter.
        for _ in 0..50 {
            let at_idle = retry_after_ms(0, 375);
            assert!((337..=413).contains(&at_idle), "got {at_idle}");

            let at_five = retry_after_ms(5, 375);
            assert!((1350..=1650).contains(&at_five), "got {at_five}");

            let at_ten = retry_after_ms(10, 375);
            assert!(at_ten <= 33_000);
        }
    }
}
