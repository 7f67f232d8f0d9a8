//! Velocity-based delta scaling (the acceleration curve).
//!
//! ```text
//! velocity  = |delta| / max(elapsed, 0.0005)
//! gain      = 1 + acceleration * min(velocity / max(velocity_reference, 0.001), max_boost)
//! magnitude = round(|delta| * sensitivity * gain), at least 1
//! ```
//!
//! The result carries the sign of `delta`, flipped when `invert` is set. Pure
//! functions only; no device or thread context is needed to exercise them.

use crate::config::ScrollConfig;

/// Floor applied to the time between two rotation events.
pub const MIN_ELAPSED_SECS: f64 = 0.0005;

const MIN_VELOCITY_REFERENCE: f64 = 0.001;

/// Acceleration multiplier for a given angular velocity (ticks per second).
///
/// Bounded by `1 + acceleration * max_boost`.
#[inline]
pub fn gain(velocity: f64, config: &ScrollConfig) -> f64 {
    let reference = config.velocity_reference().max(MIN_VELOCITY_REFERENCE);
    1.0 + config.acceleration() * (velocity / reference).min(config.max_boost())
}

/// Map a raw rotation delta to a signed scroll line count.
///
/// Returns `0` only for `raw_delta == 0`; every other delta moves at least one line.
pub fn scale(raw_delta: i32, elapsed_secs: f64, config: &ScrollConfig) -> i32 {
    if raw_delta == 0 {
        return 0;
    }

    // `max` also swallows NaN.
    let elapsed = elapsed_secs.max(MIN_ELAPSED_SECS);
    let ticks = f64::from(raw_delta.unsigned_abs());
    let velocity = ticks / elapsed;

    // f64::round is half-away-from-zero; `as` saturates.
    let scaled = (ticks * config.sensitivity() * gain(velocity, config)).round();
    let magnitude = (scaled as i32).max(1);

    let signed = if raw_delta < 0 { -magnitude } else { magnitude };
    if config.invert() {
        -signed
    } else {
        signed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scenario() -> ScrollConfig {
        ScrollConfig::new(1.6, 0.55, 24.0, 2.0, false)
    }

    #[test]
    fn fast_turn_hits_boost_ceiling() {
        // velocity 100 > 2 * 24, so gain = 1 + 0.55 * 2.0 = 2.1; 5 * 1.6 * 2.1 = 16.8
        assert_eq!(scale(5, 0.05, &scenario()), 17);
    }

    #[test]
    fn slow_single_tick() {
        // gain = 1 + 0.55 / 24 ~ 1.0229; 1.6 * 1.0229 ~ 1.636
        assert_eq!(scale(-1, 1.0, &scenario()), -2);
    }

    #[test]
    fn invert_flips_both_scenarios() {
        let inverted = scenario().with_invert(true);
        assert_eq!(scale(5, 0.05, &inverted), -17);
        assert_eq!(scale(-1, 1.0, &inverted), 2);
    }

    #[test]
    fn zero_is_noop() {
        assert_eq!(scale(0, 0.1, &scenario()), 0);
        assert_eq!(scale(0, 0.0, &scenario().with_invert(true)), 0);
    }

    #[test]
    fn tiny_output_is_forced_to_one() {
        let weak = ScrollConfig::new(0.2, 0.0, 60.0, 0.0, false);
        // 1 * 0.2 * 1.0 rounds to 0
        assert_eq!(scale(1, 10.0, &weak), 1);
        assert_eq!(scale(-1, 10.0, &weak), -1);
    }

    #[test]
    fn zero_and_negative_elapsed_use_floor() {
        let c = scenario();
        assert_eq!(scale(3, 0.0, &c), scale(3, MIN_ELAPSED_SECS, &c));
        assert_eq!(scale(3, -4.0, &c), scale(3, MIN_ELAPSED_SECS, &c));
        assert_eq!(scale(3, f64::NAN, &c), scale(3, MIN_ELAPSED_SECS, &c));
    }

    #[test]
    fn half_rounds_away_from_zero() {
        // 5 * 0.5 * 1.0 = 2.5
        let c = ScrollConfig::new(0.5, 0.0, 24.0, 0.0, false);
        assert_eq!(scale(5, 1.0, &c), 3);
        assert_eq!(scale(-5, 1.0, &c), -3);
    }

    #[test]
    fn saturates_instead_of_overflowing() {
        let hot = ScrollConfig::new(8.0, 1.5, 5.0, 8.0, false);
        assert!(scale(i32::MAX, 0.0, &hot) > 0);
        assert!(scale(i32::MIN, 0.0, &hot) < 0);
    }

    fn any_config() -> impl Strategy<Value = ScrollConfig> {
        (
            0.2f64..=8.0,
            0.0f64..=1.5,
            5.0f64..=60.0,
            0.0f64..=8.0,
            any::<bool>(),
        )
            .prop_map(|(s, a, v, m, i)| ScrollConfig::new(s, a, v, m, i))
    }

    fn nonzero_delta() -> impl Strategy<Value = i32> {
        (-127i32..=127).prop_filter("non-zero", |d| *d != 0)
    }

    proptest! {
        #[test]
        fn every_tick_moves(d in nonzero_delta(), t in 0.0f64..5.0, c in any_config()) {
            prop_assert_ne!(scale(d, t, &c), 0);
        }

        #[test]
        fn odd_symmetric(d in 1i32..=127, t in 0.0f64..5.0, c in any_config()) {
            prop_assert_eq!(scale(-d, t, &c), -scale(d, t, &c));
        }

        #[test]
        fn invert_flips_sign(d in nonzero_delta(), t in 0.0f64..5.0, c in any_config()) {
            prop_assert_eq!(
                scale(d, t, &c.with_invert(true)),
                -scale(d, t, &c.with_invert(false))
            );
        }

        #[test]
        fn monotonic_in_magnitude(d in 1i32..127, t in 0.0f64..5.0, c in any_config()) {
            let c = c.with_invert(false);
            prop_assert!(scale(d + 1, t, &c) >= scale(d, t, &c));
        }

        #[test]
        fn gain_non_decreasing_and_capped(v in 0.0f64..10_000.0, dv in 0.0f64..1_000.0, c in any_config()) {
            let g = gain(v, &c);
            prop_assert!(gain(v + dv, &c) >= g);
            prop_assert!(g <= 1.0 + c.acceleration() * c.max_boost() + 1e-12);
            prop_assert!(g >= 1.0);
        }
    }
}
