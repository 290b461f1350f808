use strata_primitives::constants::{GAS_LIMIT_BOUND_DIVISOR, MIN_GAS_LIMIT};

/// Compute the gas limit the child of `parent` is allowed to target.
///
/// The limit drifts toward the configured `[floor, ceiling]` band, bounded to
/// less than a 1/1024th change per block. The clamp is asymmetric on purpose:
/// outside the band the limit only moves toward it by one decay step, so a
/// limit above the ceiling always decreases regardless of usage.
pub fn next_gas_limit(
    parent_gas_used: u64,
    parent_gas_limit: u64,
    floor: u64,
    ceiling: u64,
) -> u64 {
    // Usage above 2/3 of the limit pushes the limit up, below pulls it down.
    let contribution = (parent_gas_used + parent_gas_used / 2) / GAS_LIMIT_BOUND_DIVISOR;
    let decay = parent_gas_limit / GAS_LIMIT_BOUND_DIVISOR - 1;

    let mut limit = parent_gas_limit - decay + contribution;
    if limit < MIN_GAS_LIMIT {
        limit = MIN_GAS_LIMIT;
    }

    if limit < floor {
        limit = parent_gas_limit + decay;
        if limit > floor {
            limit = floor;
        }
    } else if limit > ceiling {
        limit = parent_gas_limit - decay;
        if limit < ceiling {
            limit = ceiling;
        }
    }
    limit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_band_computation_is_unclamped() {
        // contribution = (15e6 + 7.5e6) / 1024, decay = 20e6 / 1024 - 1.
        let limit = next_gas_limit(15_000_000, 20_000_000, 8_000_000, 30_000_000);
        assert_eq!((15_000_000u64 + 7_500_000) / 1024, 21_972);
        assert_eq!(20_000_000u64 / 1024 - 1, 19_530);
        assert_eq!(limit, 20_002_442);
    }

    #[test]
    fn two_thirds_usage_is_a_fixpoint() {
        let parent = 30_000_000;
        let limit = next_gas_limit(parent * 2 / 3, parent, 5_000, u64::MAX);
        assert!(limit.abs_diff(parent) <= 1);
    }

    #[test]
    fn never_below_protocol_minimum() {
        let limit = next_gas_limit(0, MIN_GAS_LIMIT, MIN_GAS_LIMIT, u64::MAX);
        assert_eq!(limit, MIN_GAS_LIMIT);
    }

    #[test]
    fn drifts_up_toward_the_floor_without_overshooting() {
        // Zero usage would pull the limit down, but the floor is above it.
        let parent = 20_000_000;
        let decay = parent / 1024 - 1;
        let limit = next_gas_limit(0, parent, 25_000_000, 30_000_000);
        assert_eq!(limit, parent + decay);

        // Close to the floor the step is capped at the floor itself.
        let near_floor = 24_999_000;
        let limit = next_gas_limit(0, near_floor, 25_000_000, 30_000_000);
        assert_eq!(limit, 25_000_000);
    }

    #[test]
    fn always_decreases_above_the_ceiling() {
        // Full blocks would push the limit up, but the ceiling forces a
        // decay step down.
        let parent = 20_000_000;
        let limit = next_gas_limit(parent, parent, 8_000_000, 19_990_000);
        assert_eq!(limit, 19_990_000);

        // Far above the ceiling the limit falls by exactly one decay step.
        let parent = 40_000_000;
        let decay = parent / 1024 - 1;
        let limit = next_gas_limit(parent, parent, 8_000_000, 20_000_000);
        assert_eq!(limit, parent - decay);
    }
}
