//! Debug assertion macros for delivery invariants.
//!
//! Built on `debug_assert!`, so there is zero overhead in release builds.

/// Assert that an element is only delivered against outstanding demand.
macro_rules! debug_assert_demand_charged {
    ($demand:expr) => {
        debug_assert!(
            $demand > 0,
            "delivering an element without outstanding demand"
        )
    };
}

/// Assert that bounded-concurrency accounting never goes negative.
macro_rules! debug_assert_in_flight_accounted {
    ($in_flight:expr) => {
        debug_assert!(
            $in_flight > 0,
            "settling a transform that was never accounted as in flight"
        )
    };
}

pub(crate) use debug_assert_demand_charged;
pub(crate) use debug_assert_in_flight_accounted;
