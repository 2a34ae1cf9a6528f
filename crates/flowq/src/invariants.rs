//! Debug assertion macros for link invariants.
//!
//! Built on `debug_assert!`, so there is zero overhead in release builds.

/// Assert that a queue never holds more than its capacity in elements, plus
/// the single terminal event that may ride behind them.
macro_rules! debug_assert_bounded_queue {
    ($len:expr, $capacity:expr) => {
        debug_assert!(
            $len <= $capacity + 1,
            "buffered {} events with capacity {}: upstream delivered beyond granted demand",
            $len,
            $capacity
        )
    };
}

/// Assert that an element is only delivered against outstanding demand.
macro_rules! debug_assert_demand_charged {
    ($demand:expr) => {
        debug_assert!(
            $demand > 0,
            "delivering an element without outstanding demand"
        )
    };
}

pub(crate) use debug_assert_bounded_queue;
pub(crate) use debug_assert_demand_charged;
