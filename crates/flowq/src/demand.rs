//! Outstanding-demand accounting.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Credits granted by a consumer and not yet consumed by delivery.
///
/// Additions saturate at `u64::MAX` (the unbounded sentinel), so a consumer
/// that keeps requesting can never wrap the counter. Padded to its own cache
/// line: the counter sits between a producer-side delivery loop and
/// consumer-side `request` calls on different cores.
#[derive(Debug, Default)]
pub struct Demand(CachePadded<AtomicU64>);

impl Demand {
    pub fn new() -> Self {
        Self(CachePadded::new(AtomicU64::new(0)))
    }

    /// Adds `n` credits, saturating at `u64::MAX`. Returns the new total.
    pub fn add(&self, n: u64) -> u64 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_add(n);
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Current outstanding credit.
    #[inline]
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Consumes one credit. Returns `false` without changing the counter when
    /// no credit is outstanding.
    pub fn try_take_one(&self) -> bool {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return false;
            }
            match self.0.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_take() {
        let demand = Demand::new();
        assert_eq!(demand.current(), 0);
        assert!(!demand.try_take_one());

        assert_eq!(demand.add(3), 3);
        assert!(demand.try_take_one());
        assert!(demand.try_take_one());
        assert!(demand.try_take_one());
        assert!(!demand.try_take_one());
    }

    #[test]
    fn saturates_at_unbounded() {
        let demand = Demand::new();
        demand.add(u64::MAX);
        assert_eq!(demand.add(10), u64::MAX);
        assert!(demand.try_take_one());
        assert_eq!(demand.current(), u64::MAX - 1);
    }

    #[test]
    fn concurrent_adds_accumulate() {
        use std::sync::Arc;

        let demand = Arc::new(Demand::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let demand = Arc::clone(&demand);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        demand.add(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(demand.current(), 4000);
    }
}
