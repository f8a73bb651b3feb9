//! # Fibonacci Backoff
//!
//! Backoff between optimistic-concurrency retries. Delays grow along the
//! Fibonacci sequence in milliseconds (10, 10, 20, 30, 50, ...), capped, with
//! up to 50% random jitter so competing replicas do not retry in lockstep.

use rand::Rng;
use std::time::Duration;

/// Fibonacci backoff calculator
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum backoff value in milliseconds (for reset)
    min_millis: u64,
    /// Previous backoff value in milliseconds
    prev_millis: u64,
    /// Current backoff value in milliseconds
    current_millis: u64,
    /// Maximum backoff value in milliseconds
    max_millis: u64,
}

impl FibonacciBackoff {
    /// Create a new backoff with minimum and maximum values in milliseconds
    #[must_use]
    pub fn new(min_millis: u64, max_millis: u64) -> Self {
        Self {
            min_millis,
            prev_millis: 0,
            current_millis: min_millis,
            max_millis,
        }
    }

    /// Next delay without jitter, advancing the sequence
    pub fn next_millis(&mut self) -> u64 {
        let result = self.current_millis;
        let next = self.prev_millis + self.current_millis;
        self.prev_millis = self.current_millis;
        self.current_millis = next.min(self.max_millis);
        result
    }

    /// Next delay with jitter, advancing the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let base = self.next_millis();
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        Duration::from_millis(base + jitter)
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_millis = 0;
        self.current_millis = self.min_millis;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(10, 100);

        assert_eq!(backoff.next_millis(), 10);
        assert_eq!(backoff.next_millis(), 10);
        assert_eq!(backoff.next_millis(), 20);
        assert_eq!(backoff.next_millis(), 30);
        assert_eq!(backoff.next_millis(), 50);
        assert_eq!(backoff.next_millis(), 80);
        assert_eq!(backoff.next_millis(), 100); // capped
        assert_eq!(backoff.next_millis(), 100);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(10, 100);
        backoff.next_millis();
        backoff.next_millis();
        backoff.next_millis();

        backoff.reset();

        assert_eq!(backoff.next_millis(), 10);
        assert_eq!(backoff.next_millis(), 10);
        assert_eq!(backoff.next_millis(), 20);
    }

    #[test]
    fn test_jitter_bounds() {
        let mut backoff = FibonacciBackoff::new(10, 100);
        for expected in [10u64, 10, 20, 30] {
            let delay = backoff.next_backoff().as_millis() as u64;
            assert!(delay >= expected && delay <= expected + expected / 2);
        }
    }
}
