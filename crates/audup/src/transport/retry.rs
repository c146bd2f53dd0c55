//! Retry policy shared by both transport variants.

use std::fmt::Display;
use std::time::Duration;

use log::warn;

use crate::error::TransportError;

/// Bounded retry with a fixed inter-attempt delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Immediate retries, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Runs `op` until it succeeds or the attempt budget is exhausted.
    /// Every failed attempt is logged and counted; the last error is
    /// carried in the returned [`TransportError::RetriesExhausted`].
    pub fn run<T, E, F>(&self, what: &str, mut op: F) -> Result<T, TransportError>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
    {
        let mut last = String::new();
        for attempt in 1..=self.max_attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        "{} attempt {}/{} failed: {}",
                        what, attempt, self.max_attempts, e
                    );
                    last = e.to_string();
                    if attempt < self.max_attempts && !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                }
            }
        }

        Err(TransportError::RetriesExhausted {
            attempts: self.max_attempts,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_first_success_returns_immediately() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy::immediate(5);

        let result: Result<u32, TransportError> = policy.run("op", || {
            calls.set(calls.get() + 1);
            Ok::<_, String>(7)
        });

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_exhaustion_uses_exact_budget() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy::immediate(5);

        let result: Result<(), TransportError> = policy.run("op", || {
            calls.set(calls.get() + 1);
            Err::<(), _>("no connection".to_string())
        });

        assert_eq!(calls.get(), 5);
        match result {
            Err(TransportError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 5);
                assert_eq!(last, "no connection");
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[test]
    fn test_recovers_mid_budget() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy::immediate(5);

        let result = policy.run("op", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err("transient".to_string())
            } else {
                Ok(calls.get())
            }
        });

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }
}
