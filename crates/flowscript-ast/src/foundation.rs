//! Foundation types: source spans and modifier payloads.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Byte range in the source text.
///
/// Spans survive into the resolved program so runtime errors can point back
/// at the construct that raised them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Zero-width span, used for synthesized nodes.
    pub fn empty() -> Self {
        Self { start: 0, end: 0 }
    }

    /// Smallest span covering both inputs.
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Repetition quantifier attached to a step (`*`, `+`, `?`, `{m,n}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quantifier {
    /// `*` — repeat until the step fails; the terminating failure is absorbed.
    ZeroOrMore,
    /// `+` — like `*`, but the first iteration must succeed.
    OneOrMore,
    /// `?` — run once, absorbing failure.
    Optional,
    /// `{m,n}` — up to `max` runs, error if fewer than `min` succeed.
    Range { min: u32, max: u32 },
}

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
}

/// Retry modifier payload (`@n`, `@n:exp(1s,2)`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (1-indexed; the first attempt has none).
    ///
    /// fixed → `base`; linear → `base * (k-1)`; exponential →
    /// `base * multiplier^(k-2)`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay * (attempt - 1),
            BackoffStrategy::Exponential => {
                self.base_delay.mul_f64(self.multiplier.powi(attempt as i32 - 2))
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::Fixed,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

/// Circuit breaker modifier payload (`@@{threshold,cooldown}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitPolicy {
    /// Consecutive failures that trip the breaker open.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a half-open trial.
    pub cooldown: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_merge() {
        let a = Span::new(3, 7);
        let b = Span::new(5, 12);
        assert_eq!(a.merge(b), Span::new(3, 12));
    }

    #[test]
    fn test_fixed_backoff() {
        let policy = RetryPolicy {
            max_attempts: 4,
            strategy: BackoffStrategy::Fixed,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(500));
        assert_eq!(policy.delay_before(4), Duration::from_millis(500));
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy {
            max_attempts: 4,
            strategy: BackoffStrategy::Linear,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_before(2), Duration::from_secs(1));
        assert_eq!(policy.delay_before(3), Duration::from_secs(2));
        assert_eq!(policy.delay_before(4), Duration::from_secs(3));
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy {
            max_attempts: 4,
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_before(2), Duration::from_secs(1));
        assert_eq!(policy.delay_before(3), Duration::from_secs(2));
        assert_eq!(policy.delay_before(4), Duration::from_secs(4));
    }
}
