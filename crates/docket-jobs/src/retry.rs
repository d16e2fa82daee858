//! Retry strategies for failed jobs.

use crate::job::Attempts;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Name of the strategy used when a job names none.
pub const DEFAULT_STRATEGY: &str = "linear";

/// Backoff function: maps an attempts descriptor (with `remaining` already
/// decremented) to a wait in milliseconds.
pub type BackoffFn = Arc<dyn Fn(&Attempts) -> u64 + Send + Sync>;

/// Constant wait of `delay` on every retry.
pub fn linear(attempts: &Attempts) -> u64 {
    attempts.delay.unwrap_or(0)
}

/// `delay * (count - remaining)`: grows by one `delay` per failed attempt.
pub fn exponential(attempts: &Attempts) -> u64 {
    let failed = attempts.count.saturating_sub(attempts.remaining_or_count());
    attempts.delay.unwrap_or(0).saturating_mul(u64::from(failed))
}

/// Instance-owned registry of named backoff strategies.
#[derive(Clone)]
pub struct RetryStrategies {
    strategies: HashMap<String, BackoffFn>,
}

impl fmt::Debug for RetryStrategies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.strategies.keys().collect();
        names.sort();
        f.debug_struct("RetryStrategies").field("names", &names).finish()
    }
}

impl Default for RetryStrategies {
    fn default() -> Self {
        let mut strategies = Self {
            strategies: HashMap::new(),
        };
        strategies.register("linear", linear);
        strategies.register("exponential", exponential);
        strategies
    }
}

impl RetryStrategies {
    /// Creates a registry seeded with `linear` and `exponential`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a strategy.
    pub fn register<F>(&mut self, name: impl Into<String>, strategy: F)
    where
        F: Fn(&Attempts) -> u64 + Send + Sync + 'static,
    {
        self.strategies.insert(name.into(), Arc::new(strategy));
    }

    /// Returns true if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Resolves a strategy by name.
    ///
    /// `None` selects the default. An unknown name logs a warning and falls
    /// back to the default.
    pub fn resolve(&self, name: Option<&str>) -> BackoffFn {
        let requested = name.unwrap_or(DEFAULT_STRATEGY);
        if let Some(strategy) = self.strategies.get(requested) {
            return strategy.clone();
        }
        warn!(
            strategy = %requested,
            fallback = DEFAULT_STRATEGY,
            "Unknown retry strategy, falling back"
        );
        self.strategies
            .get(DEFAULT_STRATEGY)
            .cloned()
            .unwrap_or_else(|| Arc::new(linear) as BackoffFn)
    }

    /// Decides what happens to a job after one failed attempt.
    pub fn decide(&self, attempts: Option<&Attempts>) -> RetryDecision {
        let Some(attempts) = attempts else {
            return RetryDecision::Fail { remaining: None };
        };

        let remaining = attempts.remaining_or_count().saturating_sub(1);
        if remaining == 0 {
            return RetryDecision::Fail {
                remaining: Some(0),
            };
        }

        let mut next = attempts.clone();
        next.remaining = Some(remaining);
        let wait_ms = if next.delay.is_some() {
            (self.resolve(next.strategy.as_deref()))(&next)
        } else {
            0
        };

        RetryDecision::Retry {
            remaining,
            wait: Duration::from_millis(wait_ms),
        }
    }
}

/// Outcome of retry arbitration for one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue after `wait` with `remaining` attempts left.
    Retry { remaining: u32, wait: Duration },
    /// No attempts left: fail terminally.
    Fail { remaining: Option<u32> },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempts(strategy: &str) -> Attempts {
        Attempts::new(3)
            .with_delay(Duration::from_millis(1000))
            .with_strategy(strategy)
    }

    /// Feeds three consecutive failures through `decide`.
    fn run(strategies: &RetryStrategies, mut current: Attempts) -> Vec<RetryDecision> {
        let mut decisions = Vec::new();
        for _ in 0..3 {
            let decision = strategies.decide(Some(&current));
            match decision {
                RetryDecision::Retry { remaining, .. } => current.remaining = Some(remaining),
                RetryDecision::Fail { remaining } => current.remaining = remaining,
            }
            decisions.push(decision);
        }
        decisions
    }

    #[test]
    fn test_linear_retry_sequence() {
        let decisions = run(&RetryStrategies::new(), attempts("linear"));
        assert_eq!(
            decisions,
            vec![
                RetryDecision::Retry { remaining: 2, wait: Duration::from_millis(1000) },
                RetryDecision::Retry { remaining: 1, wait: Duration::from_millis(1000) },
                RetryDecision::Fail { remaining: Some(0) },
            ]
        );
    }

    #[test]
    fn test_exponential_retry_sequence() {
        let decisions = run(&RetryStrategies::new(), attempts("exponential"));
        assert_eq!(
            decisions[..2],
            [
                RetryDecision::Retry { remaining: 2, wait: Duration::from_millis(1000) },
                RetryDecision::Retry { remaining: 1, wait: Duration::from_millis(2000) },
            ]
        );
        assert_eq!(decisions[2], RetryDecision::Fail { remaining: Some(0) });
    }

    #[test]
    fn test_no_attempts_fails_immediately() {
        let decision = RetryStrategies::new().decide(None);
        assert_eq!(decision, RetryDecision::Fail { remaining: None });
    }

    #[test]
    fn test_single_attempt_fails_immediately() {
        let decision = RetryStrategies::new().decide(Some(&Attempts::new(1)));
        assert_eq!(decision, RetryDecision::Fail { remaining: Some(0) });
    }

    #[test]
    fn test_missing_delay_retries_immediately() {
        let attempts = Attempts::new(3).with_strategy("exponential");
        let decision = RetryStrategies::new().decide(Some(&attempts));
        assert_eq!(
            decision,
            RetryDecision::Retry { remaining: 2, wait: Duration::ZERO }
        );
    }

    #[test]
    fn test_unknown_strategy_falls_back_to_linear() {
        let decision = RetryStrategies::new().decide(Some(&attempts("fibonacci")));
        assert_eq!(
            decision,
            RetryDecision::Retry { remaining: 2, wait: Duration::from_millis(1000) }
        );
    }

    #[test]
    fn test_custom_strategy() {
        let mut strategies = RetryStrategies::new();
        strategies.register("double", |a: &Attempts| a.delay.unwrap_or(0) * 2);
        assert!(strategies.contains("double"));
        let decision = strategies.decide(Some(&attempts("double")));
        assert_eq!(
            decision,
            RetryDecision::Retry { remaining: 2, wait: Duration::from_millis(2000) }
        );
    }

    #[test]
    fn test_exhausted_budget_stays_failed() {
        let mut spent = attempts("linear");
        spent.remaining = Some(0);
        let decision = RetryStrategies::new().decide(Some(&spent));
        assert_eq!(decision, RetryDecision::Fail { remaining: Some(0) });
    }
}
