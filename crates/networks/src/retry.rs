use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use jobharvest_core::FailureClass;

/// Named retry strategies from §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Conservative,
    Standard,
    Aggressive,
    NetworkHeavy,
}

impl Strategy {
    pub fn from_id(id: &str) -> Self {
        match id {
            "conservative" => Strategy::Conservative,
            "aggressive" => Strategy::Aggressive,
            "network_heavy" => Strategy::NetworkHeavy,
            _ => Strategy::Standard,
        }
    }

    fn max_attempts(self) -> u32 {
        match self {
            Strategy::Conservative => 2,
            Strategy::Standard => 3,
            Strategy::Aggressive => 5,
            Strategy::NetworkHeavy => 4,
        }
    }

    fn cap(self) -> Duration {
        match self {
            Strategy::Conservative => Duration::from_secs(10),
            Strategy::Standard => Duration::from_secs(30),
            Strategy::Aggressive => Duration::from_secs(60),
            Strategy::NetworkHeavy => Duration::from_secs(120),
        }
    }
}

const BASE_BACKOFF: Duration = Duration::from_millis(500);

/// `backoff = min(cap, base * 2^(attempt-1)) * (1 + jitter)`, jitter
/// uniform in [-0.2, 0.2] (§4.2).
fn backoff_for(strategy: Strategy, attempt: u32) -> Duration {
    let exp = 2u32.saturating_pow(attempt.saturating_sub(1));
    let raw = BASE_BACKOFF.saturating_mul(exp).min(strategy.cap());
    let jitter = rand::thread_rng().gen_range(-0.2..=0.2);
    Duration::from_secs_f64((raw.as_secs_f64() * (1.0 + jitter)).max(0.0))
}

/// Outcome of a classified, retried attempt.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Success(T),
    Exhausted { attempts: u32, last_class: FailureClass },
    /// `circuit_open` is distinct from the wrapped operation's failures so
    /// the Retry Engine never counts it against the operation's attempts
    /// (§4.3).
    CircuitOpen,
}

/// Wraps a fallible async unit of work, retrying per `strategy` and the
/// §4.2 failure-class policy. `classify` maps the operation's error into a
/// [`FailureClass`]; non-retryable classes (`client_error`, `fatal`)
/// surface immediately after one attempt. `on_outcome` lets the caller
/// notify a rate limiter / circuit breaker of each attempt's success or
/// failure without this engine knowing about either.
pub async fn retry_with<T, E, Fut, Op, Classify, OnOutcome>(
    strategy: Strategy,
    mut op: Op,
    classify: Classify,
    mut on_outcome: OnOutcome,
) -> RetryOutcome<T>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Classify: Fn(&E) -> FailureClass,
    OnOutcome: FnMut(bool),
{
    let max_attempts = strategy.max_attempts();
    let mut last_class = FailureClass::TransientNetwork;

    for attempt in 1..=max_attempts {
        match op(attempt).await {
            Ok(value) => {
                on_outcome(true);
                return RetryOutcome::Success(value);
            }
            Err(err) => {
                let class = classify(&err);
                last_class = class;
                on_outcome(false);

                if !class.is_retryable() {
                    warn!(attempt, ?class, "retry engine: non-retryable failure");
                    return RetryOutcome::Exhausted {
                        attempts: attempt,
                        last_class: class,
                    };
                }

                if attempt == max_attempts {
                    warn!(attempt, ?class, "retry engine: attempts exhausted");
                    break;
                }

                let wait = backoff_for(strategy, attempt);
                info!(attempt, ?class, wait_ms = wait.as_millis() as u64, "retry.attempt");
                tokio::time::sleep(wait).await;
            }
        }
    }

    RetryOutcome::Exhausted {
        attempts: max_attempts,
        last_class,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let outcome = retry_with(
            Strategy::Standard,
            |_attempt| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("boom")
                    } else {
                        Ok(42)
                    }
                }
            },
            |_e| FailureClass::TransientNetwork,
            |_success| {},
        )
        .await;

        match outcome {
            RetryOutcome::Success(v) => assert_eq!(v, 42),
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_error_does_not_retry() {
        let attempts = AtomicU32::new(0);
        let outcome = retry_with(
            Strategy::Standard,
            |_attempt| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>("nope") }
            },
            |_e| FailureClass::ClientError,
            |_success| {},
        )
        .await;

        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 1, .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_never_exceeds_strategy_cap() {
        for attempt in 1..=10 {
            let wait = backoff_for(Strategy::Aggressive, attempt);
            assert!(wait <= Strategy::Aggressive.cap().mul_f64(1.21));
        }
    }
}
