use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

/// States from §4.3: CLOSED -> OPEN -> HALF_OPEN -> CLOSED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

const MIN_SAMPLES: usize = 20;
const TRIP_THRESHOLD: f64 = 0.5;
const WINDOW_SIZE: usize = 100;
const DEFAULT_COOL_OFF: Duration = Duration::from_secs(30);
const MAX_COOL_OFF: Duration = Duration::from_secs(300);

/// Error returned when the breaker fails fast, distinct from the wrapped
/// operation's own errors so the Retry Engine doesn't count it as an
/// attempt (§4.3).
#[derive(Debug, Clone, Copy)]
pub struct CircuitOpenError;

struct Inner {
    state: CircuitState,
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    cool_off: Duration,
}

/// Per-resource circuit breaker (C3). One instance guards a single host or
/// logical operation name.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    half_open_gate: Semaphore,
    probe_count: usize,
}

impl CircuitBreaker {
    pub fn new(probe_count: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(WINDOW_SIZE),
                opened_at: None,
                cool_off: DEFAULT_COOL_OFF,
            }),
            half_open_gate: Semaphore::new(probe_count.max(1)),
            probe_count: probe_count.max(1),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.maybe_transition_to_half_open().await;
        self.inner.lock().await.state
    }

    async fn maybe_transition_to_half_open(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= inner.cool_off {
                    inner.state = CircuitState::HalfOpen;
                    info!("circuit breaker: OPEN -> HALF_OPEN");
                }
            }
        }
    }

    /// Runs `op` through the breaker. Fails fast with [`CircuitOpenError`]
    /// when OPEN; in HALF_OPEN at most `probe_count` calls run concurrently
    /// (§8 property 7), enforced by a semaphore permit held for the call.
    pub async fn call<T, E, Fut>(
        &self,
        op: impl FnOnce() -> Fut,
    ) -> Result<Result<T, E>, CircuitOpenError>
    where
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.maybe_transition_to_half_open().await;

        let state = self.inner.lock().await.state;
        if state == CircuitState::Open {
            return Err(CircuitOpenError);
        }

        let _permit = if state == CircuitState::HalfOpen {
            match self.half_open_gate.try_acquire() {
                Ok(permit) => Some(permit),
                Err(_) => return Err(CircuitOpenError),
            }
        } else {
            None
        };

        let result = op().await;
        self.record(result.is_ok()).await;
        Ok(result)
    }

    async fn record(&self, success: bool) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::HalfOpen => {
                if success {
                    inner.state = CircuitState::Closed;
                    inner.window.clear();
                    inner.cool_off = DEFAULT_COOL_OFF;
                    info!("circuit breaker: HALF_OPEN -> CLOSED");
                } else {
                    inner.cool_off = (inner.cool_off * 2).min(MAX_COOL_OFF);
                    inner.opened_at = Some(Instant::now());
                    inner.state = CircuitState::Open;
                    warn!(cool_off_secs = inner.cool_off.as_secs(), "circuit breaker: HALF_OPEN -> OPEN");
                }
            }
            CircuitState::Closed => {
                inner.window.push_back(success);
                if inner.window.len() > WINDOW_SIZE {
                    inner.window.pop_front();
                }
                if inner.window.len() >= MIN_SAMPLES {
                    let failures = inner.window.iter().filter(|s| !**s).count();
                    let ratio = failures as f64 / inner.window.len() as f64;
                    if ratio > TRIP_THRESHOLD {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(Instant::now());
                        warn!(failure_ratio = ratio, "circuit breaker: CLOSED -> OPEN");
                    }
                }
            }
            CircuitState::Open => {}
        }
    }
}

/// Process-wide registry of circuit breakers, keyed by host or operation
/// name (§4.3, §9: injected via `CoreContext` rather than a singleton).
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    probe_count: usize,
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(probe_count: usize) -> Self {
        Self {
            probe_count,
            breakers: Arc::new(DashMap::new()),
        }
    }

    pub fn for_key(&self, key: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.probe_count)))
            .clone()
    }

    pub async fn open_count(&self) -> u64 {
        let mut count = 0;
        for entry in self.breakers.iter() {
            if entry.value().state().await == CircuitState::Open {
                count += 1;
            }
        }
        count
    }
}
