//! Per-model circuit breakers.
//!
//! A breaker trips after `failure_threshold` consecutive failures, fails
//! every call fast while open, and after the cool-down admits exactly one
//! trial call. The trial's outcome either closes the breaker or reopens it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::error::LlmError;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    /// Normal operation, calls are permitted.
    Closed,
    /// Too many failures, calls are blocked.
    Open { since: Instant },
    /// Cool-down elapsed. One trial call may be in flight.
    HalfOpen { trial_in_flight: bool },
}

impl CircuitState {
    pub fn label(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen { .. } => "half_open",
        }
    }
}

/// How a call was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed (or never created).
    Normal,
    /// The single half-open trial.
    Trial,
}

/// Outcome of a guarded call, as far as the breaker is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    /// Caller-side failures (validation, authentication) say nothing about
    /// the endpoint's health.
    Neutral,
}

impl CallOutcome {
    pub fn of<T>(result: &Result<T, LlmError>) -> Self {
        match result {
            Ok(_) => CallOutcome::Success,
            Err(e) if e.counts_toward_breaker() => CallOutcome::Failure,
            Err(_) => CallOutcome::Neutral,
        }
    }
}

/// A single model's breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    /// Try to admit a call. `Err` carries the time left in the cool-down.
    pub fn try_acquire(&mut self) -> Result<Admission, Duration> {
        match self.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open { since } => {
                let elapsed = since.elapsed();
                if elapsed >= self.cooldown {
                    debug!("Circuit breaker transitioning to half-open");
                    self.state = CircuitState::HalfOpen {
                        trial_in_flight: true,
                    };
                    Ok(Admission::Trial)
                } else {
                    Err(self.cooldown - elapsed)
                }
            }
            CircuitState::HalfOpen { trial_in_flight } => {
                if trial_in_flight {
                    Err(Duration::ZERO)
                } else {
                    self.state = CircuitState::HalfOpen {
                        trial_in_flight: true,
                    };
                    Ok(Admission::Trial)
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if matches!(self.state, CircuitState::HalfOpen { .. }) {
            info!("Circuit breaker closing after successful trial");
        }
        self.consecutive_failures = 0;
        self.state = CircuitState::Closed;
    }

    pub fn record_failure(&mut self) {
        let now = Instant::now();
        self.consecutive_failures += 1;
        self.last_failure = Some(now);
        match self.state {
            CircuitState::HalfOpen { .. } => {
                warn!(
                    failures = self.consecutive_failures,
                    "Circuit breaker reopening after failed trial"
                );
                self.state = CircuitState::Open { since: now };
            }
            CircuitState::Closed if self.consecutive_failures >= self.failure_threshold => {
                warn!(
                    failures = self.consecutive_failures,
                    threshold = self.failure_threshold,
                    cooldown_secs = self.cooldown.as_secs(),
                    "Circuit breaker opening"
                );
                self.state = CircuitState::Open { since: now };
            }
            _ => {}
        }
    }

    /// Give the trial slot back without judging the endpoint.
    pub fn release_trial(&mut self) {
        if let CircuitState::HalfOpen { .. } = self.state {
            self.state = CircuitState::HalfOpen {
                trial_in_flight: false,
            };
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }
}

/// Point-in-time view of one model's breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure: Option<Instant>,
}

/// Breakers keyed by model id, created lazily on a model's first failure.
///
/// All transitions happen under one lock so concurrent failures against the
/// same model are never lost. The lock is never held across an await.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CircuitBreaker>> {
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a call to `model`, or fail fast with `CircuitOpen`.
    pub async fn acquire(&self, model: &str) -> Result<Admission, LlmError> {
        self.try_admit(model)
    }

    /// Like [`Self::acquire`], but the returned permit gives a half-open
    /// trial back if it is dropped before an outcome is recorded.
    pub async fn admit<'a>(&'a self, model: &'a str) -> Result<BreakerPermit<'a>, LlmError> {
        let admission = self.try_admit(model)?;
        Ok(BreakerPermit {
            registry: self,
            model,
            admission,
            settled: false,
        })
    }

    fn try_admit(&self, model: &str) -> Result<Admission, LlmError> {
        let mut breakers = self.lock();
        let Some(breaker) = breakers.get_mut(model) else {
            return Ok(Admission::Normal);
        };
        breaker.try_acquire().map_err(|remaining| {
            debug!(model, "Call rejected by open circuit");
            LlmError::CircuitOpen {
                model: model.to_string(),
                retry_in_secs: remaining.as_secs_f64().ceil() as u64,
            }
        })
    }

    /// Record the outcome of an admitted call.
    pub async fn record(&self, model: &str, admission: Admission, outcome: CallOutcome) {
        self.record_now(model, admission, outcome);
    }

    fn record_now(&self, model: &str, admission: Admission, outcome: CallOutcome) {
        let mut breakers = self.lock();
        match outcome {
            CallOutcome::Success => {
                if let Some(breaker) = breakers.get_mut(model) {
                    breaker.record_success();
                }
            }
            CallOutcome::Failure => {
                let breaker = breakers.entry(model.to_string()).or_insert_with(|| {
                    CircuitBreaker::new(self.config.failure_threshold, self.config.cooldown())
                });
                breaker.record_failure();
            }
            CallOutcome::Neutral => {
                if admission == Admission::Trial
                    && let Some(breaker) = breakers.get_mut(model)
                {
                    breaker.release_trial();
                }
            }
        }
    }

    pub async fn snapshot(&self, model: &str) -> Option<BreakerSnapshot> {
        self.lock().get(model).map(|b| BreakerSnapshot {
            state: b.state(),
            consecutive_failures: b.consecutive_failures(),
            last_failure: b.last_failure(),
        })
    }
}

/// An admitted call whose outcome has not been recorded yet.
///
/// Dropping an unsettled trial permit (the caller's future was cancelled)
/// frees the half-open slot so the next call can probe the model.
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    registry: &'a BreakerRegistry,
    model: &'a str,
    admission: Admission,
    settled: bool,
}

impl BreakerPermit<'_> {
    pub fn admission(&self) -> Admission {
        self.admission
    }

    /// Record the call's outcome and consume the permit.
    pub fn settle(mut self, outcome: CallOutcome) {
        self.settled = true;
        self.registry.record_now(self.model, self.admission, outcome);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Trial {
            warn!(model = self.model, "Trial call dropped before completion, releasing slot");
            self.registry
                .record_now(self.model, self.admission, CallOutcome::Neutral);
        }
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown_secs: 0,
            cooldown_ms: Some(5),
        }
    }

    #[test]
    fn test_circuit_breaker_starts_closed() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(60));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.try_acquire(), Ok(Admission::Normal));
    }

    #[test]
    fn test_circuit_breaker_opens_after_threshold() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert!(matches!(cb.state(), CircuitState::Open { .. }));
        assert!(cb.try_acquire().is_err());
    }

    #[test]
    fn test_half_open_admits_exactly_one_trial() {
        let mut cb = CircuitBreaker::new(1, Duration::from_millis(1));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cb.try_acquire(), Ok(Admission::Trial));
        assert_eq!(cb.try_acquire(), Err(Duration::ZERO));
    }

    #[test]
    fn test_trial_success_closes() {
        let mut cb = CircuitBreaker::new(2, Duration::from_millis(1));
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cb.try_acquire(), Ok(Admission::Trial));
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[test]
    fn test_trial_failure_reopens_immediately() {
        let mut cb = CircuitBreaker::new(5, Duration::from_millis(1));
        for _ in 0..5 {
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cb.try_acquire(), Ok(Admission::Trial));
        cb.record_failure();
        assert!(matches!(cb.state(), CircuitState::Open { .. }));
    }

    #[test]
    fn test_success_resets_count() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_outcome_classification() {
        let ok: Result<(), LlmError> = Ok(());
        assert_eq!(CallOutcome::of(&ok), CallOutcome::Success);
        let net: Result<(), LlmError> = Err(LlmError::network("x"));
        assert_eq!(CallOutcome::of(&net), CallOutcome::Failure);
        let bad: Result<(), LlmError> = Err(LlmError::validation("x"));
        assert_eq!(CallOutcome::of(&bad), CallOutcome::Neutral);
    }

    #[tokio::test]
    async fn test_registry_is_lazy() {
        let registry = BreakerRegistry::default();
        assert_eq!(registry.acquire("m").await.unwrap(), Admission::Normal);
        registry.record("m", Admission::Normal, CallOutcome::Success).await;
        assert!(registry.snapshot("m").await.is_none());
        registry.record("m", Admission::Normal, CallOutcome::Failure).await;
        let snap = registry.snapshot("m").await.unwrap();
        assert_eq!(snap.consecutive_failures, 1);
        assert!(snap.last_failure.is_some());
    }

    #[tokio::test]
    async fn test_registry_isolates_models() {
        let registry = BreakerRegistry::new(fast_config(2));
        for _ in 0..2 {
            registry.record("a", Admission::Normal, CallOutcome::Failure).await;
        }
        assert!(matches!(
            registry.acquire("a").await,
            Err(LlmError::CircuitOpen { .. })
        ));
        assert!(registry.acquire("b").await.is_ok());
    }

    #[tokio::test]
    async fn test_neutral_trial_releases_slot() {
        let registry = BreakerRegistry::new(fast_config(1));
        registry.record("m", Admission::Normal, CallOutcome::Failure).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let admission = registry.acquire("m").await.unwrap();
        assert_eq!(admission, Admission::Trial);
        assert!(registry.acquire("m").await.is_err());
        registry.record("m", admission, CallOutcome::Neutral).await;
        assert_eq!(registry.acquire("m").await.unwrap(), Admission::Trial);
    }

    #[tokio::test]
    async fn test_dropped_trial_permit_releases_slot() {
        let registry = BreakerRegistry::new(fast_config(1));
        registry.record("m", Admission::Normal, CallOutcome::Failure).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let permit = registry.admit("m").await.unwrap();
        assert_eq!(permit.admission(), Admission::Trial);
        assert!(registry.acquire("m").await.is_err());
        drop(permit);

        assert_eq!(
            registry.snapshot("m").await.unwrap().state,
            CircuitState::HalfOpen {
                trial_in_flight: false
            }
        );
        let permit = registry.admit("m").await.unwrap();
        assert_eq!(permit.admission(), Admission::Trial);
        permit.settle(CallOutcome::Success);
        assert_eq!(registry.snapshot("m").await.unwrap().state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_concurrent_failures_are_not_lost() {
        let registry = std::sync::Arc::new(BreakerRegistry::new(fast_config(100)));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.record("m", Admission::Normal, CallOutcome::Failure).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(registry.snapshot("m").await.unwrap().consecutive_failures, 20);
    }
}
