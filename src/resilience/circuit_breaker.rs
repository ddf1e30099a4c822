use crate::{Error, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Breaker state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive trial successes in HalfOpen that close the circuit.
    pub success_threshold: u32,
    /// How long the circuit stays Open before a trial call is let through.
    pub timeout: Duration,
    /// Failure history in Closed older than this is forgotten.
    pub reset_timeout: Duration,
    /// Concurrent trial calls allowed while HalfOpen.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(300),
            half_open_max_calls: 2,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the success threshold used to close from HalfOpen
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    /// Set the open timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how long a quiet Closed circuit keeps its failure history
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Set the number of concurrent HalfOpen trial calls
    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls.max(1);
        self
    }
}

/// Point-in-time view of one breaker, for observability.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub service: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub opened_at: Option<Instant>,
    pub last_state_change: Instant,
    /// Remaining open time, if currently open.
    pub retry_after: Option<Duration>,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

#[derive(Debug)]
struct State {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    last_state_change: Instant,
    last_failure_at: Option<Instant>,
    half_open_in_flight: u32,
    total_calls: u64,
    total_failures: u64,
    total_rejections: u64,
}

/// Per-service circuit breaker.
///
/// - Closed: calls pass, consecutive failures are counted
/// - Open: calls are rejected with [`Error::CircuitOpen`] until `timeout` elapses
/// - HalfOpen: a bounded number of trial calls decide between Closed and Open
///
/// The breaker never retries; it only reacts to the outcome reported for each call.
pub struct CircuitBreaker {
    service: String,
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

/// Admission ticket for one call through the breaker.
///
/// Report the outcome with [`CallPermit::success`], [`CallPermit::failure`] or
/// [`CallPermit::release`]. Dropping an unreported permit frees its trial slot.
#[must_use = "report the call outcome through the permit"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    reported: bool,
}

impl CallPermit<'_> {
    /// Whether this call is a HalfOpen trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.reported = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.reported = true;
        self.breaker.on_failure(self.trial);
    }

    /// Finish without affecting the failure/success counters.
    pub fn release(mut self) {
        self.reported = true;
        self.breaker.release_trial(self.trial);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.reported {
            self.breaker.release_trial(self.trial);
        }
    }
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, cfg: CircuitBreakerConfig) -> Self {
        Self {
            service: service.into(),
            cfg,
            state: Mutex::new(State {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                last_state_change: Instant::now(),
                last_failure_at: None,
                half_open_in_flight: 0,
                total_calls: 0,
                total_failures: 0,
                total_rejections: 0,
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // State stays consistent across a panic in another holder: every
        // mutation below is a plain field write.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, st: &mut State, to: CircuitState, now: Instant) {
        if st.state == to {
            return;
        }
        let from = st.state;
        st.state = to;
        st.last_state_change = now;
        match to {
            CircuitState::Open => {
                st.opened_at = Some(now);
                warn!(
                    service = %self.service,
                    from = %from,
                    consecutive_failures = st.consecutive_failures,
                    timeout_ms = self.cfg.timeout.as_millis() as u64,
                    "circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                st.consecutive_successes = 0;
                info!(service = %self.service, "circuit half-open, allowing trial calls");
            }
            CircuitState::Closed => {
                st.opened_at = None;
                st.consecutive_failures = 0;
                st.consecutive_successes = 0;
                st.last_failure_at = None;
                info!(service = %self.service, from = %from, "circuit closed");
            }
        }
    }

    fn forget_stale_failures(&self, st: &mut State, now: Instant) {
        if st.state != CircuitState::Closed || st.consecutive_failures == 0 {
            return;
        }
        if let Some(last) = st.last_failure_at {
            if now.saturating_duration_since(last) >= self.cfg.reset_timeout {
                debug!(
                    service = %self.service,
                    forgotten = st.consecutive_failures,
                    "resetting stale failure history"
                );
                st.consecutive_failures = 0;
                st.last_failure_at = None;
            }
        }
    }

    /// Ask for admission of one call.
    ///
    /// Moves Open to HalfOpen once `timeout` has elapsed; the caller that
    /// observes the elapsed timeout becomes the first trial.
    pub fn allow(&self) -> Result<CallPermit<'_>> {
        let now = Instant::now();
        let mut st = self.lock();
        match st.state {
            CircuitState::Closed => {
                self.forget_stale_failures(&mut st, now);
                st.total_calls += 1;
                Ok(CallPermit {
                    breaker: self,
                    trial: false,
                    reported: false,
                })
            }
            CircuitState::Open => {
                let opened_at = st.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= self.cfg.timeout {
                    self.transition(&mut st, CircuitState::HalfOpen, now);
                    st.half_open_in_flight = 1;
                    st.total_calls += 1;
                    Ok(CallPermit {
                        breaker: self,
                        trial: true,
                        reported: false,
                    })
                } else {
                    st.total_rejections += 1;
                    Err(Error::CircuitOpen {
                        service: self.service.clone(),
                        retry_after: self.cfg.timeout - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if st.half_open_in_flight < self.cfg.half_open_max_calls {
                    st.half_open_in_flight += 1;
                    st.total_calls += 1;
                    Ok(CallPermit {
                        breaker: self,
                        trial: true,
                        reported: false,
                    })
                } else {
                    st.total_rejections += 1;
                    Err(Error::CircuitOpen {
                        service: self.service.clone(),
                        retry_after: Duration::ZERO,
                    })
                }
            }
        }
    }

    /// Run `f` behind the breaker.
    ///
    /// Returns `f`'s result unchanged. When the circuit is open `f` is not
    /// invoked and [`Error::CircuitOpen`] is returned instead.
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.allow()?;
        let result = f().await;
        match &result {
            Ok(_) => permit.success(),
            Err(e) if e.is_service_failure() => permit.failure(),
            Err(_) => permit.release(),
        }
        result
    }

    fn release_trial(&self, trial: bool) {
        if trial {
            let mut st = self.lock();
            st.half_open_in_flight = st.half_open_in_flight.saturating_sub(1);
        }
    }

    fn on_success(&self, trial: bool) {
        let now = Instant::now();
        let mut st = self.lock();
        if trial {
            st.half_open_in_flight = st.half_open_in_flight.saturating_sub(1);
        }
        match st.state {
            CircuitState::Closed => {
                st.consecutive_failures = 0;
                st.last_failure_at = None;
            }
            CircuitState::HalfOpen if trial => {
                st.consecutive_successes = st.consecutive_successes.saturating_add(1);
                if st.consecutive_successes >= self.cfg.success_threshold {
                    self.transition(&mut st, CircuitState::Closed, now);
                }
            }
            // Late results from calls admitted before the last transition.
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let now = Instant::now();
        let mut st = self.lock();
        if trial {
            st.half_open_in_flight = st.half_open_in_flight.saturating_sub(1);
        }
        st.total_failures += 1;
        match st.state {
            CircuitState::Closed => {
                self.forget_stale_failures(&mut st, now);
                st.consecutive_failures = st.consecutive_failures.saturating_add(1);
                st.last_failure_at = Some(now);
                if st.consecutive_failures >= self.cfg.failure_threshold {
                    self.transition(&mut st, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                st.consecutive_failures = self.cfg.failure_threshold;
                st.consecutive_successes = 0;
                st.last_failure_at = Some(now);
                self.transition(&mut st, CircuitState::Open, now);
            }
            CircuitState::Open => {}
        }
    }

    /// Record a success for a call made without [`CircuitBreaker::allow`].
    pub fn record_success(&self) {
        self.on_success(false);
    }

    /// Record a failure for a call made without [`CircuitBreaker::allow`].
    pub fn record_failure(&self) {
        self.on_failure(false);
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let now = Instant::now();
        let st = self.lock();
        let retry_after = match (st.state, st.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(
                self.cfg
                    .timeout
                    .saturating_sub(now.saturating_duration_since(opened_at)),
            ),
            _ => None,
        };
        CircuitBreakerStats {
            service: self.service.clone(),
            state: st.state,
            consecutive_failures: st.consecutive_failures,
            consecutive_successes: st.consecutive_successes,
            opened_at: st.opened_at,
            last_state_change: st.last_state_change,
            retry_after,
            failure_threshold: self.cfg.failure_threshold,
            success_threshold: self.cfg.success_threshold,
            timeout: self.cfg.timeout,
            total_calls: st.total_calls,
            total_failures: st.total_failures,
            total_rejections: st.total_rejections,
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("service", &self.service)
            .field("state", &self.state())
            .finish()
    }
}
