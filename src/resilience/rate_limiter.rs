use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub service: String,
    pub min_interval: Duration,
    pub last_request_at: Option<Instant>,
    /// Estimated wait before the next request may start, if any.
    pub estimated_wait: Option<Duration>,
    pub total_acquired: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Minimum spacing between two request starts.
    pub min_interval: Duration,
}

impl RateLimiterConfig {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval }
    }

    /// Requests per second expressed as a minimum interval.
    pub fn from_rps(rps: f64) -> Option<Self> {
        if !rps.is_finite() || rps <= 0.0 {
            return None;
        }
        Some(Self {
            min_interval: Duration::from_secs_f64(1.0 / rps),
        })
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[derive(Debug, Default)]
struct State {
    last_request_at: Option<Instant>,
    /// Absolute time until which the service asked us to back off
    blocked_until: Option<Instant>,
    total_acquired: u64,
}

/// Minimum-interval rate limiter for a single service.
///
/// Callers queue on one fair lock and are released in arrival order, each at
/// least `min_interval` after the previous request *started*. A waiting caller
/// holds the turn, so at most one caller is ever waiting on the interval.
pub struct RateLimiter {
    service: String,
    cfg: RateLimiterConfig,
    turnstile: tokio::sync::Mutex<()>,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(service: impl Into<String>, cfg: RateLimiterConfig) -> Self {
        Self {
            service: service.into(),
            cfg,
            turnstile: tokio::sync::Mutex::new(()),
            state: Mutex::new(State::default()),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.cfg
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ready_at(&self, st: &State, now: Instant) -> Instant {
        let mut ready = now;
        if let Some(last) = st.last_request_at {
            ready = ready.max(last + self.cfg.min_interval);
        }
        if let Some(until) = st.blocked_until {
            ready = ready.max(until);
        }
        ready
    }

    /// Wait for this caller's turn and record its start time.
    ///
    /// Returns the instant the request is allowed to start.
    pub async fn acquire(&self) -> Instant {
        let _turn = self.turnstile.lock().await;
        loop {
            let wait_until = {
                let mut st = self.lock_state();
                let now = Instant::now();
                let ready = self.ready_at(&st, now);
                if ready <= now {
                    st.last_request_at = Some(now);
                    st.blocked_until = None;
                    st.total_acquired += 1;
                    return now;
                }
                ready
            };
            debug!(
                service = %self.service,
                wait_ms = wait_until.saturating_duration_since(Instant::now()).as_millis() as u64,
                "rate limiter delaying request"
            );
            // The budget may be extended while we sleep, so re-check afterwards.
            tokio::time::sleep_until(wait_until).await;
        }
    }

    /// Take a slot only if one is free right now and nobody is queued.
    pub fn try_acquire(&self) -> bool {
        let Ok(_turn) = self.turnstile.try_lock() else {
            return false;
        };
        let mut st = self.lock_state();
        let now = Instant::now();
        if self.ready_at(&st, now) <= now {
            st.last_request_at = Some(now);
            st.blocked_until = None;
            st.total_acquired += 1;
            true
        } else {
            false
        }
    }

    /// Hold back all requests for `duration`, e.g. after a `Retry-After` response.
    pub fn pause_for(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut st = self.lock_state();
        st.blocked_until = Some(st.blocked_until.map_or(until, |cur| cur.max(until)));
        debug!(
            service = %self.service,
            pause_ms = duration.as_millis() as u64,
            "rate limiter paused by service signal"
        );
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let st = self.lock_state();
        let now = Instant::now();
        let ready = self.ready_at(&st, now);
        RateLimiterSnapshot {
            service: self.service.clone(),
            min_interval: self.cfg.min_interval,
            last_request_at: st.last_request_at,
            estimated_wait: (ready > now).then(|| ready - now),
            total_acquired: st.total_acquired,
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("service", &self.service)
            .field("min_interval", &self.cfg.min_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter(ms: u64) -> RateLimiter {
        RateLimiter::new(
            "metadata-service",
            RateLimiterConfig::new(Duration::from_millis(ms)),
        )
    }

    #[test]
    fn test_rate_limiter_config_from_rps() {
        let config = RateLimiterConfig::from_rps(2.0).unwrap();
        assert_eq!(config.min_interval, Duration::from_millis(500));
        assert!(RateLimiterConfig::from_rps(0.0).is_none());
        assert!(RateLimiterConfig::from_rps(-1.0).is_none());
        assert!(RateLimiterConfig::from_rps(f64::NAN).is_none());
        assert!(RateLimiterConfig::from_rps(f64::INFINITY).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_calls_are_spaced() {
        let limiter = limiter(1000);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_secs(4));
        assert_eq!(limiter.snapshot().total_acquired, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_start_in_arrival_order() {
        let limiter = Arc::new(limiter(1000));
        let starts = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let limiter = Arc::clone(&limiter);
            let starts = Arc::clone(&starts);
            handles.push(tokio::spawn(async move {
                let at = limiter.acquire().await;
                starts.lock().await.push((i, at));
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let starts = starts.lock().await;
        let order: Vec<_> = starts.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        for pair in starts.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_measured_from_start_not_completion() {
        let limiter = limiter(1000);
        let first = limiter.acquire().await;
        // A slow call: the next request is due one interval after `first`.
        tokio::time::sleep(Duration::from_millis(700)).await;
        let second = limiter.acquire().await;
        assert_eq!(second - first, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire() {
        let limiter = limiter(1000);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_for_blocks_until_reset() {
        let limiter = limiter(100);
        limiter.pause_for(Duration::from_secs(5));
        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.estimated_wait, Some(Duration::from_secs(5)));

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(limiter.snapshot().estimated_wait.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_limiter_does_not_wait() {
        let limiter = limiter(1000);
        let snapshot = limiter.snapshot();
        assert!(snapshot.estimated_wait.is_none());
        assert!(snapshot.last_request_at.is_none());
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
