//! # Resilience Primitives Module
//!
//! Every outbound call to the download daemon, the streaming catalog and the
//! metadata service goes through a [`registry::ProtectedService`], which holds
//! that service's circuit breaker and (optionally) its rate limiter.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Closed / Open / HalfOpen failure isolation per service |
//! | [`rate_limiter`] | Minimum interval between request starts, FIFO |
//! | [`registry`] | Services keyed by name, each independently locked |
//!
//! ## Circuit Breaker
//!
//! ```rust
//! use media_orchestrator::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let config = CircuitBreakerConfig::new()
//!     .with_failure_threshold(3)
//!     .with_timeout(Duration::from_secs(60));
//! let breaker = CircuitBreaker::new("download-service", config);
//!
//! if let Ok(permit) = breaker.allow() {
//!     // Make the call...
//!     permit.success();
//! };
//! ```
//!
//! ## Rate Limiter
//!
//! ```rust
//! use media_orchestrator::resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let limiter = RateLimiter::new(
//!     "metadata-service",
//!     RateLimiterConfig::new(Duration::from_secs(1)),
//! );
//! limiter.acquire().await; // suspends this caller only
//! # }
//! ```

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod registry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
pub use registry::{
    ProtectedService, ServiceRegistry, CATALOG_SERVICE, DOWNLOAD_SERVICE, METADATA_SERVICE,
};
