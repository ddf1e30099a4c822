//! Named, independently locked resilience state per external service.

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use super::rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
use crate::config::OrchestratorConfig;
use crate::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

pub const DOWNLOAD_SERVICE: &str = "download-service";
pub const CATALOG_SERVICE: &str = "catalog-service";
pub const METADATA_SERVICE: &str = "metadata-service";

/// One external service guarded by its own breaker and optional limiter.
#[derive(Debug)]
pub struct ProtectedService {
    name: String,
    breaker: CircuitBreaker,
    limiter: Option<RateLimiter>,
}

impl ProtectedService {
    pub fn new(
        name: impl Into<String>,
        breaker: CircuitBreakerConfig,
        limiter: Option<RateLimiterConfig>,
    ) -> Self {
        let name = name.into();
        Self {
            breaker: CircuitBreaker::new(name.clone(), breaker),
            limiter: limiter.map(|cfg| RateLimiter::new(name.clone(), cfg)),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> Option<&RateLimiter> {
        self.limiter.as_ref()
    }

    /// Run one network call: rate limiter first, then the breaker.
    ///
    /// A rate-limited call that fails still counts against the breaker. A
    /// `Retry-After` hint on a transient failure pauses the limiter.
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
        let result = self.breaker.call(f).await;
        if let (Some(limiter), Err(Error::Transient {
            retry_after: Some(after),
            ..
        })) = (&self.limiter, &result)
        {
            limiter.pause_for(*after);
        }
        result
    }
}

/// Registry of protected services keyed by service name.
///
/// The map lock is only taken to look a service up; each service carries its
/// own locks, so unrelated services never serialize behind each other.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<ProtectedService>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry for every service named in the configuration.
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        let registry = Self::new();
        for (name, svc) in &config.services {
            let breaker = svc.breaker_config(&config.breaker);
            let limiter = svc.rate_limiter_config();
            registry.register(ProtectedService::new(name.clone(), breaker, limiter));
        }
        registry
    }

    /// Register (or replace) a service and return the shared handle.
    pub fn register(&self, service: ProtectedService) -> Arc<ProtectedService> {
        let service = Arc::new(service);
        self.services
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(service.name().to_string(), Arc::clone(&service));
        service
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProtectedService>> {
        self.services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    /// Like [`ServiceRegistry::get`] but reports unknown names as a configuration error.
    pub fn require(&self, name: &str) -> Result<Arc<ProtectedService>> {
        self.get(name).ok_or_else(|| {
            Error::configuration_with_context(
                format!("service '{}' is not registered", name),
                crate::ErrorContext::new()
                    .with_field_path(format!("services.{}", name))
                    .with_source("service_registry"),
            )
        })
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn breaker_stats(&self, name: &str) -> Option<CircuitBreakerStats> {
        self.get(name).map(|svc| svc.breaker().stats())
    }

    pub fn limiter_snapshot(&self, name: &str) -> Option<RateLimiterSnapshot> {
        self.get(name)
            .and_then(|svc| svc.limiter().map(|l| l.snapshot()))
    }

    /// Breaker statistics for every registered service, sorted by name.
    pub fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        self.names()
            .iter()
            .filter_map(|name| self.breaker_stats(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitState;
    use std::time::Duration;
    use tokio::time::Instant;

    #[test]
    fn test_registry_from_default_config() {
        let registry = ServiceRegistry::from_config(&OrchestratorConfig::default());
        assert_eq!(
            registry.names(),
            vec![CATALOG_SERVICE, DOWNLOAD_SERVICE, METADATA_SERVICE]
        );
        assert!(registry.limiter_snapshot(METADATA_SERVICE).is_some());
        assert!(registry.limiter_snapshot(CATALOG_SERVICE).is_none());
        assert!(registry.require("unknown").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_services_are_isolated() {
        let registry = ServiceRegistry::new();
        let download = registry.register(ProtectedService::new(
            DOWNLOAD_SERVICE,
            CircuitBreakerConfig::new().with_failure_threshold(1),
            None,
        ));
        let metadata = registry.register(ProtectedService::new(
            METADATA_SERVICE,
            CircuitBreakerConfig::default(),
            Some(RateLimiterConfig::new(Duration::from_secs(1))),
        ));

        let _ = download
            .execute(|| async { Err::<(), _>(Error::transient(DOWNLOAD_SERVICE, "down")) })
            .await;
        assert_eq!(download.breaker().state(), CircuitState::Open);
        assert_eq!(metadata.breaker().state(), CircuitState::Closed);

        // Waiting on the metadata limiter does not hold up other services.
        metadata.execute(|| async { Ok(()) }).await.unwrap();
        let start = Instant::now();
        let pending = tokio::spawn({
            let metadata = Arc::clone(&metadata);
            async move { metadata.execute(|| async { Ok(()) }).await }
        });
        tokio::task::yield_now().await;
        let rejected = download.execute(|| async { Ok(()) }).await;
        assert!(matches!(rejected, Err(Error::CircuitOpen { .. })));
        assert_eq!(start.elapsed(), Duration::ZERO);
        pending.await.unwrap().unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_pauses_limiter() {
        let svc = ProtectedService::new(
            METADATA_SERVICE,
            CircuitBreakerConfig::default(),
            Some(RateLimiterConfig::new(Duration::from_millis(100))),
        );
        let res = svc
            .execute(|| async {
                Err::<(), _>(Error::Transient {
                    service: METADATA_SERVICE.into(),
                    message: "503 slow down".into(),
                    retry_after: Some(Duration::from_secs(3)),
                })
            })
            .await;
        assert!(res.is_err());
        let start = Instant::now();
        svc.execute(|| async { Ok(()) }).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(svc.breaker().stats().consecutive_failures, 0);
    }
}
