//! Orchestrator configuration.
//!
//! Loaded from YAML (every field optional) and then adjusted through
//! `MEDIA_ORCH_*` environment variables. Durations are plain integers with a
//! unit suffix in the key so files stay readable.

use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::rate_limiter::RateLimiterConfig;
use crate::resilience::registry::{CATALOG_SERVICE, DOWNLOAD_SERVICE, METADATA_SERVICE};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Number of concurrent workers draining the job queue.
    pub workers: usize,
    pub queue: QueueSettings,
    /// Breaker defaults applied to every service unless overridden.
    pub breaker: BreakerSettings,
    pub services: BTreeMap<String, ServiceSettings>,
    pub token: TokenSettings,
    pub scoring: ScoringSettings,
    pub download: DownloadSettings,
    pub http: HttpSettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let mut config = Self {
            workers: 3,
            queue: QueueSettings::default(),
            breaker: BreakerSettings::default(),
            services: BTreeMap::new(),
            token: TokenSettings::default(),
            scoring: ScoringSettings::default(),
            download: DownloadSettings::default(),
            http: HttpSettings::default(),
        };
        config.ensure_builtin_services();
        config
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub default_max_attempts: u32,
    pub max_attempts_limit: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub min_priority: i32,
    pub max_priority: i32,
    /// Finished jobs kept for inspection; the oldest are evicted beyond this.
    pub max_finished_jobs: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            default_max_attempts: 3,
            max_attempts_limit: 10,
            base_delay_ms: 2_000,
            max_delay_ms: 300_000,
            min_priority: -100,
            max_priority: 100,
            max_finished_jobs: 10_000,
        }
    }
}

impl QueueSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_secs: u64,
    pub reset_timeout_secs: u64,
    pub half_open_max_calls: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_secs: 60,
            reset_timeout_secs: 300,
            half_open_max_calls: 2,
        }
    }
}

impl BreakerSettings {
    pub fn to_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .with_failure_threshold(self.failure_threshold)
            .with_success_threshold(self.success_threshold)
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_reset_timeout(Duration::from_secs(self.reset_timeout_secs))
            .with_half_open_max_calls(self.half_open_max_calls)
    }
}

/// Per-service overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Enables the rate limiter for this service when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_interval_ms: Option<u64>,
}

impl ServiceSettings {
    pub fn breaker_config(&self, defaults: &BreakerSettings) -> CircuitBreakerConfig {
        let mut cfg = defaults.to_config();
        if let Some(t) = self.failure_threshold {
            cfg = cfg.with_failure_threshold(t);
        }
        if let Some(t) = self.success_threshold {
            cfg = cfg.with_success_threshold(t);
        }
        if let Some(secs) = self.timeout_secs {
            cfg = cfg.with_timeout(Duration::from_secs(secs));
        }
        cfg
    }

    pub fn rate_limiter_config(&self) -> Option<RateLimiterConfig> {
        self.min_interval_ms
            .map(|ms| RateLimiterConfig::new(Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenSettings {
    pub skew_secs: u64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self { skew_secs: 60 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    pub min_improvement_score: f64,
    /// Priority given to jobs created from missing-album candidates.
    pub download_priority: i32,
    /// Priority given to jobs created from quality-upgrade candidates.
    pub upgrade_priority: i32,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            min_improvement_score: 0.3,
            download_priority: 0,
            upgrade_priority: -10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub poll_interval_ms: u64,
    pub max_polls: u32,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            max_polls: 900,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub catalog_api_base: String,
    pub catalog_accounts_base: String,
    pub metadata_base_url: String,
    pub download_base_url: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: format!(
                "media-orchestrator/{} ( https://github.com/media-orchestrator )",
                env!("CARGO_PKG_VERSION")
            ),
            catalog_api_base: "https://api.spotify.com".to_string(),
            catalog_accounts_base: "https://accounts.spotify.com".to_string(),
            metadata_base_url: "https://musicbrainz.org".to_string(),
            download_base_url: "http://localhost:5030".to_string(),
        }
    }
}

/// MusicBrainz allows one request per second per client.
const DEFAULT_METADATA_MIN_INTERVAL_MS: u64 = 1_000;

fn config_error(msg: impl Into<String>, field: &str) -> Error {
    Error::configuration_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("config"),
    )
}

impl OrchestratorConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut config: OrchestratorConfig = serde_yaml::from_str(yaml)?;
        config.ensure_builtin_services();
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Built-in handlers rely on these services; a file may tune them but not drop them.
    fn ensure_builtin_services(&mut self) {
        self.services.entry(DOWNLOAD_SERVICE.to_string()).or_default();
        self.services.entry(CATALOG_SERVICE.to_string()).or_default();
        let metadata = self
            .services
            .entry(METADATA_SERVICE.to_string())
            .or_default();
        if metadata.min_interval_ms.is_none() {
            metadata.min_interval_ms = Some(DEFAULT_METADATA_MIN_INTERVAL_MS);
        }
    }

    /// Apply `MEDIA_ORCH_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim()
                .parse::<T>()
                .map_err(|_| config_error(format!("invalid value '{}'", raw), key))
        }

        if let Some(v) = lookup("MEDIA_ORCH_WORKERS") {
            self.workers = parse("MEDIA_ORCH_WORKERS", v)?;
        }
        if let Some(v) = lookup("MEDIA_ORCH_BREAKER_FAILURE_THRESHOLD") {
            self.breaker.failure_threshold = parse("MEDIA_ORCH_BREAKER_FAILURE_THRESHOLD", v)?;
        }
        if let Some(v) = lookup("MEDIA_ORCH_BREAKER_TIMEOUT_SECS") {
            self.breaker.timeout_secs = parse("MEDIA_ORCH_BREAKER_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("MEDIA_ORCH_METADATA_MIN_INTERVAL_MS") {
            let ms = parse("MEDIA_ORCH_METADATA_MIN_INTERVAL_MS", v)?;
            self.services
                .entry(METADATA_SERVICE.to_string())
                .or_default()
                .min_interval_ms = Some(ms);
        }
        if let Some(v) = lookup("MEDIA_ORCH_TOKEN_SKEW_SECS") {
            self.token.skew_secs = parse("MEDIA_ORCH_TOKEN_SKEW_SECS", v)?;
        }
        if let Some(v) = lookup("MEDIA_ORCH_MIN_IMPROVEMENT_SCORE") {
            self.scoring.min_improvement_score = parse("MEDIA_ORCH_MIN_IMPROVEMENT_SCORE", v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=64).contains(&self.workers) {
            return Err(config_error("must be between 1 and 64", "workers"));
        }
        let q = &self.queue;
        if q.max_attempts_limit == 0 {
            return Err(config_error("must be at least 1", "queue.max_attempts_limit"));
        }
        if q.default_max_attempts == 0 || q.default_max_attempts > q.max_attempts_limit {
            return Err(config_error(
                format!("must be between 1 and {}", q.max_attempts_limit),
                "queue.default_max_attempts",
            ));
        }
        if q.base_delay_ms > q.max_delay_ms {
            return Err(config_error(
                "must not exceed queue.max_delay_ms",
                "queue.base_delay_ms",
            ));
        }
        if q.min_priority > q.max_priority {
            return Err(config_error(
                "must not exceed queue.max_priority",
                "queue.min_priority",
            ));
        }
        if q.max_finished_jobs == 0 {
            return Err(config_error("must be at least 1", "queue.max_finished_jobs"));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(config_error("must be at least 1", "breaker.failure_threshold"));
        }
        if self.breaker.success_threshold == 0 {
            return Err(config_error("must be at least 1", "breaker.success_threshold"));
        }
        for (field, priority) in [
            ("scoring.download_priority", self.scoring.download_priority),
            ("scoring.upgrade_priority", self.scoring.upgrade_priority),
        ] {
            if !(q.min_priority..=q.max_priority).contains(&priority) {
                return Err(config_error(
                    format!(
                        "must be within queue priority range [{}, {}]",
                        q.min_priority, q.max_priority
                    ),
                    field,
                ));
            }
        }
        for (name, service) in &self.services {
            if service.min_interval_ms == Some(0) {
                return Err(config_error(
                    "must be greater than 0 when set",
                    &format!("services.{}.min_interval_ms", name),
                ));
            }
        }
        if !matches!(
            self.services.get(METADATA_SERVICE).and_then(|s| s.min_interval_ms),
            Some(ms) if ms > 0
        ) {
            return Err(config_error(
                "metadata lookups must be rate limited",
                &format!("services.{}.min_interval_ms", METADATA_SERVICE),
            ));
        }
        let score = self.scoring.min_improvement_score;
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(config_error(
                "must be within [0, 1]",
                "scoring.min_improvement_score",
            ));
        }
        for (field, value) in [
            ("http.catalog_api_base", &self.http.catalog_api_base),
            ("http.catalog_accounts_base", &self.http.catalog_accounts_base),
            ("http.metadata_base_url", &self.http.metadata_base_url),
            ("http.download_base_url", &self.http.download_base_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| config_error(format!("invalid URL '{}': {}", value, e), field))?;
        }
        Ok(())
    }

    pub fn token_skew(&self) -> Duration {
        Duration::from_secs(self.token.skew_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.download.poll_interval_ms)
    }
}
