//! Load, override, validate and print the effective orchestrator configuration.
//!
//! Usage: `orchestrator-config [path/to/config.yaml]`. Without an argument the
//! file named by `MEDIA_ORCH_CONFIG` is used, falling back to the defaults.
//! `MEDIA_ORCH_*` overrides are applied on top. Exits non-zero when the result
//! does not validate.

use anyhow::Context;
use media_orchestrator::resilience::ServiceRegistry;
use media_orchestrator::OrchestratorConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("MEDIA_ORCH_CONFIG").ok());

    let mut config = match &path {
        Some(path) => {
            info!(path = %path, "loading configuration");
            OrchestratorConfig::from_file(path)
                .with_context(|| format!("failed to load configuration from {}", path))?
        }
        None => {
            info!("no configuration file given, using defaults");
            OrchestratorConfig::default()
        }
    };
    config
        .apply_env_overrides()
        .context("invalid MEDIA_ORCH_* override")?;
    config.validate().context("configuration is invalid")?;

    let registry = ServiceRegistry::from_config(&config);
    for stats in registry.all_stats() {
        let limiter = registry
            .limiter_snapshot(&stats.service)
            .map(|s| format!("{}ms", s.min_interval.as_millis()))
            .unwrap_or_else(|| "none".to_string());
        info!(
            service = %stats.service,
            failure_threshold = stats.failure_threshold,
            timeout_secs = stats.timeout.as_secs(),
            min_interval = %limiter,
            "protected service"
        );
    }

    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
