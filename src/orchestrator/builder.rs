use super::Orchestrator;
use crate::auth::{Token, TokenManager, TokenRefresher};
use crate::clients::{CatalogClient, DownloadClient, MetadataClient};
use crate::config::OrchestratorConfig;
use crate::jobs::handlers::{CatalogScan, DownloadHandler, EnrichHandler, SyncCheckHandler};
use crate::jobs::{
    CompositeEventSink, HandlerRegistry, JobEventSink, JobHandler, JobQueue, StoreAuditSink,
    WorkerPool,
};
use crate::library::{InMemoryLibraryStore, LibraryStore};
use crate::resilience::{ServiceRegistry, CATALOG_SERVICE, DOWNLOAD_SERVICE, METADATA_SERVICE};
use crate::{Error, ErrorContext, Result};
use std::sync::Arc;
use tracing::info;

const DEFAULT_ACCOUNT: &str = "default";

/// Builder for [`Orchestrator`].
///
/// Only the catalog client is mandatory. Download and enrich jobs are
/// accepted only when the matching client was supplied.
pub struct OrchestratorBuilder {
    config: Option<OrchestratorConfig>,
    account: String,
    catalog: Option<(Arc<dyn CatalogClient>, Arc<dyn TokenRefresher>)>,
    download: Option<Arc<dyn DownloadClient>>,
    metadata: Option<Arc<dyn MetadataClient>>,
    store: Option<Arc<dyn LibraryStore>>,
    token: Option<Token>,
    sinks: Vec<Arc<dyn JobEventSink>>,
    extra_handlers: Vec<Arc<dyn JobHandler>>,
    apply_env: bool,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            account: DEFAULT_ACCOUNT.to_string(),
            catalog: None,
            download: None,
            metadata: None,
            store: None,
            token: None,
            sinks: Vec::new(),
            extra_handlers: Vec::new(),
            apply_env: false,
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Apply `MEDIA_ORCH_*` environment overrides on top of the config at build time.
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_env = true;
        self
    }

    /// Name of the catalog account, used in logs and auth errors.
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    pub fn with_catalog<C>(mut self, catalog: Arc<C>) -> Self
    where
        C: CatalogClient + 'static,
    {
        let refresher: Arc<dyn TokenRefresher> = catalog.clone();
        let catalog: Arc<dyn CatalogClient> = catalog;
        self.catalog = Some((catalog, refresher));
        self
    }

    pub fn with_download_client(mut self, client: Arc<dyn DownloadClient>) -> Self {
        self.download = Some(client);
        self
    }

    pub fn with_metadata_client(mut self, client: Arc<dyn MetadataClient>) -> Self {
        self.metadata = Some(client);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn LibraryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Seed the token manager with a persisted token.
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn JobEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Register an additional handler; it replaces a built-in one of the same kind.
    pub fn with_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.extra_handlers.push(handler);
        self
    }

    /// Validate the configuration, wire services, and start the worker pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Orchestrator> {
        let mut config = self.config.unwrap_or_default();
        if self.apply_env {
            config.apply_env_overrides()?;
        }
        config.validate()?;

        let (catalog, refresher) = self.catalog.ok_or_else(|| {
            Error::configuration_with_context(
                "a catalog client is required",
                ErrorContext::new().with_source("orchestrator_builder"),
            )
        })?;
        let store: Arc<dyn LibraryStore> = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryLibraryStore::new()));

        let registry = Arc::new(ServiceRegistry::from_config(&config));
        let catalog_service = registry.require(CATALOG_SERVICE)?;

        let tokens = TokenManager::new(
            self.account.clone(),
            refresher,
            catalog_service.clone(),
            config.token_skew(),
        );
        if let Some(token) = self.token {
            tokens.set_token(token);
        }
        let tokens = Arc::new(tokens);

        let scan = CatalogScan {
            catalog,
            service: catalog_service,
            tokens: tokens.clone(),
            store: store.clone(),
        };

        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(SyncCheckHandler::new(
            scan.clone(),
            config.scoring.download_priority,
            config.queue.default_max_attempts,
        )));
        if let Some(client) = self.download {
            handlers.register(Arc::new(
                DownloadHandler::new(client, registry.require(DOWNLOAD_SERVICE)?)
                    .with_polling(config.poll_interval(), config.download.max_polls),
            ));
        }
        if let Some(client) = self.metadata {
            handlers.register(Arc::new(EnrichHandler::new(
                client,
                registry.require(METADATA_SERVICE)?,
            )));
        }
        for handler in self.extra_handlers {
            handlers.register(handler);
        }

        let mut events = CompositeEventSink::new().with_sink(Arc::new(StoreAuditSink::spawn(store.clone())));
        for sink in self.sinks {
            events = events.with_sink(sink);
        }

        let queue = JobQueue::with_events(config.queue.clone(), Arc::new(handlers), Arc::new(events));
        let pool = WorkerPool::start(config.workers, queue.clone(), Some(tokens.clone()));

        info!(
            account = %self.account,
            workers = config.workers,
            services = ?registry.names(),
            kinds = ?queue.handlers().kinds(),
            "orchestrator started"
        );

        Ok(Orchestrator::new(config, registry, queue, pool, tokens, scan, store))
    }
}
