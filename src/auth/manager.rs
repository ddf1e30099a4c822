use super::token::Token;
use crate::resilience::registry::ProtectedService;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Exchanges a refresh token for a fresh access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh_token(&self, refresh_token: &str) -> Result<Token>;
}

type RefreshFuture = Shared<BoxFuture<'static, std::result::Result<Token, Arc<Error>>>>;

#[derive(Default)]
struct Slot {
    token: Option<Token>,
    /// The refresh currently in flight; concurrent callers attach to it.
    inflight: Option<RefreshFuture>,
}

/// Keeps the bearer token of exactly one catalog account valid.
///
/// Refreshes run through the catalog's [`ProtectedService`] and are
/// single-flight: while one refresh is running every other caller awaits the
/// same future instead of starting its own.
pub struct TokenManager {
    account: String,
    refresher: Arc<dyn TokenRefresher>,
    service: Arc<ProtectedService>,
    skew: Duration,
    slot: Arc<Mutex<Slot>>,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TokenManager {
    pub fn new(
        account: impl Into<String>,
        refresher: Arc<dyn TokenRefresher>,
        service: Arc<ProtectedService>,
        skew: Duration,
    ) -> Self {
        Self {
            account: account.into(),
            refresher,
            service,
            skew,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    /// Seed the manager with a token loaded from persistence.
    pub fn with_token(self, token: Token) -> Self {
        self.set_token(token);
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn skew(&self) -> Duration {
        self.skew
    }

    pub fn set_token(&self, token: Token) {
        lock(&self.slot).token = Some(token);
    }

    /// Copy of the cached token, valid or not.
    pub fn current(&self) -> Option<Token> {
        lock(&self.slot).token.clone()
    }

    /// Force the next [`TokenManager::get_valid_token`] to refresh.
    pub fn invalidate(&self) {
        if let Some(token) = lock(&self.slot).token.as_mut() {
            token.expires_at = SystemTime::UNIX_EPOCH;
            debug!(account = %self.account, "token invalidated");
        }
    }

    /// Invalidate only while `access_token` is still the cached one. A token
    /// refreshed in the meantime is left alone. Returns whether it was cleared.
    pub fn invalidate_if(&self, access_token: &str) -> bool {
        let mut slot = lock(&self.slot);
        match slot.token.as_mut() {
            Some(token) if token.access_token == access_token => {
                token.expires_at = SystemTime::UNIX_EPOCH;
                debug!(account = %self.account, "token invalidated");
                true
            }
            _ => {
                debug!(account = %self.account, "token already replaced, not invalidated");
                false
            }
        }
    }

    /// Return a token valid for at least `skew`, refreshing when needed.
    pub async fn get_valid_token(&self) -> Result<Token> {
        let refresh = {
            let mut slot = lock(&self.slot);
            if let Some(token) = slot.token.as_ref() {
                if token.is_valid_for(self.skew) {
                    return Ok(token.clone());
                }
            }
            match slot.inflight.as_ref() {
                Some(fut) => fut.clone(),
                None => {
                    let fut = self.start_refresh(slot.token.as_ref());
                    slot.inflight = Some(fut.clone());
                    fut
                }
            }
        };
        refresh.await.map_err(|e| self.surface(&e))
    }

    fn start_refresh(&self, current: Option<&Token>) -> RefreshFuture {
        let account = self.account.clone();
        let refresher = Arc::clone(&self.refresher);
        let service = Arc::clone(&self.service);
        let slot = Arc::clone(&self.slot);
        let skew = self.skew;
        let refresh_token = current.map(|t| t.refresh_token.clone());

        async move {
            info!(account = %account, "refreshing access token");
            let outcome = match refresh_token.as_deref() {
                None | Some("") => Err(Error::auth_expired(
                    account.clone(),
                    "no refresh token available",
                )),
                Some(rt) => service
                    .execute(|| refresher.refresh_token(rt))
                    .await
                    .map(|mut token| {
                        if token.refresh_token.is_empty() {
                            token.refresh_token = rt.to_string();
                        }
                        token
                    }),
            }
            .and_then(|token| {
                if token.is_valid_for(skew) {
                    Ok(token)
                } else {
                    Err(Error::auth_expired(
                        account.clone(),
                        "refreshed token expires within the skew window",
                    ))
                }
            });

            let mut slot = lock(&slot);
            slot.inflight = None;
            match outcome {
                Ok(token) => {
                    info!(
                        account = %account,
                        expires_in_secs = token.expires_in().as_secs(),
                        "access token refreshed"
                    );
                    slot.token = Some(token.clone());
                    Ok(token)
                }
                Err(e) => {
                    warn!(account = %account, error = %e, "token refresh failed");
                    Err(Arc::new(e))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// A breaker rejection means no refresh was attempted; anything else means
    /// the account cannot currently be authenticated.
    fn surface(&self, err: &Error) -> Error {
        match err {
            Error::CircuitOpen {
                service,
                retry_after,
            } => Error::CircuitOpen {
                service: service.clone(),
                retry_after: *retry_after,
            },
            Error::AuthExpired { account, message } => Error::AuthExpired {
                account: account.clone(),
                message: message.clone(),
            },
            other => Error::auth_expired(self.account.clone(), other.to_string()),
        }
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("account", &self.account)
            .field("service", &self.service.name())
            .field("skew", &self.skew)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitBreakerConfig;
    use crate::resilience::registry::CATALOG_SERVICE;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeRefresher {
        calls: AtomicUsize,
        lifetime: Duration,
        fail: bool,
    }

    impl FakeRefresher {
        fn new(lifetime: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                lifetime,
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(Duration::from_secs(3600))
            }
        }
    }

    #[async_trait]
    impl TokenRefresher for FakeRefresher {
        async fn refresh_token(&self, refresh_token: &str) -> Result<Token> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail {
                return Err(Error::transient(CATALOG_SERVICE, "token endpoint unavailable"));
            }
            assert_eq!(refresh_token, "refresh-1");
            Ok(Token::new(format!("access-{}", n + 1), "", self.lifetime))
        }
    }

    fn catalog(threshold: u32) -> Arc<ProtectedService> {
        Arc::new(ProtectedService::new(
            CATALOG_SERVICE,
            CircuitBreakerConfig::new().with_failure_threshold(threshold),
            None,
        ))
    }

    fn manager(refresher: Arc<FakeRefresher>, service: Arc<ProtectedService>) -> TokenManager {
        TokenManager::new("main", refresher, service, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_cached_token_is_returned_without_refresh() {
        let refresher = Arc::new(FakeRefresher::new(Duration::from_secs(3600)));
        let tm = manager(refresher.clone(), catalog(5))
            .with_token(Token::new("access-1", "refresh-1", Duration::from_secs(600)));
        let token = tm.get_valid_token().await.unwrap();
        assert_eq!(token.access_token, "access-1");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_token_inside_skew_is_refreshed_and_keeps_refresh_token() {
        let refresher = Arc::new(FakeRefresher::new(Duration::from_secs(3600)));
        let tm = manager(refresher.clone(), catalog(5))
            .with_token(Token::new("access-1", "refresh-1", Duration::from_secs(30)));
        let token = tm.get_valid_token().await.unwrap();
        assert_eq!(token.access_token, "access-2");
        assert_eq!(token.refresh_token, "refresh-1");
        assert!(token.is_valid_for(tm.skew()));
        assert_eq!(tm.current().unwrap().access_token, "access-2");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let refresher = Arc::new(FakeRefresher::new(Duration::from_secs(3600)));
        let tm = Arc::new(
            manager(refresher.clone(), catalog(5))
                .with_token(Token::new("access-1", "refresh-1", Duration::ZERO)),
        );

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let tm = Arc::clone(&tm);
                tokio::spawn(async move { tm.get_valid_token().await })
            })
            .collect();
        for h in handles {
            let token = h.await.unwrap().unwrap();
            assert_eq!(token.access_token, "access-2");
        }
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_surfaces_auth_expired_and_is_not_sticky() {
        let refresher = Arc::new(FakeRefresher::failing());
        let tm = manager(refresher.clone(), catalog(5))
            .with_token(Token::new("access-1", "refresh-1", Duration::ZERO));

        let err = tm.get_valid_token().await.unwrap_err();
        assert!(matches!(err, Error::AuthExpired { ref account, .. } if account == "main"));
        let _ = tm.get_valid_token().await.unwrap_err();
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_short_lived_refresh_is_rejected() {
        let refresher = Arc::new(FakeRefresher::new(Duration::from_secs(10)));
        let tm = manager(refresher, catalog(5))
            .with_token(Token::new("access-1", "refresh-1", Duration::ZERO));
        let err = tm.get_valid_token().await.unwrap_err();
        assert!(matches!(err, Error::AuthExpired { .. }));
    }

    #[tokio::test]
    async fn test_open_breaker_skips_refresh_call() {
        let refresher = Arc::new(FakeRefresher::new(Duration::from_secs(3600)));
        let service = catalog(1);
        service.breaker().record_failure();
        let tm = manager(refresher.clone(), service)
            .with_token(Token::new("access-1", "refresh-1", Duration::ZERO));
        let err = tm.get_valid_token().await.unwrap_err();
        assert!(matches!(err, Error::CircuitOpen { .. }));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_token_and_invalidate() {
        let refresher = Arc::new(FakeRefresher::new(Duration::from_secs(3600)));
        let tm = manager(refresher.clone(), catalog(5));
        assert!(matches!(
            tm.get_valid_token().await,
            Err(Error::AuthExpired { .. })
        ));

        tm.set_token(Token::new("access-1", "refresh-1", Duration::from_secs(3600)));
        assert_eq!(tm.get_valid_token().await.unwrap().access_token, "access-1");
        tm.invalidate();
        assert_eq!(tm.get_valid_token().await.unwrap().access_token, "access-2");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_if_leaves_newer_token_alone() {
        let refresher = Arc::new(FakeRefresher::new(Duration::from_secs(3600)));
        let tm = manager(refresher.clone(), catalog(5))
            .with_token(Token::new("access-1", "refresh-1", Duration::from_secs(3600)));

        tm.set_token(Token::new("access-9", "refresh-1", Duration::from_secs(3600)));
        assert!(!tm.invalidate_if("access-1"));
        assert_eq!(tm.get_valid_token().await.unwrap().access_token, "access-9");

        assert!(tm.invalidate_if("access-9"));
        assert_eq!(tm.get_valid_token().await.unwrap().access_token, "access-2");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }
}
