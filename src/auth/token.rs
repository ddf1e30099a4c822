use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};

/// OAuth bearer token for one catalog account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: SystemTime,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

impl Token {
    /// Token expiring `expires_in` from now.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: Duration,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: SystemTime::now() + expires_in,
            scopes: BTreeSet::new(),
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Parse a space-separated OAuth `scope` string.
    pub fn with_scope_string(self, scope: &str) -> Self {
        self.with_scopes(scope.split_whitespace())
    }

    /// True when the token is still valid `skew` from now.
    pub fn is_valid_for(&self, skew: Duration) -> bool {
        self.expires_at > SystemTime::now() + skew
    }

    /// Remaining lifetime, zero once expired.
    pub fn expires_in(&self) -> Duration {
        self.expires_at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_in_secs", &self.expires_in().as_secs())
            .field("scopes", &self.scopes)
            .finish()
    }
}
