use std::time::Duration;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "queue.base_delay_ms", "job.priority")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "job_queue", "config_loader")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Unified error type for the orchestration core.
///
/// Collaborator failures are folded into a few actionable categories so the
/// job queue can turn every failure into a retry-or-fail decision.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Transient service error ({service}): {message}")]
    Transient {
        service: String,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Authentication expired for {account}: {message}")]
    AuthExpired { account: String, message: String },

    #[error("Circuit open for {service}, retry after {}ms", .retry_after.as_millis())]
    CircuitOpen {
        service: String,
        retry_after: Duration,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Remote error: HTTP {status} from {service}: {message}")]
    Remote {
        service: String,
        status: u16,
        message: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a transient (retryable) service error.
    pub fn transient(service: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::Transient {
            service: service.into(),
            message: msg.into(),
            retry_after: None,
        }
    }

    /// Create an authentication-expired error for an account.
    pub fn auth_expired(account: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::AuthExpired {
            account: account.into(),
            message: msg.into(),
        }
    }

    /// Create a new runtime error without context
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::runtime_with_context(msg, ErrorContext::new())
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::validation_with_context(msg, ErrorContext::new())
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Whether a circuit breaker should count this error against the service.
    ///
    /// Only evidence that the remote side is unhealthy counts. A 401 or 404
    /// proves the service answered.
    pub fn is_service_failure(&self) -> bool {
        match self {
            Error::Transient { .. } | Error::Io(_) => true,
            Error::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether another attempt can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transient { .. } | Error::CircuitOpen { .. } | Error::Io(_) | Error::Runtime { .. }
        )
    }

    /// Server- or breaker-provided hint for how long to wait before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Transient { retry_after, .. } => *retry_after,
            Error::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}
