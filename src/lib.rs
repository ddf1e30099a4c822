//! # media-orchestrator
//!
//! Resilience and orchestration core for a personal music library that is
//! kept synchronized with a streaming catalog, enriched from a metadata
//! service, and completed through a peer-to-peer download daemon.
//!
//! ## Overview
//!
//! Every outbound call is protected by a per-service circuit breaker and,
//! where the remote usage policy demands it, a strictly serialized rate
//! limiter. Background work runs as prioritized jobs on a fixed worker pool
//! with exponential-backoff retries. Pure scoring functions turn library
//! snapshots and catalog listings into candidates that become new jobs.
//!
//! ```text
//! request ─▶ TokenManager ─▶ RateLimiter ─▶ CircuitBreaker ─▶ network
//!                                                    │
//! JobQueue ◀── retry / fail decision ◀───────────────┘
//!    ▲
//!    └── Candidate::into_job ◀── scoring ◀── library snapshot + catalog
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`resilience`] | Circuit breaker, rate limiter, protected-service registry |
//! | [`auth`] | Token cache with single-flight refresh |
//! | [`jobs`] | Job model, priority queue, retry policy, worker pool, handlers |
//! | [`scoring`] | Missing-album and quality-upgrade scoring |
//! | [`clients`] | Collaborator traits and their HTTP implementations |
//! | [`library`] | Library snapshot model and persistence seam |
//! | [`orchestrator`] | Facade tying it all together |
//! | [`config`] | YAML configuration with environment overrides |
//!
//! ## Quick Start
//!
//! ```rust
//! use media_orchestrator::scoring::{upgrade_score, AudioFormat};
//!
//! let score = upgrade_score(192, AudioFormat::Mp3, 1411, AudioFormat::Flac);
//! assert_eq!(score, 1.0);
//! ```

pub mod auth;
pub mod clients;
pub mod config;
pub mod jobs;
pub mod library;
pub mod orchestrator;
pub mod resilience;
pub mod scoring;

pub use auth::{Token, TokenManager};
pub use config::OrchestratorConfig;
pub use jobs::{Job, JobId, JobKind, JobStatus, NewJob};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use scoring::{Candidate, CandidateKind};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
