//! # External Collaborators
//!
//! Narrow traits for the three remote services plus reqwest implementations.
//! None of these types apply resilience on their own; callers wrap every call
//! in the matching [`ProtectedService`](crate::resilience::ProtectedService).
//!
//! | Trait | Service name | HTTP implementation |
//! |-------|--------------|---------------------|
//! | [`DownloadClient`] | `download-service` | [`SlskdClient`] |
//! | [`CatalogClient`] | `catalog-service` | [`SpotifyCatalogClient`] |
//! | [`MetadataClient`] | `metadata-service` | [`MusicBrainzClient`] |
//!
//! Response statuses map onto [`Error`](crate::Error) the same way for all
//! three: 401 is `AuthExpired`, 429 and 5xx are `Transient` (with the
//! `Retry-After` hint), other 4xx are `Remote`, and transport failures are
//! `Transient`.

mod catalog;
mod download;
mod http;
mod metadata;

pub use catalog::{CatalogClient, Release, SpotifyCatalogClient};
pub use download::{DownloadClient, DownloadHandle, DownloadState, SearchResult, SlskdClient};
pub use metadata::{LookupQuery, MetadataClient, MetadataRecord, MusicBrainzClient};
