//! Built-in handlers, one per [`JobKind`](crate::jobs::JobKind).
//!
//! Each handler calls its collaborator only through the matching
//! [`ProtectedService`](crate::resilience::ProtectedService) and checks for
//! cancellation before every network call.

mod download;
mod enrich;
mod sync_check;

pub use download::{DownloadHandler, DownloadRequest};
pub use enrich::{EnrichHandler, EnrichRequest};
pub use sync_check::{CatalogScan, SyncCheckHandler, SyncCheckRequest};
