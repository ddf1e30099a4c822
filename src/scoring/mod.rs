//! # Automation Scoring
//!
//! Pure functions that turn library snapshots and catalog listings into
//! ranked [`Candidate`]s. Nothing here performs I/O: catalog data arrives
//! already fetched through the protected clients, so identical inputs always
//! produce identical, identically ordered output.
//!
//! | Function | Candidate kind |
//! |----------|----------------|
//! | [`score_missing_albums`] | [`CandidateKind::MissingAlbum`], score 1.0 |
//! | [`score_quality_upgrades`] | [`CandidateKind::QualityUpgrade`], `0.4 * bitrate_gain + 0.6 * format_gain` |

mod candidate;
mod format;
mod missing;
mod upgrade;

pub use candidate::{Candidate, CandidateKind, Evidence};
pub use format::AudioFormat;
pub use missing::{completeness, score_missing_albums};
pub use upgrade::{bitrate_gain, format_gain, score_quality_upgrades, upgrade_score};
