//! Missing-album detection.

use super::candidate::{Candidate, Evidence};
use crate::clients::Release;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

/// Fraction of catalog releases owned locally. An empty catalog is complete.
pub fn completeness(owned_count: usize, total_count: usize) -> f64 {
    if total_count == 0 {
        1.0
    } else {
        owned_count as f64 / total_count as f64
    }
}

/// One [`Candidate`] per catalog release not owned locally.
///
/// Ownership is decided by external release id only; titles are never
/// compared. Duplicate ids in the catalog listing count once. Output is
/// ordered by release date, then title, then id.
pub fn score_missing_albums(
    subject_id: &str,
    releases: &[Release],
    owned: &BTreeSet<String>,
) -> Vec<Candidate> {
    let catalog: BTreeMap<&str, &Release> = releases
        .iter()
        .filter(|r| !r.id.is_empty())
        .map(|r| (r.id.as_str(), r))
        .collect();
    let total_count = catalog.len();
    let owned_count = catalog.keys().filter(|id| owned.contains(**id)).count();
    let ratio = completeness(owned_count, total_count);

    let mut missing: Vec<&Release> = catalog
        .values()
        .filter(|r| !owned.contains(&r.id))
        .copied()
        .collect();
    missing.sort_by(|a, b| {
        a.release_date
            .as_deref()
            .unwrap_or("")
            .cmp(b.release_date.as_deref().unwrap_or(""))
            .then_with(|| a.title.cmp(&b.title))
            .then_with(|| a.id.cmp(&b.id))
    });

    missing
        .into_iter()
        .map(|release| {
            let mut evidence = Evidence::new();
            evidence.insert("catalog_subject_id".into(), json!(subject_id));
            evidence.insert("release_id".into(), json!(release.id));
            evidence.insert("title".into(), json!(release.title));
            evidence.insert("artist".into(), json!(release.artist));
            evidence.insert("release_type".into(), json!(release.release_type));
            evidence.insert("release_date".into(), json!(release.release_date));
            evidence.insert("total_tracks".into(), json!(release.total_tracks));
            evidence.insert("owned_count".into(), json!(owned_count));
            evidence.insert("total_count".into(), json!(total_count));
            evidence.insert("completeness".into(), json!(ratio));
            evidence.insert(
                "search_query".into(),
                json!(format!("{} {}", release.artist, release.title).trim()),
            );
            Candidate::missing_album(release.id.clone(), evidence)
        })
        .collect()
}
