//! Quality-upgrade scoring.

use super::candidate::{Candidate, Evidence};
use super::format::AudioFormat;
use crate::library::{LibraryFile, LibrarySnapshot};
use serde_json::json;
use std::cmp::Ordering;

const BITRATE_WEIGHT: f64 = 0.4;
const FORMAT_WEIGHT: f64 = 0.6;

/// Relative bitrate improvement clamped to `[0, 1]`.
///
/// A file with an unknown (zero) bitrate gains fully from any known target.
pub fn bitrate_gain(current_kbps: u32, target_kbps: u32) -> f64 {
    if current_kbps == 0 {
        return if target_kbps > 0 { 1.0 } else { 0.0 };
    }
    let gain = (target_kbps as f64 - current_kbps as f64) / current_kbps as f64;
    gain.clamp(0.0, 1.0)
}

/// 1.0 for lossy to lossless, 0.5 for a strictly better lossy tier, else 0.0.
pub fn format_gain(current: AudioFormat, target: AudioFormat) -> f64 {
    match (current.lossy_tier(), target.lossy_tier()) {
        (Some(_), None) => 1.0,
        (Some(cur), Some(tgt)) if tgt > cur => 0.5,
        _ => 0.0,
    }
}

pub fn upgrade_score(
    current_kbps: u32,
    current_format: AudioFormat,
    target_kbps: u32,
    target_format: AudioFormat,
) -> f64 {
    let score = BITRATE_WEIGHT * bitrate_gain(current_kbps, target_kbps)
        + FORMAT_WEIGHT * format_gain(current_format, target_format);
    score.clamp(0.0, 1.0)
}

fn score_file(file: &LibraryFile) -> Option<(Candidate, f64)> {
    let target = file.best_available.as_ref()?;
    let b_gain = bitrate_gain(file.bitrate_kbps, target.bitrate_kbps);
    let f_gain = format_gain(file.format, target.format);
    let score = upgrade_score(file.bitrate_kbps, file.format, target.bitrate_kbps, target.format);

    let mut evidence = Evidence::new();
    evidence.insert("track_id".into(), json!(file.track_id));
    evidence.insert("artist".into(), json!(file.artist));
    evidence.insert("title".into(), json!(file.title));
    evidence.insert("path".into(), json!(file.path));
    evidence.insert("current_bitrate_kbps".into(), json!(file.bitrate_kbps));
    evidence.insert("current_format".into(), json!(file.format));
    evidence.insert("target_bitrate_kbps".into(), json!(target.bitrate_kbps));
    evidence.insert("target_format".into(), json!(target.format));
    evidence.insert("target_source".into(), json!(target.source));
    evidence.insert("bitrate_gain".into(), json!(b_gain));
    evidence.insert("format_gain".into(), json!(f_gain));
    evidence.insert(
        "search_query".into(),
        json!(format!("{} {}", file.artist, file.title).trim()),
    );
    Some((Candidate::quality_upgrade(file.track_id.clone(), score, evidence), b_gain))
}

/// Score every file that has a better version available.
///
/// Candidates below `min_improvement_score` are dropped. The rest are ordered
/// by score, then bitrate gain (both descending), then subject id.
pub fn score_quality_upgrades(snapshot: &LibrarySnapshot, min_improvement_score: f64) -> Vec<Candidate> {
    let mut scored: Vec<(Candidate, f64)> = snapshot
        .files
        .iter()
        .filter_map(score_file)
        .filter(|(c, _)| c.score >= min_improvement_score)
        .collect();

    scored.sort_by(|(a, a_gain), (b, b_gain)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b_gain.partial_cmp(a_gain).unwrap_or(Ordering::Equal))
            .then_with(|| a.subject_id.cmp(&b.subject_id))
    });
    scored.into_iter().map(|(c, _)| c).collect()
}
