//! Links points of interest to nearby metric records.
//!
//! For each POI the closest record of every metric type within
//! `max_distance_km` is selected, and the overall score is
//! `round(10 × mean(selected scores))` on a 0-100 scale.

use std::collections::BTreeMap;

use safety_metrics_geography_models::PointOfInterest;
use safety_metrics_scoring_models::{MetricType, ScoreUpdate};
use safety_metrics_source::progress::ProgressCallback;
use serde::{Deserialize, Serialize};

use crate::{Candidate, MetricIndex};

/// POIs with partial coverage logged individually.
const COVERAGE_LOG_LIMIT: usize = 20;

const fn default_k_nearest() -> usize {
    50
}

const fn default_max_distance_km() -> f64 {
    4.0
}

/// Linker parameters (`[linker]` in the run config).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LinkOptions {
    /// Candidates considered per POI.
    #[serde(default = "default_k_nearest")]
    pub k_nearest: usize,
    /// Candidates farther than this are ignored.
    #[serde(default = "default_max_distance_km")]
    pub max_distance_km: f64,
}

/// Linker parameters that would make every POI score meaningless.
#[derive(Debug, thiserror::Error)]
pub enum LinkOptionsError {
    #[error("linker.k_nearest must be at least 1")]
    NoCandidates,

    #[error("linker.max_distance_km must be a non-negative number, got {0}")]
    InvalidDistance(f64),
}

impl LinkOptions {
    /// # Errors
    ///
    /// Returns [`LinkOptionsError`] if no candidates would be considered or
    /// the distance cutoff is negative or not finite.
    pub fn validate(&self) -> Result<(), LinkOptionsError> {
        if self.k_nearest == 0 {
            return Err(LinkOptionsError::NoCandidates);
        }
        if !self.max_distance_km.is_finite() || self.max_distance_km < 0.0 {
            return Err(LinkOptionsError::InvalidDistance(self.max_distance_km));
        }
        Ok(())
    }
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            k_nearest: default_k_nearest(),
            max_distance_km: default_max_distance_km(),
        }
    }
}

/// Counts describing one [`link_points`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSummary {
    pub pois: usize,
    pub scored: usize,
    /// POIs with no metric record in range.
    pub unscored: usize,
    /// Scored POIs missing at least one of the index's metric types.
    pub partial_coverage: usize,
    /// Distinct metric types in the index.
    pub metric_types_available: usize,
}

/// Computes the score update for a single POI.
///
/// Returns an unscored update when nothing is in range.
#[must_use]
pub fn link_point(
    index: &MetricIndex,
    poi: &PointOfInterest,
    scope_id: &str,
    options: &LinkOptions,
) -> ScoreUpdate {
    let mut best: BTreeMap<&MetricType, Candidate<'_>> = BTreeMap::new();

    for candidate in index.nearest(poi.latitude, poi.longitude, options.k_nearest) {
        if candidate.distance_km.is_nan() || candidate.distance_km > options.max_distance_km {
            continue;
        }
        best.entry(&candidate.record.metric_type)
            .and_modify(|current| {
                if closer(&candidate, current) {
                    *current = candidate;
                }
            })
            .or_insert(candidate);
    }

    let Some(closest) = best.values().copied().reduce(|a, b| if closer(&b, &a) { b } else { a })
    else {
        return ScoreUpdate::unscored(poi.id.clone(), scope_id);
    };

    ScoreUpdate {
        poi_id: poi.id.clone(),
        scope_id: scope_id.to_string(),
        overall_score: Some(overall_score(best.values().map(|c| c.record.score))),
        inferred_region_id: Some(closest.record.region_id.clone()),
        metric_types_found: Some(best.len()),
    }
}

/// Orders candidates by distance, then by record id.
fn closer(a: &Candidate<'_>, b: &Candidate<'_>) -> bool {
    a.distance_km < b.distance_km
        || (a.distance_km.total_cmp(&b.distance_km).is_eq() && a.record.id < b.record.id)
}

/// `round(10 × mean(scores))` clamped to `[0, 100]`, with exact halves
/// rounded to even. Empty input gives 0.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn overall_score(scores: impl Iterator<Item = f64>) -> u8 {
    let (sum, count) = scores.fold((0.0, 0usize), |(sum, n), s| (sum + s, n + 1));
    if count == 0 {
        return 0;
    }
    let value = (sum / count as f64 * 10.0).round_ties_even();
    if value.is_nan() {
        0
    } else {
        value.clamp(0.0, 100.0) as u8
    }
}

/// Links every POI, logging coverage gaps.
///
/// An empty index yields an unscored update for every POI.
pub fn link_points(
    index: &MetricIndex,
    pois: &[PointOfInterest],
    scope_id: &str,
    options: &LinkOptions,
    progress: &dyn ProgressCallback,
) -> (Vec<ScoreUpdate>, LinkSummary) {
    let mut summary = LinkSummary {
        pois: pois.len(),
        metric_types_available: index.metric_types().len(),
        ..LinkSummary::default()
    };

    if index.is_empty() {
        log::warn!(
            "No metric records for scope '{scope_id}', clearing scores for {} POIs",
            pois.len()
        );
    } else {
        log::info!(
            "Linking {} POIs to {} metric records ({} metric types)",
            pois.len(),
            index.len(),
            summary.metric_types_available
        );
    }

    progress.set_total(pois.len() as u64);
    let mut updates = Vec::with_capacity(pois.len());
    for poi in pois {
        let update = link_point(index, poi, scope_id, options);
        match update.metric_types_found {
            Some(found) => {
                summary.scored += 1;
                if found < summary.metric_types_available {
                    summary.partial_coverage += 1;
                    if summary.partial_coverage <= COVERAGE_LOG_LIMIT {
                        log_missing_types(index, poi, options);
                    }
                }
            }
            None => summary.unscored += 1,
        }
        updates.push(update);
        progress.inc(1);
    }
    progress.finish(format!("Linked {} POIs", summary.pois));

    log::info!(
        "POI linking for '{scope_id}': {} scored, {} without nearby metrics, {} with partial coverage",
        summary.scored,
        summary.unscored,
        summary.partial_coverage
    );
    if summary.partial_coverage > COVERAGE_LOG_LIMIT {
        log::debug!(
            "{} more POIs with partial coverage not shown",
            summary.partial_coverage - COVERAGE_LOG_LIMIT
        );
    }

    (updates, summary)
}

fn log_missing_types(index: &MetricIndex, poi: &PointOfInterest, options: &LinkOptions) {
    let found: Vec<&MetricType> = index
        .nearest(poi.latitude, poi.longitude, options.k_nearest)
        .filter(|c| c.distance_km <= options.max_distance_km)
        .map(|c| &c.record.metric_type)
        .collect();
    let missing: Vec<&str> = index
        .metric_types()
        .iter()
        .filter(|t| !found.contains(t))
        .map(MetricType::as_str)
        .collect();
    log::debug!(
        "POI {} ({}, {}) is missing metric types: {}",
        poi.id,
        poi.latitude,
        poi.longitude,
        missing.join(", ")
    );
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use safety_metrics_source::progress::NullProgress;

    use super::*;
    use crate::tests::record;

    fn poi(id: &str, lat: f64, lon: f64) -> PointOfInterest {
        PointOfInterest {
            id: id.to_string(),
            latitude: lat,
            longitude: lon,
        }
    }

    #[test]
    fn picks_closest_record_per_metric_type() {
        let index = MetricIndex::new(vec![
            record("near", "night", 34.001, -118.0, 9.0),
            record("far", "night", 34.02, -118.0, 1.0),
            record("v", "vehicle", 34.005, -118.0, 7.0),
        ]);
        let update = link_point(&index, &poi("p", 34.0, -118.0), "la", &LinkOptions::default());

        // mean(9, 7) = 8 -> 80
        assert_eq!(update.overall_score, Some(80));
        assert_eq!(update.metric_types_found, Some(2));
        assert_eq!(update.inferred_region_id.unwrap().as_str(), "near");
        assert_eq!(update.scope_id, "la");
    }

    #[test]
    fn nothing_in_range_is_unscored() {
        // ~11 km away
        let index = MetricIndex::new(vec![record("a", "night", 34.1, -118.0, 9.0)]);
        let update = link_point(&index, &poi("p", 34.0, -118.0), "la", &LinkOptions::default());
        assert_eq!(update, ScoreUpdate::unscored("p", "la"));
    }

    #[test]
    fn empty_index_clears_every_poi() {
        let index = MetricIndex::new(Vec::new());
        let (updates, summary) = link_points(
            &index,
            &[poi("a", 34.0, -118.0), poi("b", 35.0, -118.0)],
            "la",
            &LinkOptions::default(),
            &NullProgress,
        );
        assert_eq!(updates.len(), 2);
        assert!(updates.iter().all(|u| !u.is_scored()));
        assert_eq!(summary.unscored, 2);
        assert_eq!(summary.scored, 0);
    }

    #[test]
    fn k_limits_candidates() {
        let index = MetricIndex::new(vec![
            record("a", "night", 34.001, -118.0, 9.0),
            record("b", "vehicle", 34.002, -118.0, 5.0),
        ]);
        let options = LinkOptions {
            k_nearest: 1,
            ..LinkOptions::default()
        };
        let update = link_point(&index, &poi("p", 34.0, -118.0), "la", &options);
        assert_eq!(update.metric_types_found, Some(1));
        assert_eq!(update.overall_score, Some(90));
    }

    #[test]
    fn equidistant_records_break_ties_by_id() {
        let a = record("a", "night", 34.001, -118.0, 2.0);
        let b = record("b", "night", 34.001, -118.0, 8.0);
        let expected = if a.id < b.id { "a" } else { "b" };
        let index = MetricIndex::new(vec![a, b]);
        let update = link_point(&index, &poi("p", 34.0, -118.0), "la", &LinkOptions::default());
        assert_eq!(update.inferred_region_id.unwrap().as_str(), expected);
    }

    #[test]
    fn summary_counts_partial_coverage() {
        let index = MetricIndex::new(vec![
            record("a", "night", 34.001, -118.0, 9.0),
            record("b", "vehicle", 34.001, -118.0, 5.0),
            record("c", "night", 40.0, -100.0, 5.0),
        ]);
        let (updates, summary) = link_points(
            &index,
            &[
                poi("both", 34.0, -118.0),
                poi("night-only", 40.0, -100.0),
                poi("none", 0.5, 0.5),
            ],
            "la",
            &LinkOptions::default(),
            &NullProgress,
        );
        assert_eq!(summary.pois, 3);
        assert_eq!(summary.scored, 2);
        assert_eq!(summary.unscored, 1);
        assert_eq!(summary.partial_coverage, 1);
        assert_eq!(summary.metric_types_available, 2);
        assert_eq!(updates[0].overall_score, Some(70));
        assert_eq!(updates[1].overall_score, Some(50));
    }

    #[test]
    fn overall_score_rounds_mean() {
        assert_eq!(overall_score([9.9, 9.46].into_iter()), 97);
        assert_eq!(overall_score([10.0].into_iter()), 100);
        assert_eq!(overall_score(std::iter::empty()), 0);
    }

    #[test]
    fn validates_options() {
        assert!(LinkOptions::default().validate().is_ok());
        let no_candidates = LinkOptions {
            k_nearest: 0,
            ..LinkOptions::default()
        };
        assert!(matches!(
            no_candidates.validate(),
            Err(LinkOptionsError::NoCandidates)
        ));
        for distance in [f64::NAN, f64::INFINITY, -1.0] {
            let options = LinkOptions {
                max_distance_km: distance,
                ..LinkOptions::default()
            };
            assert!(matches!(
                options.validate(),
                Err(LinkOptionsError::InvalidDistance(_))
            ));
        }
    }

    #[test]
    fn overall_score_rounds_halves_to_even() {
        // 92.5 and 97.5 exactly
        assert_eq!(overall_score([9.0, 9.5].into_iter()), 92);
        assert_eq!(overall_score([9.5, 10.0].into_iter()), 98);
    }

    proptest! {
        #[test]
        fn overall_score_stays_in_range(scores in proptest::collection::vec(0.0f64..=10.0, 1..10)) {
            let score = overall_score(scores.iter().copied());
            prop_assert!(score <= 100);
        }

        #[test]
        fn scored_iff_metric_types_found(lat in 33.9f64..34.1, lon in -118.1f64..-117.9) {
            let index = MetricIndex::new(vec![
                record("a", "night", 34.0, -118.0, 9.0),
                record("b", "vehicle", 34.05, -118.05, 4.0),
            ]);
            let update = link_point(&index, &poi("p", lat, lon), "la", &LinkOptions::default());
            prop_assert_eq!(
                update.overall_score.is_none(),
                update.metric_types_found.is_none_or(|n| n == 0)
            );
            prop_assert_eq!(update.overall_score.is_some(), update.inferred_region_id.is_some());
        }
    }
}
