//! Per-metric grouping of resolved incidents into region aggregates.

use std::collections::{BTreeMap, BTreeSet};

use safety_metrics_geography_models::{Region, RegionId};
use safety_metrics_incident_models::CanonicalIncident;
use safety_metrics_scoring_models::{MetricDefinition, RegionMetricAggregate};
use serde::{Deserialize, Serialize};

use crate::score::{ScoringParams, incidents_per_1000};

/// Counts describing one metric's aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStats {
    /// Resolved incidents whose category code belongs to the metric.
    pub matched_codes: usize,
    /// Of those, incidents removed by the metric's hour predicate.
    pub excluded_by_hour: usize,
    /// Incidents counted without evaluating the hour predicate.
    pub hour_filter_exempt: usize,
    /// Incidents counted toward a region.
    pub counted: usize,
    /// Regions with at least one counted incident.
    pub regions: usize,
}

/// Output of [`aggregate_metric`].
#[derive(Debug, Clone, Default)]
pub struct MetricAggregation {
    /// One aggregate per region with incidents, ordered by region id.
    pub aggregates: Vec<RegionMetricAggregate>,
    pub stats: AggregateStats,
}

#[derive(Debug)]
struct RegionGroup<'a> {
    region: &'a Region,
    count: u64,
    latitude_sum: f64,
    longitude_sum: f64,
}

/// Distinct regions that at least one incident resolved to, in id order.
///
/// This is the active set for neighbor lookups.
#[must_use]
pub fn active_regions(regions: &[Option<Region>]) -> Vec<RegionId> {
    regions
        .iter()
        .flatten()
        .map(|r| r.id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Aggregates one metric over a scope's incidents.
///
/// `regions` is parallel to `incidents` (the region resolver output).
/// Incidents with no region are ignored. `codes` is the scope's category
/// code set for this metric. The metric's hour predicate is applied to
/// every incident that is not exempt from it.
///
/// A region's neighbor total is the sum of direct counts over its distinct
/// neighbors that also have incidents for this metric.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn aggregate_metric(
    definition: &MetricDefinition,
    codes: &BTreeSet<String>,
    incidents: &[CanonicalIncident],
    regions: &[Option<Region>],
    neighbors: &BTreeMap<RegionId, Vec<RegionId>>,
    params: &ScoringParams,
) -> MetricAggregation {
    let hours = definition.hours.as_ref().filter(|h| !h.is_empty());
    let mut stats = AggregateStats::default();
    let mut groups: BTreeMap<&RegionId, RegionGroup<'_>> = BTreeMap::new();

    // ── Filter and group ─────────────────────────────────────────────
    for (incident, region) in incidents.iter().zip(regions) {
        let Some(region) = region else {
            continue;
        };
        if !codes.contains(incident.category_code.as_str()) {
            continue;
        }
        stats.matched_codes += 1;

        if let Some(hours) = hours {
            if incident.hour_filter_exempt {
                stats.hour_filter_exempt += 1;
            } else if !incident.passes_hour_filter(|h| hours.contains(h)) {
                stats.excluded_by_hour += 1;
                continue;
            }
        }

        let group = groups.entry(&region.id).or_insert_with(|| RegionGroup {
            region,
            count: 0,
            latitude_sum: 0.0,
            longitude_sum: 0.0,
        });
        group.count += 1;
        group.latitude_sum += incident.latitude;
        group.longitude_sum += incident.longitude;
        stats.counted += 1;
    }
    stats.regions = groups.len();

    // ── Neighbor totals and scores ───────────────────────────────────
    let aggregates = groups
        .iter()
        .map(|(region_id, group)| {
            let mut seen = BTreeSet::new();
            let mut neighbor_incident_total = 0u64;
            let mut contributing_neighbors = 0usize;
            for neighbor in neighbors.get(*region_id).map_or(&[][..], Vec::as_slice) {
                if neighbor == *region_id || !seen.insert(neighbor) {
                    continue;
                }
                if let Some(other) = groups.get(neighbor) {
                    neighbor_incident_total += other.count;
                    contributing_neighbors += 1;
                }
            }

            let weighted = params.weighted_incidents(group.count, neighbor_incident_total);
            RegionMetricAggregate {
                region_id: (*region_id).clone(),
                metric_type: definition.id.clone(),
                direct_incident_count: group.count,
                latitude: group.latitude_sum / group.count as f64,
                longitude: group.longitude_sum / group.count as f64,
                population: group.region.population,
                density_proxy: group.region.density_proxy(),
                neighbor_incident_total,
                contributing_neighbors,
                weighted_incident_count: weighted,
                score: params.score(weighted),
                incidents_per_1000: incidents_per_1000(group.count, group.region.population),
            }
        })
        .collect::<Vec<_>>();

    log::info!(
        "Metric '{}': {} incidents matched codes, {} excluded by hour filter, {} counted across {} regions",
        definition.id,
        stats.matched_codes,
        stats.excluded_by_hour,
        stats.counted,
        stats.regions,
    );
    if stats.hour_filter_exempt > 0 {
        log::warn!(
            "Metric '{}': hour filter skipped for {} incidents from sources with unreliable times",
            definition.id,
            stats.hour_filter_exempt,
        );
    }

    MetricAggregation { aggregates, stats }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone as _, Utc};
    use safety_metrics_scoring_models::{HourFilter, MetricType, RiskTexts};

    use super::*;

    fn definition(hours: Option<HourFilter>) -> MetricDefinition {
        MetricDefinition {
            id: MetricType::new("night"),
            question: "Can I go outside after dark?".to_string(),
            description: "night safety".to_string(),
            hours,
            risk_texts: RiskTexts::default(),
        }
    }

    fn region(id: &str, population: u64, housing_units: u64) -> Region {
        Region {
            id: RegionId::new(id),
            population,
            housing_units,
            centroid: None,
        }
    }

    fn incident(code: &str, hour: Option<u32>, lat: f64) -> CanonicalIncident {
        CanonicalIncident {
            source_id: "test".to_string(),
            category_code: code.to_string(),
            occurred_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            hour,
            hour_filter_exempt: false,
            latitude: lat,
            longitude: -118.0,
        }
    }

    fn codes(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|c| (*c).to_string()).collect()
    }

    #[test]
    fn single_incident_example() {
        let incidents = vec![incident("210", Some(22), 34.0)];
        let regions = vec![Some(region("b1", 1000, 500))];
        let result = aggregate_metric(
            &definition(None),
            &codes(&["210"]),
            &incidents,
            &regions,
            &BTreeMap::new(),
            &ScoringParams::default(),
        );

        assert_eq!(result.aggregates.len(), 1);
        let agg = &result.aggregates[0];
        assert_eq!(agg.direct_incident_count, 1);
        assert!((agg.density_proxy - 2.0).abs() < f64::EPSILON);
        assert!((agg.weighted_incident_count - 1.0).abs() < f64::EPSILON);
        assert!((agg.score - 9.900_498).abs() < 1e-5);
        assert!((agg.incidents_per_1000 - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn neighbor_counts_are_weighted() {
        let mut incidents = vec![incident("210", Some(22), 34.0); 3];
        incidents.extend(vec![incident("210", Some(22), 34.1); 10]);
        let mut regions = vec![Some(region("a", 100, 50)); 3];
        regions.extend(vec![Some(region("b", 100, 50)); 10]);
        let neighbors = BTreeMap::from([
            (RegionId::new("a"), vec![RegionId::new("b")]),
            (RegionId::new("b"), vec![RegionId::new("a")]),
        ]);

        let result = aggregate_metric(
            &definition(None),
            &codes(&["210"]),
            &incidents,
            &regions,
            &neighbors,
            &ScoringParams::default(),
        );

        let a = &result.aggregates[0];
        assert_eq!(a.region_id.as_str(), "a");
        assert_eq!(a.neighbor_incident_total, 10);
        assert_eq!(a.contributing_neighbors, 1);
        assert!((a.weighted_incident_count - 5.5).abs() < f64::EPSILON);
        assert!((a.score - 9.464_851).abs() < 1e-5);

        let b = &result.aggregates[1];
        assert_eq!(b.neighbor_incident_total, 3);
        assert!((b.weighted_incident_count - 10.75).abs() < f64::EPSILON);
    }

    #[test]
    fn duplicate_and_self_neighbors_count_once() {
        let incidents = vec![
            incident("210", None, 34.0),
            incident("210", None, 34.1),
            incident("210", None, 34.1),
        ];
        let regions = vec![
            Some(region("a", 0, 0)),
            Some(region("b", 0, 0)),
            Some(region("b", 0, 0)),
        ];
        let neighbors = BTreeMap::from([(
            RegionId::new("a"),
            vec![RegionId::new("a"), RegionId::new("b"), RegionId::new("b")],
        )]);

        let result = aggregate_metric(
            &definition(None),
            &codes(&["210"]),
            &incidents,
            &regions,
            &neighbors,
            &ScoringParams::default(),
        );

        assert_eq!(result.aggregates[0].neighbor_incident_total, 2);
        assert_eq!(result.aggregates[0].contributing_neighbors, 1);
        assert!(result.aggregates[0].incidents_per_1000.abs() < f64::EPSILON);
        assert!(result.aggregates[0].density_proxy.abs() < f64::EPSILON);
    }

    #[test]
    fn neighbors_without_metric_incidents_do_not_contribute() {
        let incidents = vec![incident("210", None, 34.0), incident("999", None, 34.1)];
        let regions = vec![Some(region("a", 0, 0)), Some(region("b", 0, 0))];
        let neighbors = BTreeMap::from([(RegionId::new("a"), vec![RegionId::new("b")])]);

        let result = aggregate_metric(
            &definition(None),
            &codes(&["210"]),
            &incidents,
            &regions,
            &neighbors,
            &ScoringParams::default(),
        );

        assert_eq!(result.aggregates.len(), 1);
        assert_eq!(result.aggregates[0].neighbor_incident_total, 0);
        assert!((result.aggregates[0].weighted_incident_count - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn hour_filter_applies_unless_exempt() {
        let mut exempt = incident("210", None, 34.0);
        exempt.hour_filter_exempt = true;
        let incidents = vec![
            incident("210", Some(22), 34.0),
            incident("210", Some(12), 34.0),
            incident("210", None, 34.0),
            exempt,
        ];
        let regions = vec![Some(region("a", 0, 0)); 4];

        let result = aggregate_metric(
            &definition(Some(HourFilter::range(18, 6))),
            &codes(&["210"]),
            &incidents,
            &regions,
            &BTreeMap::new(),
            &ScoringParams::default(),
        );

        assert_eq!(result.stats.matched_codes, 4);
        assert_eq!(result.stats.excluded_by_hour, 2);
        assert_eq!(result.stats.hour_filter_exempt, 1);
        assert_eq!(result.aggregates[0].direct_incident_count, 2);
    }

    #[test]
    fn unresolved_incidents_are_ignored() {
        let incidents = vec![incident("210", None, 34.0), incident("210", None, 34.0)];
        let regions = vec![None, Some(region("a", 0, 0))];

        let result = aggregate_metric(
            &definition(None),
            &codes(&["210"]),
            &incidents,
            &regions,
            &BTreeMap::new(),
            &ScoringParams::default(),
        );

        assert_eq!(result.stats.counted, 1);
        assert_eq!(result.aggregates[0].direct_incident_count, 1);
    }

    #[test]
    fn location_is_mean_of_incidents() {
        let incidents = vec![incident("210", None, 34.0), incident("210", None, 34.2)];
        let regions = vec![Some(region("a", 0, 0)); 2];

        let result = aggregate_metric(
            &definition(None),
            &codes(&["210"]),
            &incidents,
            &regions,
            &BTreeMap::new(),
            &ScoringParams::default(),
        );

        assert!((result.aggregates[0].latitude - 34.1).abs() < 1e-9);
        assert!((result.aggregates[0].longitude - -118.0).abs() < 1e-9);
    }

    #[test]
    fn active_regions_are_distinct_and_sorted() {
        let regions = vec![
            Some(region("b", 0, 0)),
            None,
            Some(region("a", 0, 0)),
            Some(region("b", 0, 0)),
        ];
        assert_eq!(
            active_regions(&regions),
            vec![RegionId::new("a"), RegionId::new("b")]
        );
    }
}
